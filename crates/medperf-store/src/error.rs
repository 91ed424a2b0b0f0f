use std::io;
use std::path::PathBuf;

/// Coarse classification shared by every store failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Integrity,
    Retrieval,
    Authentication,
    Io,
}

/// Errors surfaced by sources, staging and the resource cache.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(
        "[MP100] invalid resource input '{resource}': a resource must be a url or in the form \
         '<source_prefix>:<resource_identifier>'"
    )]
    UnrecognizedResource { resource: String },
    #[error("[MP101] {0}")]
    InvalidArgument(String),
    #[error("[MP200] hash mismatch for {subject} (expected {expected}, found {actual})")]
    Integrity {
        subject: String,
        expected: String,
        actual: String,
    },
    #[error("[MP300] there was a problem retrieving {resource}: {reason}")]
    Retrieval { resource: String, reason: String },
    #[error("[MP400] unable to authenticate with source '{source_name}': {reason}")]
    Authentication { source_name: String, reason: String },
    #[error("[MP500] failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnrecognizedResource { .. } | Self::InvalidArgument(_) => {
                ErrorKind::InvalidArgument
            }
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Retrieval { .. } => ErrorKind::Retrieval,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn retrieval(resource: impl Into<String>, reason: impl ToString) -> Self {
        Self::Retrieval {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }
}

/// Build a mapper that tags an `io::Error` with the action and path involved.
pub(crate) fn io_error(
    action: &'static str,
    path: impl Into<PathBuf>,
) -> impl FnOnce(io::Error) -> StoreError {
    let path = path.into();
    move |source| StoreError::Io {
        action,
        path,
        source,
    }
}
