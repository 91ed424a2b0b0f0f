use medperf_store::StoreError;

/// Typed failures raised by the test pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    InvalidEntity(String),
    #[error("{0}")]
    Execution(String),
}

impl TestError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn invalid_entity(message: impl Into<String>) -> Self {
        Self::InvalidEntity(message.into())
    }
}

/// Classification of any error surfaced by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    InvalidArgument,
    InvalidEntity,
    Integrity,
    Retrieval,
    Authentication,
    Execution,
    Io,
    Other,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidEntity => "invalid_entity",
            Self::Integrity => "integrity",
            Self::Retrieval => "retrieval",
            Self::Authentication => "authentication",
            Self::Execution => "execution",
            Self::Io => "io",
            Self::Other => "other",
        }
    }
}

/// Classify an error by the most specific typed cause in its chain.
#[must_use]
pub fn error_kind(err: &anyhow::Error) -> FailureKind {
    for cause in err.chain() {
        if let Some(test) = cause.downcast_ref::<TestError>() {
            return match test {
                TestError::InvalidArgument(_) => FailureKind::InvalidArgument,
                TestError::InvalidEntity(_) => FailureKind::InvalidEntity,
                TestError::Execution(_) => FailureKind::Execution,
            };
        }
        if let Some(store) = cause.downcast_ref::<StoreError>() {
            return match store.kind() {
                medperf_store::ErrorKind::InvalidArgument => FailureKind::InvalidArgument,
                medperf_store::ErrorKind::Integrity => FailureKind::Integrity,
                medperf_store::ErrorKind::Retrieval => FailureKind::Retrieval,
                medperf_store::ErrorKind::Authentication => FailureKind::Authentication,
                medperf_store::ErrorKind::Io => FailureKind::Io,
            };
        }
    }
    FailureKind::Other
}
