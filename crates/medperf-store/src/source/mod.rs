//! Resource sources and the ordered registry that resolves descriptors.
//!
//! A descriptor is either a bare url (direct download) or
//! `<source_prefix>:<identifier>`. Sources are scanned in registration order
//! and the first one that recognizes the descriptor handles it.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use tracing::debug;

use crate::error::{io_error, StoreError};
use crate::USER_AGENT;

mod file;
mod public;
mod token;

pub use file::FileSource;
pub use public::PublicSource;
pub use token::TokenSource;

/// Capability set every resource source provides.
pub trait ResourceSource: Send + Sync {
    /// Prefix selecting this source in `<prefix>:<identifier>` descriptors.
    fn prefix(&self) -> &str;

    /// Return the source-specific identifier when this source accepts the
    /// descriptor. Must not fail or touch the network.
    fn recognize(&self, resource: &str) -> Option<String>;

    /// Establish credentials before any bytes are transferred.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Authentication`] when credentials are unusable.
    fn authenticate(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Write the complete resource to `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Retrieval`] when the transfer fails.
    fn download(&self, identifier: &str, dest: &Path) -> Result<(), StoreError>;
}

/// A descriptor bound to the source that accepted it.
pub struct ParsedResource<'a> {
    source: &'a dyn ResourceSource,
    identifier: String,
    resource: String,
}

impl ParsedResource<'_> {
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.source.prefix()
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Authenticate with the owning source and download into `dest`.
    ///
    /// # Errors
    ///
    /// Propagates authentication and retrieval failures unchanged.
    pub fn fetch(&self, dest: &Path) -> Result<(), StoreError> {
        self.source.authenticate()?;
        debug!(
            source = self.source.prefix(),
            identifier = %self.identifier,
            dest = %dest.display(),
            "downloading resource"
        );
        self.source.download(&self.identifier, dest)
    }
}

/// Ordered list of sources scanned once per descriptor.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Box<dyn ResourceSource>>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new(sources: Vec<Box<dyn ResourceSource>>) -> Self {
        Self { sources }
    }

    /// Registry with the anonymous `public` and `file` sources.
    #[must_use]
    pub fn standard(client: Client, chunk_size: usize) -> Self {
        Self::new(vec![
            Box::new(PublicSource::new(client, chunk_size)),
            Box::new(FileSource),
        ])
    }

    #[must_use]
    pub fn with_source(mut self, source: Box<dyn ResourceSource>) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn prefixes(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.prefix()).collect()
    }

    /// Resolve a descriptor to the first source that accepts it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnrecognizedResource`] when no source accepts it.
    pub fn parse(&self, resource: &str) -> Result<ParsedResource<'_>, StoreError> {
        self.sources
            .iter()
            .find_map(|source| {
                source
                    .recognize(resource)
                    .map(|identifier| ParsedResource {
                        source: source.as_ref(),
                        identifier,
                        resource: resource.to_string(),
                    })
            })
            .ok_or_else(|| StoreError::UnrecognizedResource {
                resource: resource.to_string(),
            })
    }
}

/// Build the blocking client shared by http-backed sources.
///
/// # Errors
///
/// Returns [`StoreError::Retrieval`] when the TLS backend cannot be set up.
pub fn http_client(timeout: Duration) -> Result<Client, StoreError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|err| StoreError::retrieval("http client", err))
}

/// Strip `<prefix>:` from a descriptor, rejecting empty identifiers.
pub(crate) fn strip_source_prefix<'a>(resource: &'a str, prefix: &str) -> Option<&'a str> {
    resource
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(':'))
        .map(str::trim)
        .filter(|identifier| !identifier.is_empty())
}

/// Copy a response body into `dest` in bounded chunks.
pub(crate) fn stream_to_file(
    mut response: Response,
    resource: &str,
    dest: &Path,
    chunk_size: usize,
) -> Result<u64, StoreError> {
    let status = response.status();
    if !status.is_success() {
        return Err(StoreError::retrieval(
            resource,
            format!("server responded with status {status}"),
        ));
    }
    let mut file = File::create(dest).map_err(io_error("create", dest))?;
    let mut buffer = vec![0_u8; chunk_size.max(1)];
    let mut written: u64 = 0;
    loop {
        let read = response
            .read(&mut buffer)
            .map_err(|err| StoreError::retrieval(resource, err))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .map_err(io_error("write", dest))?;
        written += read as u64;
    }
    file.flush().map_err(io_error("flush", dest))?;
    Ok(written)
}
