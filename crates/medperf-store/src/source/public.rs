use std::path::Path;

use reqwest::blocking::Client;
use url::Url;

use super::{strip_source_prefix, stream_to_file, ResourceSource};
use crate::error::StoreError;

const PREFIX: &str = "public";

/// Anonymous direct-download links.
pub struct PublicSource {
    client: Client,
    chunk_size: usize,
}

impl PublicSource {
    #[must_use]
    pub fn new(client: Client, chunk_size: usize) -> Self {
        Self { client, chunk_size }
    }
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

impl ResourceSource for PublicSource {
    fn prefix(&self) -> &str {
        PREFIX
    }

    fn recognize(&self, resource: &str) -> Option<String> {
        let candidate = strip_source_prefix(resource, PREFIX).unwrap_or(resource);
        is_http_url(candidate).then(|| candidate.to_string())
    }

    fn download(&self, identifier: &str, dest: &Path) -> Result<(), StoreError> {
        let response = self
            .client
            .get(identifier)
            .send()
            .map_err(|err| StoreError::retrieval(identifier, err))?;
        stream_to_file(response, identifier, dest, self.chunk_size)?;
        Ok(())
    }
}
