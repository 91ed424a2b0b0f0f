use std::path::Path;

use reqwest::blocking::Client;

use super::{strip_source_prefix, stream_to_file, ResourceSource};
use crate::error::StoreError;

/// Named institutional storage reached with a bearer token.
///
/// Identifiers are appended to the configured base url.
pub struct TokenSource {
    prefix: String,
    base_url: String,
    token: Option<String>,
    client: Client,
    chunk_size: usize,
}

impl TokenSource {
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        base_url: impl Into<String>,
        token: Option<String>,
        client: Client,
        chunk_size: usize,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            base_url: base_url.into(),
            token,
            client,
            chunk_size,
        }
    }

    fn token(&self) -> Result<&str, StoreError> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| StoreError::Authentication {
                source_name: self.prefix.clone(),
                reason: "no access token configured".to_string(),
            })
    }
}

impl ResourceSource for TokenSource {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn recognize(&self, resource: &str) -> Option<String> {
        strip_source_prefix(resource, &self.prefix).map(ToOwned::to_owned)
    }

    fn authenticate(&self) -> Result<(), StoreError> {
        self.token().map(|_| ())
    }

    fn download(&self, identifier: &str, dest: &Path) -> Result<(), StoreError> {
        let token = self.token()?;
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            identifier.trim_start_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .map_err(|err| StoreError::retrieval(&url, err))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(StoreError::Authentication {
                source_name: self.prefix.clone(),
                reason: format!("server rejected the token ({})", response.status()),
            });
        }
        stream_to_file(response, &url, dest, self.chunk_size)?;
        Ok(())
    }
}
