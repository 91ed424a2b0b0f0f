use std::fs;
use std::path::Path;

use super::{strip_source_prefix, ResourceSource};
use crate::error::StoreError;

const PREFIX: &str = "file";

/// Local files addressed as `file:<path>`, used for mirrors and offline work.
pub struct FileSource;

impl ResourceSource for FileSource {
    fn prefix(&self) -> &str {
        PREFIX
    }

    fn recognize(&self, resource: &str) -> Option<String> {
        strip_source_prefix(resource, PREFIX).map(ToOwned::to_owned)
    }

    fn download(&self, identifier: &str, dest: &Path) -> Result<(), StoreError> {
        let src = Path::new(identifier);
        if !src.is_file() {
            return Err(StoreError::retrieval(identifier, "no such file"));
        }
        fs::copy(src, dest).map_err(|err| StoreError::retrieval(identifier, err))?;
        Ok(())
    }
}
