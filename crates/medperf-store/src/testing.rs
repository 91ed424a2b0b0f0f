//! Fixtures for exercising the cache without a network.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flate2::{write::GzEncoder, Compression};
use sha2::{Digest, Sha256};

use crate::error::io_error;
use crate::source::{strip_source_prefix, ResourceSource, SourceRegistry};
use crate::StoreError;

/// In-memory source that counts how often it is asked to download.
#[derive(Clone)]
pub struct MemorySource {
    prefix: &'static str,
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    downloads: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            objects: Arc::default(),
            downloads: Arc::default(),
        }
    }

    pub fn insert(&self, identifier: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(identifier.to_string(), bytes.to_vec());
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> SourceRegistry {
        SourceRegistry::new(vec![Box::new(self.clone())])
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new("mem")
    }
}

impl ResourceSource for MemorySource {
    fn prefix(&self) -> &str {
        self.prefix
    }

    fn recognize(&self, resource: &str) -> Option<String> {
        strip_source_prefix(resource, self.prefix).map(ToOwned::to_owned)
    }

    fn download(&self, identifier: &str, dest: &Path) -> Result<(), StoreError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(identifier)
            .cloned()
            .ok_or_else(|| StoreError::retrieval(identifier, "not found"))?;
        fs::write(dest, bytes).map_err(io_error("write", dest))
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Build a gzipped tarball holding the given files.
pub fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, *contents)
            .expect("append tar entry");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}
