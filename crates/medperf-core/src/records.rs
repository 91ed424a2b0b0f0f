//! Local JSON mirrors of server records.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::StorageConfig;
use crate::entities::{BenchmarkRecord, CubeRecord, DatasetRecord};

pub const BENCHMARK_FILENAME: &str = "benchmark.json";
pub const CUBE_METADATA_FILENAME: &str = "mlcube-meta.json";
pub const DATASET_FILENAME: &str = "registration-info.json";

#[derive(Debug, Clone)]
pub struct RecordStore {
    storage: StorageConfig,
}

impl RecordStore {
    #[must_use]
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    fn benchmark_path(&self, id: u64) -> PathBuf {
        self.storage.benchmark_dir(id).join(BENCHMARK_FILENAME)
    }

    fn cube_path(&self, id: &str) -> PathBuf {
        self.storage.cube_dir(id).join(CUBE_METADATA_FILENAME)
    }

    fn dataset_path(&self, uid: &str) -> PathBuf {
        self.storage.dataset_dir(uid).join(DATASET_FILENAME)
    }

    /// # Errors
    /// Returns an error when an existing mirror cannot be read or parsed.
    pub fn load_benchmark(&self, id: u64) -> Result<Option<BenchmarkRecord>> {
        read_json(&self.benchmark_path(id))
    }

    /// # Errors
    /// Returns an error when the mirror cannot be written.
    pub fn save_benchmark(&self, record: &BenchmarkRecord) -> Result<()> {
        write_json_atomic(&self.benchmark_path(record.id), record)
    }

    /// # Errors
    /// Returns an error when an existing mirror cannot be read or parsed.
    pub fn load_cube(&self, id: &str) -> Result<Option<CubeRecord>> {
        read_json(&self.cube_path(id))
    }

    /// # Errors
    /// Returns an error when the mirror cannot be written.
    pub fn save_cube(&self, record: &CubeRecord) -> Result<()> {
        write_json_atomic(&self.cube_path(&record.id), record)
    }

    /// # Errors
    /// Returns an error when an existing mirror cannot be read or parsed.
    pub fn load_dataset(&self, uid: &str) -> Result<Option<DatasetRecord>> {
        read_json(&self.dataset_path(uid))
    }

    /// Mirror a dataset record under `uid`, which may differ from its
    /// generated uid when the dataset was fetched by server id.
    ///
    /// # Errors
    /// Returns an error when the mirror cannot be written.
    pub fn save_dataset(&self, uid: &str, record: &DatasetRecord) -> Result<()> {
        write_json_atomic(&self.dataset_path(uid), record)
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Write `value` as pretty JSON through a sibling temp file and a rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage {}", path.display()))?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "record written");
    Ok(())
}
