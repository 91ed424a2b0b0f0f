//! Cube references and their materialization under cube storage.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use fs4::FileExt;
use medperf_store::{ResourceCache, CUBE_FILENAME, PARAMS_PATH};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::effects::MetadataClient;
use crate::entities::CubeRecord;
use crate::error::TestError;
use crate::records::RecordStore;

/// Prefix of ids minted for cubes referenced by local path.
pub const SYNTHETIC_PREFIX: &str = "ttest_";

#[must_use]
pub fn is_synthetic(id: &str) -> bool {
    id.starts_with(SYNTHETIC_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CubeRef {
    /// Registered server id.
    Registered(String),
    /// Canonical directory holding a cube manifest.
    Local(PathBuf),
}

impl CubeRef {
    /// Interpret a user-supplied cube reference.
    ///
    /// Digits are a registered id. Otherwise the value must name an existing
    /// cube directory or a file inside one.
    ///
    /// # Errors
    /// Returns [`TestError::InvalidArgument`] when the reference cannot be located.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            return Ok(Self::Registered(trimmed.to_string()));
        }
        let mut path = PathBuf::from(trimmed);
        if path.is_file() {
            path = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
        }
        if !trimmed.is_empty() && path.is_dir() {
            let canonical = path
                .canonicalize()
                .with_context(|| format!("failed to resolve {}", path.display()))?;
            return Ok(Self::Local(canonical));
        }
        Err(TestError::invalid_argument(format!(
            "The provided mlcube ({input}) could not be found as a local or remote mlcube"
        ))
        .into())
    }
}

/// A cube whose record is known and whose directory lives under cube storage.
#[derive(Debug, Clone)]
pub struct Cube {
    record: CubeRecord,
    path: PathBuf,
}

impl Cube {
    #[must_use]
    pub fn new(record: CubeRecord, path: PathBuf) -> Self {
        Self { record, path }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.id
    }

    #[must_use]
    pub fn record(&self) -> &CubeRecord {
        &self.record
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(CUBE_FILENAME)
    }

    /// Parameters file, when the cube ships one.
    #[must_use]
    pub fn params_path(&self) -> Option<PathBuf> {
        Some(self.path.join(PARAMS_PATH)).filter(|path| path.is_file())
    }
}

/// Resolve a reference to a cube id, linking local cubes into cube storage.
///
/// # Errors
/// Returns [`TestError::InvalidArgument`] for unknown references and I/O
/// errors when the link or placeholder record cannot be written.
pub fn establish_cube(
    reference: &str,
    storage: &StorageConfig,
    records: &RecordStore,
) -> Result<String> {
    match CubeRef::parse(reference)? {
        CubeRef::Registered(id) => Ok(id),
        CubeRef::Local(path) => link_local_cube(&path, storage, records),
    }
}

fn link_local_cube(path: &Path, storage: &StorageConfig, records: &RecordStore) -> Result<String> {
    let id = synthetic_id(path);
    let cubes = storage.cubes();
    fs::create_dir_all(&cubes).with_context(|| format!("failed to create {}", cubes.display()))?;
    let link = storage.cube_dir(&id);
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link)
            .with_context(|| format!("failed to replace link {}", link.display()))?;
    }
    link_dir(path, &link)
        .with_context(|| format!("failed to link {} to {}", path.display(), link.display()))?;

    let current = records.load_cube(&id).ok().flatten();
    if current.map_or(true, |record| record.id != id) {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        records.save_cube(&CubeRecord::placeholder(id.clone(), name))?;
    }
    info!(%id, path = %path.display(), "linked local mlcube");
    Ok(id)
}

fn synthetic_id(path: &Path) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    let digest = hex::encode(Sha256::digest(path.to_string_lossy().as_bytes()));
    format!("{SYNTHETIC_PREFIX}{millis}_{}", &digest[..8])
}

/// Fetch a cube's record and assets into cube storage.
///
/// Hashes computed for assets the record listed without one are written
/// back to the local mirror so later runs can skip the download.
///
/// # Errors
/// Propagates metadata, retrieval and integrity failures unchanged.
pub fn materialize_cube(
    id: &str,
    local_only: bool,
    metadata: &dyn MetadataClient,
    cache: &ResourceCache,
    storage: &StorageConfig,
    records: &RecordStore,
) -> Result<Cube> {
    let mut record = metadata.get_cube(id, local_only)?;
    let path = storage.cube_dir(id);
    if is_synthetic(id) {
        debug!(%id, "local mlcube needs no download");
        return Ok(Cube::new(record, path));
    }

    let _lock = acquire_lock(&storage.cube_lock(id))?;
    let manifest_url = present(record.git_mlcube_url.as_ref())
        .ok_or_else(|| TestError::invalid_entity(format!("mlcube {id} has no manifest url")))?;
    let (_, hash) = cache.get_manifest(&manifest_url, &path, record.mlcube_hash.as_deref())?;
    record.mlcube_hash = Some(hash);

    if let Some(url) = present(record.git_parameters_url.as_ref()) {
        let (_, hash) = cache.get_params(&url, &path, record.parameters_hash.as_deref())?;
        record.parameters_hash = Some(hash);
    }
    if let Some(url) = present(record.additional_files_tarball_url.as_ref()) {
        let hash = cache.get_additional_files(
            &url,
            &path,
            record.additional_files_tarball_hash.as_deref(),
        )?;
        record.additional_files_tarball_hash = Some(hash);
    }
    if let Some(url) = present(record.image_tarball_url.as_ref()) {
        let (_, hash) = cache.get_image(&url, &path, record.image_tarball_hash.as_deref())?;
        record.image_tarball_hash = Some(hash);
    }

    records.save_cube(&record)?;
    info!(%id, "mlcube ready");
    Ok(Cube::new(record, path))
}

fn present(value: Option<&String>) -> Option<String> {
    value
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn acquire_lock(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create lock directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open lock {}", path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("failed to lock {}", path.display()))?;
    Ok(file)
}

#[cfg(unix)]
fn link_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn link_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
