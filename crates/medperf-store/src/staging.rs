use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, TempPath};
use tracing::debug;

use crate::error::{io_error, StoreError};
use crate::hash::{compute_sha256, expected_digest, verify_hash};
use crate::source::SourceRegistry;

/// Scratch area where downloads wait until they are verified.
///
/// The root must live on the same filesystem as the permanent storage so
/// promotion is a single rename.
#[derive(Debug, Clone)]
pub struct Staging {
    root: PathBuf,
}

impl Staging {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(io_error("create", &self.root))
    }

    /// Reserve a fresh temporary file path; it is removed when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the scratch root is not writable.
    pub fn temp_path(&self) -> Result<TempPath, StoreError> {
        self.ensure_root()?;
        tempfile::Builder::new()
            .prefix("download-")
            .tempfile_in(&self.root)
            .map(tempfile::NamedTempFile::into_temp_path)
            .map_err(io_error("create temp file in", &self.root))
    }

    /// Reserve a fresh scratch directory; it is removed when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the scratch root is not writable.
    pub fn scratch_dir(&self) -> Result<TempDir, StoreError> {
        self.ensure_root()?;
        tempfile::Builder::new()
            .prefix("extract-")
            .tempdir_in(&self.root)
            .map_err(io_error("create temp dir in", &self.root))
    }

    /// Download `resource` into scratch storage and verify its digest.
    ///
    /// The descriptor is parsed before any file is created. On failure the
    /// partial download is discarded with the temporary path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnrecognizedResource`] for unknown descriptors and
    /// propagates retrieval, authentication and integrity failures unchanged.
    pub fn stage_and_verify(
        &self,
        registry: &SourceRegistry,
        resource: &str,
        expected_hash: Option<&str>,
    ) -> Result<StagedFile, StoreError> {
        let expected = expected_digest(expected_hash)?;
        let parsed = registry.parse(resource)?;
        let path = self.temp_path()?;
        parsed.fetch(&path)?;
        let actual = compute_sha256(&path)?;
        let hash = verify_hash(resource, &actual, expected.as_deref())?;
        debug!(%resource, %hash, staged = %path.display(), "resource staged");
        Ok(StagedFile { path, hash })
    }
}

/// A verified download that has not been published yet.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    hash: String,
}

impl StagedFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Move the staged file to `dest` with a single rename, creating parent
    /// directories first. Consumes the staged file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the rename fails.
    pub fn promote(self, dest: &Path) -> Result<String, StoreError> {
        let Self { path, hash } = self;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_error("create", parent))?;
        }
        path.persist(dest).map_err(|err| StoreError::Io {
            action: "promote download to",
            path: dest.to_path_buf(),
            source: err.error,
        })?;
        debug!(dest = %dest.display(), %hash, "resource promoted");
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sha256_hex, MemorySource};
    use crate::ErrorKind;

    fn leftover_entries(root: &Path) -> usize {
        fs::read_dir(root).map(Iterator::count).unwrap_or(0)
    }

    #[test]
    fn verified_download_promotes_to_final_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = MemorySource::new("mem");
        source.insert("cube", b"name: demo\n");
        let staging = Staging::new(temp.path().join("tmp"));

        let staged = staging.stage_and_verify(&source.registry(), "mem:cube", None)?;
        assert_eq!(staged.hash(), sha256_hex(b"name: demo\n"));
        let dest = temp.path().join("cubes").join("1").join("mlcube.yaml");
        let hash = staged.promote(&dest)?;

        assert_eq!(hash, sha256_hex(b"name: demo\n"));
        assert_eq!(fs::read(&dest)?, b"name: demo\n");
        assert_eq!(leftover_entries(staging.root()), 0);
        Ok(())
    }

    #[test]
    fn integrity_failure_leaves_no_scratch_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = MemorySource::new("mem");
        source.insert("cube", b"tampered");
        let staging = Staging::new(temp.path().join("tmp"));

        let err = staging
            .stage_and_verify(&source.registry(), "mem:cube", Some("0000"))
            .expect_err("hash mismatch");
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(leftover_entries(staging.root()), 0);
        Ok(())
    }

    #[test]
    fn unknown_descriptor_creates_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = MemorySource::new("mem");
        let staging = Staging::new(temp.path().join("tmp"));

        let err = staging
            .stage_and_verify(&source.registry(), "other:cube", None)
            .expect_err("unrecognized");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!staging.root().exists());
        assert_eq!(source.downloads(), 0);
        Ok(())
    }

    #[test]
    fn failed_download_is_discarded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = MemorySource::new("mem");
        let staging = Staging::new(temp.path().join("tmp"));

        let err = staging
            .stage_and_verify(&source.registry(), "mem:absent", None)
            .expect_err("missing object");
        assert_eq!(err.kind(), ErrorKind::Retrieval);
        assert_eq!(leftover_entries(staging.root()), 0);
        Ok(())
    }
}
