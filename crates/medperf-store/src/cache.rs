//! On-disk cache for cube assets and demo datasets.
//!
//! Layout:
//! ```text
//! {images}/{sha256}                      shared image objects
//! {demo}/{sha256}/                       extracted demo datasets
//! {cube}/mlcube.yaml                     cube manifest
//! {cube}/workspace/parameters.yaml       cube parameters
//! {cube}/workspace/.image/{name}         link into {images}
//! {cube}/workspace/additional_files/     extracted additional files
//! {cube}/.cache_metadata.json            last applied additional-files hash
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::archive::untar;
use crate::error::{io_error, StoreError};
use crate::hash::{compute_sha256, expected_digest};
use crate::source::SourceRegistry;
use crate::staging::{StagedFile, Staging};

pub const CUBE_FILENAME: &str = "mlcube.yaml";
pub const PARAMS_PATH: &str = "workspace/parameters.yaml";
pub const ADDITIONAL_FILES_PATH: &str = "workspace/additional_files";
pub const IMAGE_PATH: &str = "workspace/.image";
pub const CUBE_CACHE_FILENAME: &str = ".cache_metadata.json";
pub const TARBALL_FILENAME: &str = "tmp.tar.gz";
const DEFAULT_IMAGE_NAME: &str = "image.tar";

/// Shared storage roots owned by the cache.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    pub images: PathBuf,
    pub demo: PathBuf,
    pub tmp: PathBuf,
}

impl CacheLayout {
    /// Standard layout below a storage root.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            images: root.join(".images"),
            demo: root.join("demo"),
            tmp: root.join("tmp"),
        }
    }

    #[must_use]
    pub fn image_object(&self, hash: &str) -> PathBuf {
        self.images.join(hash)
    }

    #[must_use]
    pub fn demo_dir(&self, hash: &str) -> PathBuf {
        self.demo.join(hash)
    }
}

/// Side-car record kept next to a cube's additional files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeCacheMetadata {
    #[serde(default)]
    pub additional_files_cached_hash: Option<String>,
}

/// Resolves resource descriptors to verified local paths.
pub struct ResourceCache {
    layout: CacheLayout,
    registry: SourceRegistry,
    staging: Staging,
}

impl ResourceCache {
    #[must_use]
    pub fn new(layout: CacheLayout, registry: SourceRegistry) -> Self {
        let staging = Staging::new(layout.tmp.clone());
        Self {
            layout,
            registry,
            staging,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    #[must_use]
    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    fn stage(&self, url: &str, expected: Option<&str>) -> Result<StagedFile, StoreError> {
        self.staging.stage_and_verify(&self.registry, url, expected)
    }

    /// Fetch a cube manifest into `{cube_dir}/mlcube.yaml`.
    ///
    /// # Errors
    ///
    /// Propagates descriptor, retrieval, integrity and I/O failures.
    pub fn get_manifest(
        &self,
        url: &str,
        cube_dir: &Path,
        expected_hash: Option<&str>,
    ) -> Result<(PathBuf, String), StoreError> {
        self.get_single_file(url, cube_dir.join(CUBE_FILENAME), expected_hash)
    }

    /// Fetch cube parameters into `{cube_dir}/workspace/parameters.yaml`.
    ///
    /// # Errors
    ///
    /// Propagates descriptor, retrieval, integrity and I/O failures.
    pub fn get_params(
        &self,
        url: &str,
        cube_dir: &Path,
        expected_hash: Option<&str>,
    ) -> Result<(PathBuf, String), StoreError> {
        self.get_single_file(url, cube_dir.join(PARAMS_PATH), expected_hash)
    }

    // An existing file is only trusted when an explicit hash confirms it.
    fn get_single_file(
        &self,
        url: &str,
        dest: PathBuf,
        expected_hash: Option<&str>,
    ) -> Result<(PathBuf, String), StoreError> {
        let expected = expected_digest(expected_hash)?;
        if let Some(expected) = &expected {
            if dest.is_file() {
                if compute_sha256(&dest)? == *expected {
                    debug!(path = %dest.display(), "cached file is up to date");
                    return Ok((dest, expected.clone()));
                }
                debug!(path = %dest.display(), "cached file is out of date");
            }
        }
        let hash = self.stage(url, expected.as_deref())?.promote(&dest)?;
        Ok((dest, hash))
    }

    /// Store an image under the shared images root and link it into the cube.
    ///
    /// When the hash is known and the shared object exists, no download
    /// happens. The cube-local link is recreated on every call.
    ///
    /// # Errors
    ///
    /// Propagates descriptor, retrieval, integrity and I/O failures.
    pub fn get_image(
        &self,
        url: &str,
        cube_dir: &Path,
        expected_hash: Option<&str>,
    ) -> Result<(PathBuf, String), StoreError> {
        let (object, hash) = match expected_digest(expected_hash)? {
            Some(expected) => {
                let object = self.layout.image_object(&expected);
                if object.is_file() {
                    debug!(%expected, "image found in shared storage");
                } else {
                    publish_file(self.stage(url, Some(expected.as_str()))?, &object)?;
                }
                (object, expected)
            }
            None => {
                let staged = self.stage(url, None)?;
                let hash = staged.hash().to_string();
                let object = self.layout.image_object(&hash);
                publish_file(staged, &object)?;
                (object, hash)
            }
        };

        let link_dir = cube_dir.join(IMAGE_PATH);
        fs::create_dir_all(&link_dir).map_err(io_error("create", &link_dir))?;
        let name = cube_image_name(cube_dir);
        remove_image_links(&link_dir)?;
        let link = link_dir.join(name);
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link).map_err(io_error("remove stale link", &link))?;
        }
        link_file(&object, &link).map_err(io_error("link image to", &link))?;
        Ok((link, hash))
    }

    /// Download and extract a cube's additional-files tarball.
    ///
    /// Extraction happens in scratch storage and the folder is swapped in
    /// only after it completes. The tarball hash is recorded in the cube's
    /// side-car so later calls can skip the download.
    ///
    /// # Errors
    ///
    /// Propagates descriptor, retrieval, integrity and I/O failures.
    pub fn get_additional_files(
        &self,
        url: &str,
        cube_dir: &Path,
        expected_tarball_hash: Option<&str>,
    ) -> Result<String, StoreError> {
        let folder = cube_dir.join(ADDITIONAL_FILES_PATH);
        let metadata_path = cube_dir.join(CUBE_CACHE_FILENAME);
        let expected = expected_digest(expected_tarball_hash)?;
        if let Some(expected) = &expected {
            let cached = read_cube_cache_metadata(&metadata_path);
            if folder.is_dir() && cached.additional_files_cached_hash.as_ref() == Some(expected) {
                debug!(folder = %folder.display(), "additional files are up to date");
                return Ok(expected.clone());
            }
            debug!(folder = %folder.display(), "additional files missing or out of date");
        }

        let (scratch, hash) = self.extract_to_scratch(url, expected.as_deref())?;
        if let Some(parent) = folder.parent() {
            fs::create_dir_all(parent).map_err(io_error("create", parent))?;
        }
        if fs::symlink_metadata(&folder).is_ok() {
            remove_path(&folder)?;
        }
        fs::rename(scratch.path(), &folder).map_err(io_error("publish", &folder))?;
        write_cube_cache_metadata(
            &metadata_path,
            &CubeCacheMetadata {
                additional_files_cached_hash: Some(hash.clone()),
            },
        )?;
        Ok(hash)
    }

    /// Download and extract a demo dataset into `{demo}/{hash}`.
    ///
    /// # Errors
    ///
    /// Propagates descriptor, retrieval, integrity and I/O failures.
    pub fn get_demo_dataset(
        &self,
        url: &str,
        expected_hash: Option<&str>,
    ) -> Result<(PathBuf, String), StoreError> {
        let expected = expected_digest(expected_hash)?;
        if let Some(expected) = &expected {
            let dir = self.layout.demo_dir(expected);
            if dir.is_dir() {
                debug!(dir = %dir.display(), "demo dataset found in shared storage");
                return Ok((dir, expected.clone()));
            }
        }

        let (scratch, hash) = self.extract_to_scratch(url, expected.as_deref())?;
        let dir = self.layout.demo_dir(&hash);
        publish_dir(&scratch, &dir)?;
        Ok((dir, hash))
    }

    fn extract_to_scratch(
        &self,
        url: &str,
        expected: Option<&str>,
    ) -> Result<(TempDir, String), StoreError> {
        let staged = self.stage(url, expected)?;
        let scratch = self.staging.scratch_dir()?;
        let tarball = scratch.path().join(TARBALL_FILENAME);
        let hash = staged.promote(&tarball)?;
        untar(&tarball, scratch.path())?;
        Ok((scratch, hash))
    }
}

/// Name of the cube-local image link, taken from `singularity.image` in the
/// cube manifest when present.
#[must_use]
pub fn cube_image_name(cube_dir: &Path) -> String {
    fs::read_to_string(cube_dir.join(CUBE_FILENAME))
        .ok()
        .and_then(|contents| serde_yaml::from_str::<serde_yaml::Value>(&contents).ok())
        .and_then(|manifest| {
            manifest
                .get("singularity")
                .and_then(|section| section.get("image"))
                .and_then(serde_yaml::Value::as_str)
                .and_then(|image| Path::new(image).file_name())
                .map(|name| name.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string())
}

// Content-addressed: an existing object already holds identical bytes.
fn publish_file(staged: StagedFile, object: &Path) -> Result<(), StoreError> {
    if object.is_file() {
        debug!(object = %object.display(), "object already present");
        return Ok(());
    }
    staged.promote(object).map(|_| ())
}

fn publish_dir(scratch: &TempDir, dest: &Path) -> Result<(), StoreError> {
    if dest.is_dir() {
        debug!(dest = %dest.display(), "directory already present");
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(io_error("create", parent))?;
    }
    match fs::rename(scratch.path(), dest) {
        Ok(()) => Ok(()),
        Err(_) if dest.is_dir() => {
            debug!(dest = %dest.display(), "directory populated concurrently");
            Ok(())
        }
        Err(err) => Err(io_error("publish", dest)(err)),
    }
}

// Links left under a previous image name; regular files are never touched.
fn remove_image_links(link_dir: &Path) -> Result<(), StoreError> {
    let entries = fs::read_dir(link_dir).map_err(io_error("read", link_dir))?;
    for entry in entries {
        let entry = entry.map_err(io_error("read", link_dir))?;
        let path = entry.path();
        let is_link = entry
            .file_type()
            .map_err(io_error("stat", &path))?
            .is_symlink();
        if is_link {
            warn!(link = %path.display(), "removing stale image link");
            fs::remove_file(&path).map_err(io_error("remove stale link", &path))?;
        }
    }
    Ok(())
}

fn remove_path(path: &Path) -> Result<(), StoreError> {
    let meta = fs::symlink_metadata(path).map_err(io_error("stat", path))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).map_err(io_error("remove", path))
    } else {
        fs::remove_file(path).map_err(io_error("remove", path))
    }
}

fn read_cube_cache_metadata(path: &Path) -> CubeCacheMetadata {
    let Ok(contents) = fs::read_to_string(path) else {
        return CubeCacheMetadata::default();
    };
    serde_json::from_str(&contents).unwrap_or_else(|err| {
        warn!(path = %path.display(), %err, "ignoring unreadable cube cache metadata");
        CubeCacheMetadata::default()
    })
}

fn write_cube_cache_metadata(path: &Path, meta: &CubeCacheMetadata) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_error("create", parent))?;
    let body = serde_json::to_vec_pretty(meta)
        .map_err(|err| io_error("encode", path)(io::Error::other(err)))?;
    tmp.write_all(&body).map_err(io_error("write", path))?;
    tmp.persist(path).map_err(|err| StoreError::Io {
        action: "write",
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

#[cfg(unix)]
fn link_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn link_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
