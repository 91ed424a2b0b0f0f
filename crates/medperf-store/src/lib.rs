//! Content-addressed resource cache for cube assets and demo datasets.
//!
//! Every download lands in a private scratch location first and is only
//! renamed into the permanent storage tree once its sha256 digest has been
//! checked, so a cached path is either absent or complete.

use std::time::Duration;

mod archive;
mod cache;
mod error;
mod hash;
mod source;
mod staging;

pub use archive::untar;
pub use cache::{
    cube_image_name, CacheLayout, CubeCacheMetadata, ResourceCache, ADDITIONAL_FILES_PATH,
    CUBE_CACHE_FILENAME, CUBE_FILENAME, IMAGE_PATH, PARAMS_PATH, TARBALL_FILENAME,
};
pub use error::{ErrorKind, StoreError};
pub use hash::{compute_sha256, expected_digest, verify_hash, verify_or_get_hash, DIGEST_LEN};
pub use source::{
    http_client, FileSource, ParsedResource, PublicSource, ResourceSource, SourceRegistry,
    TokenSource,
};
pub use staging::{StagedFile, Staging};

pub(crate) const USER_AGENT: &str = concat!("medperf/", env!("CARGO_PKG_VERSION"));

/// Default streaming chunk for direct downloads (10 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(600);

#[cfg(any(test, feature = "testing"))]
pub mod testing;
