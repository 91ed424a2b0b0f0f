use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use medperf_store::ResourceCache;
use serde::Deserialize;
use tracing::info;

use crate::error::TestError;

pub const DEMO_PATHS_FILENAME: &str = "paths.yaml";

#[derive(Debug, Deserialize)]
struct DemoPaths {
    data_path: Option<String>,
    labels_path: Option<String>,
    #[serde(default)]
    metadata_path: Option<String>,
}

/// Raw inputs for data preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawData {
    pub data_path: PathBuf,
    pub labels_path: PathBuf,
    pub metadata_path: Option<PathBuf>,
}

/// Read `paths.yaml` from an extracted demo dataset.
///
/// # Errors
/// Returns [`TestError::InvalidEntity`] when the file or a required key is missing.
pub fn demo_dataset_paths(root: &Path) -> Result<RawData> {
    let file = root.join(DEMO_PATHS_FILENAME);
    let invalid = |reason: &str| -> anyhow::Error {
        TestError::invalid_entity(format!(
            "demo dataset at {} is invalid: {reason}",
            root.display()
        ))
        .into()
    };
    let contents = fs::read_to_string(&file)
        .map_err(|_| invalid(&format!("{DEMO_PATHS_FILENAME} is missing")))?;
    let paths: DemoPaths = serde_yaml::from_str(&contents)
        .map_err(|err| invalid(&format!("{DEMO_PATHS_FILENAME} is malformed ({err})")))?;
    let data_path = paths
        .data_path
        .filter(|value| !value.is_empty())
        .ok_or_else(|| invalid("data_path is not declared"))?;
    let labels_path = paths
        .labels_path
        .filter(|value| !value.is_empty())
        .ok_or_else(|| invalid("labels_path is not declared"))?;
    Ok(RawData {
        data_path: root.join(data_path),
        labels_path: root.join(labels_path),
        metadata_path: paths
            .metadata_path
            .filter(|value| !value.is_empty())
            .map(|value| root.join(value)),
    })
}

/// Fetch a demo dataset through the cache and locate its raw inputs.
///
/// # Errors
/// Propagates cache failures and invalid dataset layouts.
pub fn download_demo_data(
    cache: &ResourceCache,
    url: &str,
    expected_hash: Option<&str>,
) -> Result<(RawData, String)> {
    let (root, hash) = cache.get_demo_dataset(url, expected_hash)?;
    info!(dir = %root.display(), %hash, "demo dataset ready");
    Ok((demo_dataset_paths(&root)?, hash))
}
