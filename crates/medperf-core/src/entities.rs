//! Metadata records for benchmarks, cubes and datasets.
//!
//! Field names follow the server's JSON so fetched records can be mirrored
//! to disk verbatim.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Server ids arrive as numbers; synthetic ids are strings.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(value) => value.to_string(),
        RawId::Text(value) => value,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub data_preparation_mlcube: u64,
    pub reference_model_mlcube: u64,
    pub data_evaluator_mlcube: u64,
    #[serde(default)]
    pub demo_dataset_tarball_url: Option<String>,
    #[serde(default)]
    pub demo_dataset_tarball_hash: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl BenchmarkRecord {
    /// Whether the benchmark's demo dataset ships already prepared.
    #[must_use]
    pub fn demo_dataset_already_prepared(&self) -> bool {
        self.metadata
            .get("demo_dataset_already_prepared")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CubeRecord {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub git_mlcube_url: Option<String>,
    #[serde(default)]
    pub mlcube_hash: Option<String>,
    #[serde(default)]
    pub git_parameters_url: Option<String>,
    #[serde(default)]
    pub parameters_hash: Option<String>,
    #[serde(default)]
    pub image_tarball_url: Option<String>,
    #[serde(default)]
    pub image_tarball_hash: Option<String>,
    #[serde(default)]
    pub additional_files_tarball_url: Option<String>,
    #[serde(default)]
    pub additional_files_tarball_hash: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CubeRecord {
    /// Placeholder record for a cube that only exists on the local disk.
    #[must_use]
    pub fn placeholder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Keep hashes computed locally for assets the server lists without one.
    pub fn inherit_hashes(&mut self, previous: &CubeRecord) {
        fn fill(slot: &mut Option<String>, previous: Option<&String>) {
            if slot.as_deref().map_or(true, str::is_empty) {
                if let Some(value) = previous.filter(|value| !value.is_empty()) {
                    *slot = Some(value.clone());
                }
            }
        }
        fill(&mut self.mlcube_hash, previous.mlcube_hash.as_ref());
        fill(&mut self.parameters_hash, previous.parameters_hash.as_ref());
        fill(&mut self.image_tarball_hash, previous.image_tarball_hash.as_ref());
        fill(
            &mut self.additional_files_tarball_hash,
            previous.additional_files_tarball_hash.as_ref(),
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub generated_uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "id_string")]
    pub data_preparation_mlcube: String,
    #[serde(default)]
    pub input_data_hash: Option<String>,
    /// Prepared data directory.
    #[serde(default)]
    pub data_path: Option<PathBuf>,
    /// Prepared labels directory.
    #[serde(default)]
    pub labels_path: Option<PathBuf>,
    #[serde(default)]
    pub submitted_as_prepared: bool,
}
