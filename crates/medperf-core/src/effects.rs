//! Seams to the collaborators the pipeline drives: metadata retrieval,
//! data preparation and the execution sandbox.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::comms::RestMetadataClient;
use crate::config::Config;
use crate::cube::Cube;
use crate::entities::{BenchmarkRecord, CubeRecord, DatasetRecord};
use crate::sandbox::{MlcubePreparation, MlcubeSandbox};

/// Result payload produced by an evaluator.
pub type Results = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSummary {
    pub results: Results,
    pub partial: bool,
}

/// Input handed to the data-preparation step.
#[derive(Debug, Clone, Copy)]
pub struct PreparationRequest<'a> {
    pub cube: &'a Cube,
    pub data_path: &'a Path,
    pub labels_path: &'a Path,
    pub metadata_path: Option<&'a Path>,
    pub skip_preparation: bool,
}

pub trait MetadataClient: Send + Sync {
    fn get_benchmark(&self, id: u64, local_only: bool) -> Result<BenchmarkRecord>;
    fn get_cube(&self, id: &str, local_only: bool) -> Result<CubeRecord>;
    fn get_dataset(&self, uid: &str, local_only: bool) -> Result<DatasetRecord>;
}

pub trait ExecutionSandbox: Send + Sync {
    /// Run the model then the evaluator against a prepared dataset.
    fn execute(
        &self,
        dataset: &DatasetRecord,
        model: &Cube,
        evaluator: &Cube,
        ignore_model_errors: bool,
    ) -> Result<ExecutionSummary>;
}

pub trait DataPreparation: Send + Sync {
    /// Prepare raw data and return the prepared dataset hash.
    fn prepare(&self, request: &PreparationRequest<'_>) -> Result<String>;
}

pub trait Effects: Send + Sync {
    fn metadata(&self) -> &dyn MetadataClient;
    fn preparation(&self) -> &dyn DataPreparation;
    fn sandbox(&self) -> &dyn ExecutionSandbox;
}

pub type SharedEffects = Arc<dyn Effects>;

pub struct SystemEffects {
    metadata: Arc<RestMetadataClient>,
    preparation: Arc<MlcubePreparation>,
    sandbox: Arc<MlcubeSandbox>,
}

impl SystemEffects {
    /// Wire the REST client and mlcube runner from configuration.
    ///
    /// # Errors
    /// Returns an error when the http client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            metadata: Arc::new(RestMetadataClient::from_config(config)?),
            preparation: Arc::new(MlcubePreparation::new(
                config.sandbox().clone(),
                config.storage().clone(),
            )),
            sandbox: Arc::new(MlcubeSandbox::new(
                config.sandbox().clone(),
                config.storage().cache_layout().tmp,
            )),
        })
    }
}

impl Effects for SystemEffects {
    fn metadata(&self) -> &dyn MetadataClient {
        self.metadata.as_ref()
    }

    fn preparation(&self) -> &dyn DataPreparation {
        self.preparation.as_ref()
    }

    fn sandbox(&self) -> &dyn ExecutionSandbox {
        self.sandbox.as_ref()
    }
}
