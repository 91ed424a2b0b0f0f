use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
pub(crate) use medperf_store::testing::{sha256_hex, tarball, MemorySource};
use serde_json::json;

use crate::config::StorageConfig;
use crate::cube::{is_synthetic, Cube};
use crate::effects::{
    DataPreparation, Effects, ExecutionSandbox, ExecutionSummary, MetadataClient,
    PreparationRequest, Results,
};
use crate::entities::{BenchmarkRecord, CubeRecord, DatasetRecord};
use crate::error::TestError;
use crate::records::RecordStore;
use crate::sandbox::prepared_hash;

/// Metadata served from memory; synthetic cubes and datasets come from the
/// local mirrors like the real client.
pub(crate) struct FakeMetadata {
    benchmarks: Mutex<HashMap<u64, BenchmarkRecord>>,
    cubes: Mutex<HashMap<String, CubeRecord>>,
    records: RecordStore,
}

impl FakeMetadata {
    pub(crate) fn add_benchmark(&self, record: BenchmarkRecord) {
        self.benchmarks.lock().unwrap().insert(record.id, record);
    }

    pub(crate) fn add_cube(&self, record: CubeRecord) {
        self.cubes.lock().unwrap().insert(record.id.clone(), record);
    }
}

fn not_found(what: String) -> anyhow::Error {
    TestError::InvalidArgument(format!("{what} was not found")).into()
}

impl MetadataClient for FakeMetadata {
    fn get_benchmark(&self, id: u64, _local_only: bool) -> Result<BenchmarkRecord> {
        self.benchmarks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(format!("benchmark {id}")))
    }

    fn get_cube(&self, id: &str, _local_only: bool) -> Result<CubeRecord> {
        if is_synthetic(id) {
            return self
                .records
                .load_cube(id)?
                .ok_or_else(|| not_found(format!("mlcube {id}")));
        }
        self.cubes
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(format!("mlcube {id}")))
    }

    fn get_dataset(&self, uid: &str, _local_only: bool) -> Result<DatasetRecord> {
        self.records
            .load_dataset(uid)?
            .ok_or_else(|| not_found(format!("dataset {uid}")))
    }
}

/// Records the requests it receives and writes a dataset record per call.
pub(crate) struct FakePreparation {
    storage: StorageConfig,
    records: RecordStore,
    pub(crate) requests: Mutex<Vec<(String, PathBuf, bool)>>,
}

impl FakePreparation {
    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl DataPreparation for FakePreparation {
    fn prepare(&self, request: &PreparationRequest<'_>) -> Result<String> {
        self.requests.lock().unwrap().push((
            request.cube.id().to_string(),
            request.data_path.to_path_buf(),
            request.skip_preparation,
        ));
        let hash = prepared_hash(
            request.cube.id(),
            request.data_path,
            request.labels_path,
            request.metadata_path,
        )?;
        let out = self.storage.dataset_dir(&hash);
        fs::create_dir_all(out.join("data"))?;
        fs::create_dir_all(out.join("labels"))?;
        self.records.save_dataset(
            &hash,
            &DatasetRecord {
                generated_uid: hash.clone(),
                name: "test".into(),
                data_preparation_mlcube: request.cube.id().to_string(),
                input_data_hash: None,
                data_path: Some(out.join("data")),
                labels_path: Some(out.join("labels")),
                submitted_as_prepared: request.skip_preparation,
            },
        )?;
        Ok(hash)
    }
}

/// Sandbox that counts executions and returns canned results.
#[derive(Default)]
pub(crate) struct FakeSandbox {
    executions: AtomicUsize,
    pub(crate) partial: AtomicBool,
    pub(crate) fail: AtomicBool,
}

impl FakeSandbox {
    pub(crate) fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl ExecutionSandbox for FakeSandbox {
    fn execute(
        &self,
        dataset: &DatasetRecord,
        model: &Cube,
        evaluator: &Cube,
        _ignore_model_errors: bool,
    ) -> Result<ExecutionSummary> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TestError::Execution(format!("mlcube {} crashed", evaluator.id())).into());
        }
        let mut results = Results::new();
        results.insert("dice".into(), json!(0.87));
        results.insert("model".into(), json!(model.id()));
        results.insert("dataset".into(), json!(dataset.generated_uid));
        Ok(ExecutionSummary {
            results,
            partial: self.partial.load(Ordering::SeqCst),
        })
    }
}

pub(crate) struct FakeEffects {
    pub(crate) metadata: FakeMetadata,
    pub(crate) preparation: FakePreparation,
    pub(crate) sandbox: FakeSandbox,
}

impl FakeEffects {
    pub(crate) fn new(storage: &StorageConfig) -> Self {
        let records = RecordStore::new(storage.clone());
        Self {
            metadata: FakeMetadata {
                benchmarks: Mutex::default(),
                cubes: Mutex::default(),
                records: records.clone(),
            },
            preparation: FakePreparation {
                storage: storage.clone(),
                records,
                requests: Mutex::default(),
            },
            sandbox: FakeSandbox::default(),
        }
    }
}

impl Effects for FakeEffects {
    fn metadata(&self) -> &dyn MetadataClient {
        &self.metadata
    }

    fn preparation(&self) -> &dyn DataPreparation {
        &self.preparation
    }

    fn sandbox(&self) -> &dyn ExecutionSandbox {
        &self.sandbox
    }
}

/// Registered cube record whose manifest is served from `source`.
pub(crate) fn registered_cube(source: &MemorySource, id: &str) -> CubeRecord {
    let manifest = format!("name: cube-{id}\n");
    source.insert(&format!("cube-{id}"), manifest.as_bytes());
    CubeRecord {
        git_mlcube_url: Some(format!("mem:cube-{id}")),
        mlcube_hash: Some(sha256_hex(manifest.as_bytes())),
        ..CubeRecord::placeholder(id, format!("cube-{id}"))
    }
}
