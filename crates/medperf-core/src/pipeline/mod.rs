//! The compatibility-test pipeline.
//!
//! Stages run in order and hand their output to the next one by value:
//! validate, resolve benchmark defaults, materialize cubes, materialize the
//! dataset, build the report shell, check for a cached report, execute and
//! persist. The first failing stage aborts the run.

use std::path::PathBuf;

use anyhow::Result;
use medperf_store::ResourceCache;
use tracing::info;

use crate::config::{Config, StorageConfig};
use crate::cube::{establish_cube, materialize_cube, Cube};
use crate::dataset::{download_demo_data, RawData};
use crate::effects::{PreparationRequest, Results, SharedEffects};
use crate::entities::DatasetRecord;
use crate::error::TestError;
use crate::records::RecordStore;
use crate::report::{ReportStore, TestReport};
use crate::resolver::{DataSource, TestParams};

#[derive(Debug, Clone, Default)]
pub struct TestRequest {
    pub params: TestParams,
    /// Ignore a previously stored report for the same inputs.
    pub no_cache: bool,
    /// Resolve records from local mirrors only.
    pub offline: bool,
    /// Treat the raw data as already prepared.
    pub skip_prep: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    /// Prepared dataset uid used for the run, supplied or generated.
    pub data_uid: String,
    pub results: Results,
    pub partial: bool,
    pub report_uid: String,
    /// Whether results came from a stored report.
    pub cached: bool,
}

/// Everything a run needs, assembled once per process.
pub struct TestContext {
    storage: StorageConfig,
    cache: ResourceCache,
    records: RecordStore,
    reports: ReportStore,
    effects: SharedEffects,
}

impl TestContext {
    #[must_use]
    pub fn new(storage: StorageConfig, cache: ResourceCache, effects: SharedEffects) -> Self {
        Self {
            records: RecordStore::new(storage.clone()),
            reports: ReportStore::new(storage.clone()),
            storage,
            cache,
            effects,
        }
    }

    /// Context over the configured storage and sources.
    ///
    /// # Errors
    /// Returns an error when the source registry cannot be built.
    pub fn from_config(config: &Config, effects: SharedEffects) -> Result<Self> {
        Ok(Self::new(
            config.storage().clone(),
            config.resource_cache()?,
            effects,
        ))
    }

    #[must_use]
    pub fn reports(&self) -> &ReportStore {
        &self.reports
    }
}

/// Inputs after benchmark defaults are applied.
#[derive(Debug, Clone)]
struct ResolvedInputs {
    benchmark: Option<u64>,
    data_prep: Option<String>,
    model: String,
    evaluator: String,
    data_path: Option<String>,
    labels_path: Option<String>,
    demo_url: Option<String>,
    demo_hash: Option<String>,
    data_uid: Option<String>,
    skip_prep: bool,
}

struct MaterializedCubes {
    data_prep: Option<String>,
    model: Cube,
    evaluator: Cube,
}

struct PreparedData {
    uid: String,
    record: DatasetRecord,
    demo_hash: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

/// Validate, resolve and run a compatibility test.
///
/// # Errors
/// Returns the first stage failure unchanged: invalid input combinations,
/// metadata lookups, integrity or retrieval failures while materializing,
/// preparation and execution errors.
pub fn resolve_and_run(ctx: &TestContext, request: &TestRequest) -> Result<TestOutcome> {
    info!("starting compatibility test");
    let source = request.params.validate()?;
    info!(data_source = %source, "inputs validated");

    let resolved = resolve_benchmark(ctx, request, source)?;
    let cubes = materialize_cubes(ctx, &resolved, source, request.offline)?;
    let data = materialize_dataset(ctx, &resolved, &cubes, source, request.offline)?;
    let mut report = initialize_report(&resolved, &cubes, &data);
    let report_uid = report.generated_uid();

    if !request.no_cache {
        if let Some(cached) = cached_report(ctx, &report_uid)? {
            info!(uid = %report_uid, "existing report found; skipping execution");
            return Ok(TestOutcome {
                data_uid: data.uid,
                partial: cached.partial,
                results: cached.results.unwrap_or_default(),
                report_uid,
                cached: true,
            });
        }
    }

    info!(uid = %report_uid, "executing test");
    let summary = ctx
        .effects
        .sandbox()
        .execute(&data.record, &cubes.model, &cubes.evaluator, false)?;
    report.set_results(summary)?;
    let path = ctx.reports.write(&report)?;
    info!(uid = %report_uid, path = %path.display(), "report written");

    Ok(TestOutcome {
        data_uid: data.uid,
        partial: report.partial,
        results: report.results.unwrap_or_default(),
        report_uid,
        cached: false,
    })
}

fn resolve_benchmark(
    ctx: &TestContext,
    request: &TestRequest,
    source: DataSource,
) -> Result<ResolvedInputs> {
    let params = &request.params;
    let mut data_prep = non_empty(params.data_prep.as_ref());
    let mut model = non_empty(params.model.as_ref());
    let mut evaluator = non_empty(params.evaluator.as_ref());
    let mut demo_url = non_empty(params.demo_url.as_ref());
    let mut demo_hash = non_empty(params.demo_hash.as_ref());
    let mut skip_prep = request.skip_prep;

    if let Some(id) = params.benchmark {
        let benchmark = ctx.effects.metadata().get_benchmark(id, request.offline)?;
        info!(benchmark = id, "applying benchmark defaults");
        if source != DataSource::Prepared {
            data_prep = data_prep.or_else(|| Some(benchmark.data_preparation_mlcube.to_string()));
        }
        model = model.or_else(|| Some(benchmark.reference_model_mlcube.to_string()));
        evaluator = evaluator.or_else(|| Some(benchmark.data_evaluator_mlcube.to_string()));
        if source == DataSource::Benchmark {
            demo_url = non_empty(benchmark.demo_dataset_tarball_url.as_ref());
            demo_hash = non_empty(benchmark.demo_dataset_tarball_hash.as_ref());
            skip_prep = skip_prep || benchmark.demo_dataset_already_prepared();
            if demo_url.is_none() {
                return Err(TestError::invalid_entity(format!(
                    "benchmark {id} does not provide a demo dataset"
                ))
                .into());
            }
        }
    }

    let missing = |what: &str| -> anyhow::Error {
        TestError::invalid_argument(format!("no {what} mlcube could be resolved")).into()
    };
    Ok(ResolvedInputs {
        benchmark: params.benchmark,
        data_prep,
        model: model.ok_or_else(|| missing("model"))?,
        evaluator: evaluator.ok_or_else(|| missing("evaluator"))?,
        data_path: non_empty(params.data_path.as_ref()),
        labels_path: non_empty(params.labels_path.as_ref()),
        demo_url,
        demo_hash,
        data_uid: non_empty(params.data_uid.as_ref()),
        skip_prep,
    })
}

fn materialize_cubes(
    ctx: &TestContext,
    resolved: &ResolvedInputs,
    source: DataSource,
    offline: bool,
) -> Result<MaterializedCubes> {
    let data_prep = match (&resolved.data_prep, source) {
        (_, DataSource::Prepared) | (None, _) => None,
        (Some(reference), _) => {
            info!(reference = %reference, "establishing data preparation mlcube");
            Some(establish_cube(reference, &ctx.storage, &ctx.records)?)
        }
    };
    info!(reference = %resolved.model, "establishing model mlcube");
    let model_id = establish_cube(&resolved.model, &ctx.storage, &ctx.records)?;
    info!(reference = %resolved.evaluator, "establishing evaluator mlcube");
    let evaluator_id = establish_cube(&resolved.evaluator, &ctx.storage, &ctx.records)?;

    let model = fetch_cube(ctx, &model_id, offline)?;
    let evaluator = fetch_cube(ctx, &evaluator_id, offline)?;
    Ok(MaterializedCubes {
        data_prep,
        model,
        evaluator,
    })
}

fn fetch_cube(ctx: &TestContext, id: &str, offline: bool) -> Result<Cube> {
    materialize_cube(
        id,
        offline,
        ctx.effects.metadata(),
        &ctx.cache,
        &ctx.storage,
        &ctx.records,
    )
}

fn materialize_dataset(
    ctx: &TestContext,
    resolved: &ResolvedInputs,
    cubes: &MaterializedCubes,
    source: DataSource,
    offline: bool,
) -> Result<PreparedData> {
    let mut demo_hash = resolved.demo_hash.clone();
    let uid = match source {
        DataSource::Prepared => resolved
            .data_uid
            .clone()
            .ok_or_else(|| TestError::invalid_argument("a prepared dataset uid is required"))?,
        DataSource::RawPath | DataSource::Demo | DataSource::Benchmark => {
            let raw = if source == DataSource::RawPath {
                raw_path_inputs(resolved)?
            } else {
                let url = resolved.demo_url.as_deref().ok_or_else(|| {
                    TestError::invalid_argument("a demo dataset url is required")
                })?;
                let (raw, hash) = download_demo_data(&ctx.cache, url, demo_hash.as_deref())?;
                demo_hash = Some(hash);
                raw
            };
            let prep_id = cubes.data_prep.as_deref().ok_or_else(|| {
                TestError::invalid_argument("a data preparation mlcube is required")
            })?;
            let prep_cube = fetch_cube(ctx, prep_id, offline)?;
            ctx.effects.preparation().prepare(&PreparationRequest {
                cube: &prep_cube,
                data_path: &raw.data_path,
                labels_path: &raw.labels_path,
                metadata_path: raw.metadata_path.as_deref(),
                skip_preparation: resolved.skip_prep,
            })?
        }
    };
    info!(%uid, "dataset established");
    let record = ctx.effects.metadata().get_dataset(&uid, offline)?;
    Ok(PreparedData {
        uid,
        record,
        demo_hash,
    })
}

fn raw_path_inputs(resolved: &ResolvedInputs) -> Result<RawData> {
    let (Some(data_path), Some(labels_path)) = (&resolved.data_path, &resolved.labels_path) else {
        return Err(TestError::invalid_argument("data and labels paths are required").into());
    };
    Ok(RawData {
        data_path: PathBuf::from(data_path),
        labels_path: PathBuf::from(labels_path),
        metadata_path: None,
    })
}

fn initialize_report(
    resolved: &ResolvedInputs,
    cubes: &MaterializedCubes,
    data: &PreparedData,
) -> TestReport {
    TestReport {
        benchmark: resolved.benchmark,
        demo_dataset_url: resolved.demo_url.clone(),
        demo_dataset_hash: data.demo_hash.clone(),
        data_path: resolved.data_path.clone(),
        labels_path: resolved.labels_path.clone(),
        prepared_data_hash: data.record.generated_uid.clone(),
        data_preparation_mlcube: cubes.data_prep.clone(),
        model: cubes.model.id().to_string(),
        data_evaluator_mlcube: cubes.evaluator.id().to_string(),
        results: None,
        partial: false,
        created_at: None,
    }
}

fn cached_report(ctx: &TestContext, uid: &str) -> Result<Option<TestReport>> {
    Ok(ctx
        .reports
        .load(uid)?
        .filter(|report| report.results.is_some()))
}
