//! `mlcube`-backed execution sandbox and data preparation.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use medperf_store::compute_sha256;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{SandboxConfig, StorageConfig};
use crate::cube::Cube;
use crate::effects::{
    DataPreparation, ExecutionSandbox, ExecutionSummary, PreparationRequest, Results,
};
use crate::entities::DatasetRecord;
use crate::error::TestError;
use crate::records::RecordStore;

const RESULTS_FILENAME: &str = "results.yaml";
const STDERR_TAIL: usize = 2000;

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    fn stderr_tail(&self) -> &str {
        let start = self.stderr.len().saturating_sub(STDERR_TAIL);
        let start = (start..self.stderr.len())
            .find(|index| self.stderr.is_char_boundary(*index))
            .unwrap_or(self.stderr.len());
        self.stderr[start..].trim()
    }
}

fn require_manifest(cube: &Cube) -> Result<()> {
    if cube.manifest_path().is_file() {
        Ok(())
    } else {
        Err(TestError::invalid_entity(format!(
            "mlcube {} has no manifest at {}",
            cube.id(),
            cube.manifest_path().display()
        ))
        .into())
    }
}

/// Run one cube task and capture its output.
fn run_task(
    config: &SandboxConfig,
    cube: &Cube,
    task: &str,
    params: &[(&str, &Path)],
) -> Result<RunOutput> {
    let mut args = vec![
        "run".to_string(),
        format!("--mlcube={}", cube.path().display()),
        format!("--task={task}"),
        format!("--platform={}", config.platform),
    ];
    if let Some(params_file) = cube.params_path() {
        args.push(format!("parameters_file={}", params_file.display()));
    }
    args.extend(
        params
            .iter()
            .map(|(key, value)| format!("{key}={}", value.display())),
    );
    debug!(runner = %config.runner, ?args, "running mlcube task");
    let output = Command::new(&config.runner)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to start {}", config.runner))?;
    let output = RunOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(task, code = output.code, stdout = %output.stdout.trim(), "mlcube task finished");
    Ok(output)
}

fn task_failure(cube: &Cube, task: &str, output: &RunOutput) -> anyhow::Error {
    TestError::Execution(format!(
        "mlcube {} failed the {task} task (exit code {}): {}",
        cube.id(),
        output.code,
        output.stderr_tail()
    ))
    .into()
}

pub struct MlcubeSandbox {
    config: SandboxConfig,
    scratch: PathBuf,
}

impl MlcubeSandbox {
    #[must_use]
    pub fn new(config: SandboxConfig, scratch: PathBuf) -> Self {
        Self { config, scratch }
    }
}

impl ExecutionSandbox for MlcubeSandbox {
    fn execute(
        &self,
        dataset: &DatasetRecord,
        model: &Cube,
        evaluator: &Cube,
        ignore_model_errors: bool,
    ) -> Result<ExecutionSummary> {
        require_manifest(model)?;
        require_manifest(evaluator)?;
        let (Some(data_path), Some(labels_path)) =
            (dataset.data_path.as_deref(), dataset.labels_path.as_deref())
        else {
            return Err(TestError::invalid_entity(format!(
                "dataset {} has no prepared data location",
                dataset.generated_uid
            ))
            .into());
        };

        fs::create_dir_all(&self.scratch)
            .with_context(|| format!("failed to create {}", self.scratch.display()))?;
        let workdir = tempfile::Builder::new()
            .prefix("execution-")
            .tempdir_in(&self.scratch)
            .with_context(|| format!("failed to create scratch in {}", self.scratch.display()))?;
        let predictions = workdir.path().join("predictions");
        fs::create_dir_all(&predictions)?;
        let results_file = workdir.path().join(RESULTS_FILENAME);

        info!(model = model.id(), "running inference");
        let inference = run_task(
            &self.config,
            model,
            "infer",
            &[("data_path", data_path), ("output_path", predictions.as_path())],
        )?;
        let mut partial = false;
        if inference.code != 0 {
            if !ignore_model_errors {
                return Err(task_failure(model, "infer", &inference));
            }
            warn!(model = model.id(), code = inference.code, "model failed; results are partial");
            partial = true;
        }

        info!(evaluator = evaluator.id(), "running evaluation");
        let evaluation = run_task(
            &self.config,
            evaluator,
            "evaluate",
            &[
                ("predictions", predictions.as_path()),
                ("labels", labels_path),
                ("output_path", results_file.as_path()),
            ],
        )?;
        if evaluation.code != 0 {
            return Err(task_failure(evaluator, "evaluate", &evaluation));
        }
        let contents = fs::read_to_string(&results_file).map_err(|_| {
            TestError::Execution(format!(
                "mlcube {} did not write {RESULTS_FILENAME}",
                evaluator.id()
            ))
        })?;
        let results: Results = serde_yaml::from_str(&contents).map_err(|err| {
            TestError::Execution(format!(
                "mlcube {} wrote malformed results: {err}",
                evaluator.id()
            ))
        })?;
        Ok(ExecutionSummary { results, partial })
    }
}

/// Hash identifying a prepared dataset by its preparation cube and the
/// contents of the raw inputs. Editing any input file changes the hash.
///
/// # Errors
/// Returns [`TestError::InvalidArgument`] when an input does not exist and
/// I/O errors while reading it.
pub fn prepared_hash(
    cube_id: &str,
    data_path: &Path,
    labels_path: &Path,
    metadata_path: Option<&Path>,
) -> Result<String> {
    let canonical = serde_json::json!({
        "data": tree_digest(data_path)?,
        "data_preparation_mlcube": cube_id,
        "labels": tree_digest(labels_path)?,
        "metadata": metadata_path.map(tree_digest).transpose()?,
    });
    Ok(hex::encode(Sha256::digest(canonical.to_string().as_bytes())))
}

/// Digest over every file below `root` (or `root` itself), keyed by the
/// relative path and visited in sorted order.
fn tree_digest(root: &Path) -> Result<String> {
    if !root.exists() {
        return Err(TestError::invalid_argument(format!(
            "raw input {} does not exist",
            root.display()
        ))
        .into());
    }
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(compute_sha256(entry.path())?.as_bytes());
        hasher.update([b'\n']);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub struct MlcubePreparation {
    config: SandboxConfig,
    storage: StorageConfig,
    records: RecordStore,
}

impl MlcubePreparation {
    #[must_use]
    pub fn new(config: SandboxConfig, storage: StorageConfig) -> Self {
        Self {
            config,
            records: RecordStore::new(storage.clone()),
            storage,
        }
    }
}

impl DataPreparation for MlcubePreparation {
    fn prepare(&self, request: &PreparationRequest<'_>) -> Result<String> {
        let hash = prepared_hash(
            request.cube.id(),
            request.data_path,
            request.labels_path,
            request.metadata_path,
        )?;
        if let Some(existing) = self.records.load_dataset(&hash)? {
            if existing.data_path.as_deref().is_some_and(Path::exists) {
                info!(%hash, "reusing prepared dataset");
                return Ok(hash);
            }
        }

        let out = self.storage.dataset_dir(&hash);
        let data_out = out.join("data");
        let labels_out = out.join("labels");
        fs::create_dir_all(&out).with_context(|| format!("failed to create {}", out.display()))?;
        if request.skip_preparation {
            info!(%hash, "linking raw data as already prepared");
            relink(request.data_path, &data_out)?;
            relink(request.labels_path, &labels_out)?;
        } else {
            require_manifest(request.cube)?;
            info!(cube = request.cube.id(), %hash, "preparing dataset");
            let mut params = vec![
                ("data_path", request.data_path),
                ("labels_path", request.labels_path),
                ("output_path", data_out.as_path()),
                ("output_labels_path", labels_out.as_path()),
            ];
            if let Some(metadata) = request.metadata_path {
                params.push(("metadata_path", metadata));
            }
            let output = run_task(&self.config, request.cube, "prepare", &params)?;
            if output.code != 0 {
                return Err(task_failure(request.cube, "prepare", &output));
            }
        }

        let record = DatasetRecord {
            generated_uid: hash.clone(),
            name: format!("test_{}", &hash[..8]),
            data_preparation_mlcube: request.cube.id().to_string(),
            input_data_hash: None,
            data_path: Some(data_out),
            labels_path: Some(labels_out),
            submitted_as_prepared: request.skip_preparation,
        };
        self.records.save_dataset(&hash, &record)?;
        Ok(hash)
    }
}

fn relink(target: &Path, link: &Path) -> Result<()> {
    if fs::symlink_metadata(link).is_ok() {
        fs::remove_file(link).with_context(|| format!("failed to replace {}", link.display()))?;
    }
    let target = target
        .canonicalize()
        .with_context(|| format!("raw input {} does not exist", target.display()))?;
    #[cfg(unix)]
    std::os::unix::fs::symlink(&target, link)
        .with_context(|| format!("failed to link {}", link.display()))?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_dir(&target, link)
        .with_context(|| format!("failed to link {}", link.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests;
