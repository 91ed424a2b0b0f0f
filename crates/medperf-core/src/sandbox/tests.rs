use std::fs;

use super::*;
use crate::entities::CubeRecord;
use crate::error::{error_kind, FailureKind};

fn cube_at(dir: &Path, id: &str) -> Cube {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("mlcube.yaml"), format!("name: {id}\n")).unwrap();
    Cube::new(CubeRecord::placeholder(id, id), dir.to_path_buf())
}

fn dataset(root: &Path) -> DatasetRecord {
    let data = root.join("prepared/data");
    let labels = root.join("prepared/labels");
    fs::create_dir_all(&data).unwrap();
    fs::create_dir_all(&labels).unwrap();
    DatasetRecord {
        generated_uid: "d1".into(),
        name: "test".into(),
        data_preparation_mlcube: "1".into(),
        input_data_hash: None,
        data_path: Some(data),
        labels_path: Some(labels),
        submitted_as_prepared: false,
    }
}

/// Stand-in runner: fails inference for cubes containing a `fail` file and
/// writes fixed metrics on evaluation.
#[cfg(unix)]
fn fake_runner(dir: &Path) -> SandboxConfig {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-mlcube");
    fs::write(
        &script,
        r#"#!/bin/sh
task=""; cube=""; out=""
for arg in "$@"; do
  case "$arg" in
    --task=*) task="${arg#--task=}" ;;
    --mlcube=*) cube="${arg#--mlcube=}" ;;
    output_path=*) out="${arg#output_path=}" ;;
  esac
done
if [ -f "$cube/fail" ]; then
  echo "cube exploded" >&2
  exit 3
fi
case "$task" in
  evaluate) printf 'dice: 0.75\nper_case:\n  case1: 0.7\n' > "$out" ;;
  *) mkdir -p "$out" ;;
esac
"#,
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    SandboxConfig {
        runner: script.to_string_lossy().into_owned(),
        platform: "docker".into(),
    }
}

#[cfg(unix)]
#[test]
fn runs_inference_then_evaluation() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let sandbox = MlcubeSandbox::new(fake_runner(temp.path()), temp.path().join("tmp"));
    let model = cube_at(&temp.path().join("cubes/2"), "2");
    let evaluator = cube_at(&temp.path().join("cubes/3"), "3");

    let summary = sandbox.execute(&dataset(temp.path()), &model, &evaluator, false)?;
    assert!(!summary.partial);
    assert_eq!(summary.results["dice"], serde_json::json!(0.75));
    assert_eq!(summary.results["per_case"]["case1"], serde_json::json!(0.7));
    Ok(())
}

#[cfg(unix)]
#[test]
fn model_failure_is_partial_only_when_ignored() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let sandbox = MlcubeSandbox::new(fake_runner(temp.path()), temp.path().join("tmp"));
    let model = cube_at(&temp.path().join("cubes/2"), "2");
    fs::write(model.path().join("fail"), "")?;
    let evaluator = cube_at(&temp.path().join("cubes/3"), "3");
    let data = dataset(temp.path());

    let err = sandbox.execute(&data, &model, &evaluator, false).unwrap_err();
    assert_eq!(error_kind(&err), FailureKind::Execution);
    assert!(err.to_string().contains("cube exploded"), "{err}");

    let summary = sandbox.execute(&data, &model, &evaluator, true)?;
    assert!(summary.partial);
    Ok(())
}

#[cfg(unix)]
#[test]
fn evaluator_failure_is_always_fatal() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let sandbox = MlcubeSandbox::new(fake_runner(temp.path()), temp.path().join("tmp"));
    let model = cube_at(&temp.path().join("cubes/2"), "2");
    let evaluator = cube_at(&temp.path().join("cubes/3"), "3");
    fs::write(evaluator.path().join("fail"), "")?;

    let err = sandbox
        .execute(&dataset(temp.path()), &model, &evaluator, true)
        .unwrap_err();
    assert_eq!(error_kind(&err), FailureKind::Execution);
    Ok(())
}

#[test]
fn cube_without_manifest_is_invalid_entity() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let sandbox = MlcubeSandbox::new(
        SandboxConfig {
            runner: "mlcube".into(),
            platform: "docker".into(),
        },
        temp.path().join("tmp"),
    );
    let model = Cube::new(CubeRecord::placeholder("2", "2"), temp.path().join("empty"));
    let evaluator = cube_at(&temp.path().join("cubes/3"), "3");

    let err = sandbox
        .execute(&dataset(temp.path()), &model, &evaluator, false)
        .unwrap_err();
    assert_eq!(error_kind(&err), FailureKind::InvalidEntity);
    Ok(())
}

#[test]
fn prepared_hash_follows_input_contents() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let data = temp.path().join("data");
    let labels = temp.path().join("labels");
    fs::create_dir_all(data.join("nested"))?;
    fs::create_dir_all(&labels)?;
    fs::write(data.join("case1.txt"), "scan")?;
    fs::write(data.join("nested/case2.txt"), "scan")?;
    fs::write(labels.join("case1.txt"), "mask")?;

    let first = prepared_hash("1", &data, &labels, None)?;
    assert_eq!(first.len(), 64);
    assert_eq!(first, prepared_hash("1", &data, &labels, None)?);
    assert_ne!(first, prepared_hash("2", &data, &labels, None)?);
    assert_ne!(first, prepared_hash("1", &data, &labels, Some(labels.as_path()))?);

    // Identical bytes at another location are the same dataset.
    let copy = temp.path().join("copy");
    fs::create_dir_all(copy.join("nested"))?;
    fs::write(copy.join("case1.txt"), "scan")?;
    fs::write(copy.join("nested/case2.txt"), "scan")?;
    assert_eq!(first, prepared_hash("1", &copy, &labels, None)?);

    fs::write(data.join("nested/case2.txt"), "rescanned")?;
    assert_ne!(first, prepared_hash("1", &data, &labels, None)?);
    fs::rename(data.join("case1.txt"), data.join("case3.txt"))?;
    let renamed = prepared_hash("1", &data, &labels, None)?;
    fs::rename(data.join("case3.txt"), data.join("case1.txt"))?;
    assert_ne!(renamed, prepared_hash("1", &data, &labels, None)?);
    Ok(())
}

#[test]
fn prepared_hash_rejects_missing_inputs() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let err = prepared_hash("1", &temp.path().join("absent"), temp.path(), None).unwrap_err();
    assert_eq!(error_kind(&err), FailureKind::InvalidArgument);
    Ok(())
}

#[cfg(unix)]
#[test]
fn skipped_preparation_links_inputs_and_is_reused() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let storage = StorageConfig::new(temp.path().join("storage"));
    let preparation = MlcubePreparation::new(
        SandboxConfig {
            runner: "/nonexistent/mlcube".into(),
            platform: "docker".into(),
        },
        storage.clone(),
    );
    let prep = cube_at(&temp.path().join("cubes/1"), "1");
    let raw_data = temp.path().join("raw/data");
    let raw_labels = temp.path().join("raw/labels");
    fs::create_dir_all(&raw_data)?;
    fs::create_dir_all(&raw_labels)?;
    let request = PreparationRequest {
        cube: &prep,
        data_path: &raw_data,
        labels_path: &raw_labels,
        metadata_path: None,
        skip_preparation: true,
    };

    let hash = preparation.prepare(&request)?;
    let record = RecordStore::new(storage.clone())
        .load_dataset(&hash)?
        .expect("dataset record");
    assert!(record.submitted_as_prepared);
    let data_out = record.data_path.expect("data path");
    assert_eq!(fs::read_link(&data_out)?, raw_data.canonicalize()?);

    // The runner does not exist, so a second prepare only succeeds by reuse.
    let again = preparation.prepare(&PreparationRequest {
        skip_preparation: false,
        ..request
    })?;
    assert_eq!(again, hash);

    fs::write(raw_data.join("case1.txt"), "new scan")?;
    let changed = preparation.prepare(&request)?;
    assert_ne!(changed, hash);
    Ok(())
}
