use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn help_lists_test_run_flags() {
    let output = cargo_bin_cmd!("medperf")
        .args(["test", "run", "--help"])
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--benchmark",
        "--data-preparation",
        "--model",
        "--evaluator",
        "--demo-url",
        "--data-uid",
        "--no-cache",
        "--offline",
    ] {
        assert!(stdout.contains(flag), "missing {flag} in help output");
    }
}

#[test]
fn conflicting_data_sources_exit_with_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cargo_bin_cmd!("medperf")
        .env("MEDPERF_STORAGE", temp.path())
        .args([
            "test",
            "run",
            "-b",
            "1",
            "--data-uid",
            "abc",
            "--demo-url",
            "https://example.invalid/demo.tar.gz",
        ])
        .assert()
        .code(1)
        .get_output()
        .clone();
    assert!(stderr_of(&output).contains("only one data source"));
}

#[test]
fn missing_evaluator_reports_json_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cargo_bin_cmd!("medperf")
        .args(["--json", "--storage"])
        .arg(temp.path())
        .args(["test", "run", "-m", "2", "--data-uid", "abc"])
        .assert()
        .code(1)
        .get_output()
        .clone();
    let payload: Value = serde_json::from_slice(&output.stdout).expect("json payload");
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["kind"], "invalid_argument");
    assert!(payload["message"]
        .as_str()
        .is_some_and(|message| message.contains("metrics mlcube")));
}

#[test]
fn offline_run_without_mirrored_benchmark_fails_cleanly() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cargo_bin_cmd!("medperf")
        .env("MEDPERF_STORAGE", temp.path())
        .env("MEDPERF_SERVER", "http://127.0.0.1:9")
        .args(["test", "run", "-b", "42", "--offline"])
        .assert()
        .code(1)
        .get_output()
        .clone();
    assert!(stderr_of(&output).contains("not available locally"));
}
