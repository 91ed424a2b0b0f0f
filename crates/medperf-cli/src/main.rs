use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use medperf_core::{
    error_kind, resolve_and_run, Config, FailureKind, SharedEffects, SystemEffects, TestContext,
    TestOutcome,
};
use serde_json::json;

mod cli;

use cli::{CommandGroupCli, MedperfCli, TestCommand, TestRunArgs};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = MedperfCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let code = match dispatch(&cli) {
        Ok(()) => 0,
        Err(err) => report_error(&cli, &err),
    };
    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!(
        "medperf={level},medperf_cli={level},medperf_core={level},medperf_store={level}"
    );
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn dispatch(cli: &MedperfCli) -> anyhow::Result<()> {
    match &cli.command {
        CommandGroupCli::Test(TestCommand::Run(args)) => run_test(cli, args),
    }
}

fn run_test(cli: &MedperfCli, args: &TestRunArgs) -> anyhow::Result<()> {
    let request = args.to_request();
    let mut config = Config::from_env()?;
    if let Some(storage) = &cli.storage {
        config = config.with_storage_root(storage);
    }
    let effects: SharedEffects = Arc::new(SystemEffects::from_config(&config)?);
    let ctx = TestContext::from_config(&config, effects)?;
    let outcome = resolve_and_run(&ctx, &request)?;
    emit_outcome(cli.json, &outcome)
}

fn emit_outcome(json: bool, outcome: &TestOutcome) -> anyhow::Result<()> {
    if json {
        let payload = json!({
            "status": "ok",
            "data_uid": outcome.data_uid,
            "report_uid": outcome.report_uid,
            "cached": outcome.cached,
            "partial": outcome.partial,
            "results": outcome.results,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    println!("Prepared dataset: {}", outcome.data_uid);
    let origin = if outcome.cached { " (cached)" } else { "" };
    println!("Report: {}{origin}", outcome.report_uid);
    if outcome.partial {
        println!("Results are partial: the model failed on some inputs");
    }
    println!("{}", serde_json::to_string_pretty(&outcome.results)?);
    Ok(())
}

/// Print the failure and map it to an exit code: 1 for invalid input, 2 otherwise.
fn report_error(cli: &MedperfCli, err: &anyhow::Error) -> i32 {
    let kind = error_kind(err);
    let code = if kind == FailureKind::InvalidArgument {
        1
    } else {
        2
    };
    if cli.json {
        let payload = json!({
            "status": "error",
            "kind": kind.as_str(),
            "message": format!("{err:#}"),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
        );
    } else {
        eprintln!("error: {err:#}");
    }
    code
}
