use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use medperf_core::{TestParams, TestRequest};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run compatibility tests for medperf benchmarks and mlcubes"
)]
pub struct MedperfCli {
    #[arg(
        long,
        help = "Storage root (overrides MEDPERF_STORAGE)",
        global = true
    )]
    pub storage: Option<PathBuf>,
    #[arg(long, help = "Emit machine-readable JSON", global = true)]
    pub json: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v", global = true)]
    pub trace: bool,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    /// Compatibility tests
    #[command(subcommand)]
    Test(TestCommand),
}

#[derive(Subcommand, Debug)]
pub enum TestCommand {
    /// Run a compatibility test for a benchmark or a set of mlcubes
    Run(TestRunArgs),
}

#[derive(Args, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct TestRunArgs {
    #[arg(short = 'b', long, help = "Benchmark id supplying default mlcubes and demo data")]
    pub benchmark: Option<u64>,
    #[arg(
        short = 'p',
        long = "data-preparation",
        help = "Data preparation mlcube id or local path"
    )]
    pub data_preparation: Option<String>,
    #[arg(short = 'm', long, help = "Model mlcube id or local path")]
    pub model: Option<String>,
    #[arg(short = 'e', long, help = "Evaluator mlcube id or local path")]
    pub evaluator: Option<String>,
    #[arg(short = 'd', long, help = "Path to raw data")]
    pub data_path: Option<String>,
    #[arg(short = 'l', long, help = "Path to the labels of the raw data")]
    pub labels_path: Option<String>,
    #[arg(long, help = "Demo dataset tarball url or <source>:<identifier>")]
    pub demo_url: Option<String>,
    #[arg(long, help = "Expected sha256 of the demo dataset tarball")]
    pub demo_hash: Option<String>,
    #[arg(long, help = "Prepared dataset uid")]
    pub data_uid: Option<String>,
    #[arg(long, help = "Execute even when a report for these inputs exists")]
    pub no_cache: bool,
    #[arg(long, help = "Use only locally mirrored records")]
    pub offline: bool,
    #[arg(long, help = "Treat the raw data as already prepared")]
    pub skip_prep: bool,
}

impl TestRunArgs {
    pub fn to_request(&self) -> TestRequest {
        TestRequest {
            params: TestParams {
                benchmark: self.benchmark,
                data_prep: self.data_preparation.clone(),
                model: self.model.clone(),
                evaluator: self.evaluator.clone(),
                data_path: self.data_path.clone(),
                labels_path: self.labels_path.clone(),
                demo_url: self.demo_url.clone(),
                demo_hash: self.demo_hash.clone(),
                data_uid: self.data_uid.clone(),
            },
            no_cache: self.no_cache,
            offline: self.offline,
            skip_prep: self.skip_prep,
        }
    }
}
