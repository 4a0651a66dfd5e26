//! CLI argument parsing for the sealing workflow.
use crate::environment::Ecosystem;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "sseal",
    version,
    about = "Content-addressed provenance sealing for data-transformation scripts",
    after_help = "Commands:\n  analyze <script>                       Static analysis report (JSON)\n  outputs <script>                       Recover produced datasets by running the registration prefix\n  env --ecosystem <eco> --deps a,b       Build a checksummed environment descriptor\n  run --record <file>                    Execute a script record\n  seal <script> --out <file>             Run, hash and seal a script's single output\n  verify --record <file> --artifacts <dir>  Re-hash sealed artifacts\n\nExamples:\n  sseal analyze transform.py --detect-dependencies\n  sseal seal transform.py --out transform.seal.json\n  sseal verify --record transform.seal.json --artifacts ./out",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// JSON config file (defaults to $SSEAL_CONFIG when set)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless SSEAL_LOG says otherwise
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Analyze(AnalyzeArgs),
    Outputs(OutputsArgs),
    Env(EnvArgs),
    Run(RunArgs),
    Seal(SealArgs),
    Verify(VerifyArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Statically analyze a script without running it")]
pub struct AnalyzeArgs {
    /// Script to analyze
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// Force dependency detection on
    #[arg(long)]
    pub detect_dependencies: bool,

    /// Force consumed-dataset detection on
    #[arg(long)]
    pub detect_input_datasets: bool,

    /// Require and report the `#^` environment pointer
    #[arg(long)]
    pub parse_environment: bool,

    /// Ignore `#%` directives in the script
    #[arg(long)]
    pub no_detect_config: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Recover produced datasets by running the registration prefix")]
pub struct OutputsArgs {
    /// Script to inspect
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,
}

#[derive(Parser, Debug)]
#[command(about = "Build a checksummed environment descriptor")]
pub struct EnvArgs {
    /// Ecosystem of the environment (python or r)
    #[arg(long, value_name = "ECOSYSTEM", default_value = "python")]
    pub ecosystem: Ecosystem,

    /// Comma-separated dependencies to synthesize a manifest from
    #[arg(long, value_name = "DEPS", value_delimiter = ',', conflicts_with = "load")]
    pub deps: Vec<String>,

    /// Existing manifest file or directory to load
    #[arg(long, value_name = "PATH")]
    pub load: Option<PathBuf>,

    /// Also write the manifest files into this directory
    #[arg(long, value_name = "DIR")]
    pub write: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Execute a script record and locate its products")]
pub struct RunArgs {
    /// Script record JSON
    #[arg(long, value_name = "FILE")]
    pub record: PathBuf,

    /// Workspace directory (temporary when omitted)
    #[arg(long, value_name = "DIR")]
    pub target: Option<PathBuf>,

    /// Keep the temporary workspace and report its path
    #[arg(long)]
    pub keep: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Run a script, hash what it produced and write the sealed record")]
pub struct SealArgs {
    /// Script to seal
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// Workspace directory (temporary when omitted)
    #[arg(long, value_name = "DIR")]
    pub target: Option<PathBuf>,

    /// Output path for the sealed record (stdout when omitted)
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Keep the temporary workspace and report its path
    #[arg(long)]
    pub keep: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Re-hash the sealed products of a record")]
pub struct VerifyArgs {
    /// Sealed script record JSON
    #[arg(long, value_name = "FILE")]
    pub record: PathBuf,

    /// Directory holding the artifacts
    #[arg(long, value_name = "DIR")]
    pub artifacts: PathBuf,
}
