use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod analyzer;
mod cli;
mod config;
mod datasets;
mod deps;
mod directive;
mod environment;
mod error;
mod identity;
mod script;
mod service;
mod source;
mod util;
mod workflow;
mod workspace;

use cli::{Command, RootArgs};
use error::{ErrorKind, ScriptError};

const LOG_ENV: &str = "SSEAL_LOG";

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Exit status per error family.
fn exit_status(err: &anyhow::Error) -> u8 {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ScriptError>())
        .map(ScriptError::kind);
    match kind {
        Some(ErrorKind::Configuration) => 2,
        Some(ErrorKind::Collision) => 3,
        Some(ErrorKind::Discovery) => 4,
        Some(ErrorKind::Execution) => 5,
        Some(ErrorKind::Artifact) => 6,
        Some(ErrorKind::Environment) => 7,
        Some(ErrorKind::Io) | None => 1,
    }
}

fn run(args: RootArgs) -> Result<()> {
    let config = workflow::resolve_config(&args.global)?;
    match args.command {
        Command::Analyze(cmd) => workflow::run_analyze(cmd, &config),
        Command::Outputs(cmd) => workflow::run_outputs(cmd, &config),
        Command::Env(cmd) => workflow::run_env(cmd, &config),
        Command::Run(cmd) => workflow::run_run(cmd, &config),
        Command::Seal(cmd) => workflow::run_seal(cmd, &config),
        Command::Verify(cmd) => workflow::run_verify(cmd),
    }
}

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.global.verbose);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}
