//! Command handlers: load inputs, call the pipeline, print JSON.
use crate::analyzer::StaticAnalyzer;
use crate::cli::{AnalyzeArgs, EnvArgs, GlobalArgs, OutputsArgs, RunArgs, SealArgs, VerifyArgs};
use crate::config::{load_config, SealConfig, CONFIG_ENV};
use crate::datasets::PythonDsl;
use crate::environment::{write_manifest, EnvironmentDescriptor};
use crate::error::read_text;
use crate::script::{self, ScriptRecord};
use crate::service::ToolchainService;
use crate::util::{display_path, sha256_hex};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Config from `--config`, else `$SSEAL_CONFIG`, else defaults.
pub fn resolve_config(global: &GlobalArgs) -> Result<SealConfig> {
    let path = global
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    load_config(path.as_deref()).with_context(|| match &path {
        Some(path) => format!("load config {}", path.display()),
        None => "load default config".to_string(),
    })
}

fn print_json<T: Serialize>(value: &T, label: &str) -> Result<()> {
    let text = serde_json::to_string_pretty(value).with_context(|| format!("serialize {label}"))?;
    println!("{text}");
    Ok(())
}

fn script_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("script path {} has no file name", path.display()))
}

fn dsl(config: &SealConfig) -> Result<PythonDsl> {
    PythonDsl::new(&config.dsl).context("configure dataset DSL")
}

pub fn run_analyze(args: AnalyzeArgs, config: &SealConfig) -> Result<()> {
    let text = read_text(&args.script)?;
    let mut flags = config.flags.clone();
    flags.detect_dependencies |= args.detect_dependencies;
    flags.detect_input_datasets |= args.detect_input_datasets;
    flags.parse_environment |= args.parse_environment;
    let dsl = dsl(config)?;
    let report = StaticAnalyzer::new(flags, &dsl)
        .run(&text, !args.no_detect_config)
        .with_context(|| format!("analyze {}", args.script.display()))?;
    print_json(&report, "analysis report")
}

pub fn run_outputs(args: OutputsArgs, config: &SealConfig) -> Result<()> {
    let text = read_text(&args.script)?;
    let filename = script_name(&args.script)?;
    let dsl = dsl(config)?;
    let service = ToolchainService::new(config.service.clone());
    let extraction = script::extract_outputs(&filename, &text, config, &dsl, &service)
        .with_context(|| format!("extract outputs of {}", args.script.display()))?;
    let registrations: serde_json::Map<String, serde_json::Value> = extraction
        .ledger
        .symbols()
        .map(|symbol| {
            (
                symbol.to_string(),
                json!({
                    "latest": extraction.ledger.latest(symbol),
                    "history": extraction.ledger.history(symbol),
                }),
            )
        })
        .collect();
    print_json(
        &json!({
            "datasets": extraction.datasets,
            "registrations": registrations,
        }),
        "exported datasets",
    )
}

pub fn run_env(args: EnvArgs, config: &SealConfig) -> Result<()> {
    let descriptor = match &args.load {
        Some(path) => EnvironmentDescriptor::load(args.ecosystem, path)
            .with_context(|| format!("load environment from {}", path.display()))?,
        None => EnvironmentDescriptor::from_dependencies(args.ecosystem, &args.deps, &config.project)
            .context("synthesize environment")?,
    };
    if let Some(dir) = &args.write {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        for path in write_manifest(&descriptor, dir)? {
            eprintln!("wrote {}", display_path(&path, Some(dir)));
        }
    }
    print_json(&descriptor, "environment descriptor")
}

pub fn run_run(args: RunArgs, config: &SealConfig) -> Result<()> {
    let record = ScriptRecord::read(&args.record)
        .with_context(|| format!("load record {}", args.record.display()))?;
    let service = ToolchainService::new(config.service.clone());
    let result = record
        .run(&service, args.target.as_deref())
        .with_context(|| format!("run {}", record.filename()))?;
    let success = result.is_success();
    let workspace = if args.keep || !result.workspace.is_temporary() {
        Some(result.workspace.keep())
    } else {
        None
    };
    print_json(
        &json!({
            "outcome": result.outcome,
            "products": result.products,
            "workspace": workspace,
        }),
        "execution result",
    )?;
    if !success {
        return Err(anyhow!("{} failed", record.filename()));
    }
    Ok(())
}

pub fn run_seal(args: SealArgs, config: &SealConfig) -> Result<()> {
    let text = read_text(&args.script)?;
    let filename = script_name(&args.script)?;
    let dsl = dsl(config)?;
    let service = ToolchainService::new(config.service.clone());
    let sealed = script::from_source(&filename, &text, config, &dsl, &service, args.target.as_deref())
        .with_context(|| format!("seal {}", args.script.display()))?;
    let json = sealed.record.to_json()?;
    match &args.out {
        Some(out) => {
            std::fs::write(out, format!("{json}\n")).with_context(|| format!("write {}", out.display()))?;
            eprintln!("wrote {}", out.display());
        }
        None => println!("{json}"),
    }
    if args.keep || !sealed.workspace.is_temporary() {
        let root = sealed.workspace.keep();
        eprintln!("artifacts kept in {}", root.display());
    }
    Ok(())
}

pub fn run_verify(args: VerifyArgs) -> Result<()> {
    let record = ScriptRecord::read(&args.record)
        .with_context(|| format!("load record {}", args.record.display()))?;
    let identities = script::verify_artifacts(&record, &args.artifacts)
        .with_context(|| format!("verify {}", args.record.display()))?;
    let verified: Vec<String> = identities.iter().map(ToString::to_string).collect();
    print_json(
        &json!({
            "script": record.filename(),
            "source_sha256": sha256_hex(record.contents().as_bytes()),
            "modified_epoch_ms": record.modified_epoch_ms(),
            "environment_checksum": record.environment().checksum(),
            "dependencies": record.environment().dependencies(),
            "consumes": record.consumes(),
            "datasets": record.extra().and_then(|extra| extra.get("datasets")),
            "verified": verified,
        }),
        "verification report",
    )
}
