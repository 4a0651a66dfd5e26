//! Two-phase sealing: run once to discover what the script produced, then
//! seal each artifact with its content hash.
use super::{ExecutionResult, ScriptRecord};
use crate::analyzer::StaticAnalyzer;
use crate::config::SealConfig;
use crate::datasets::dynamic::{self, OutputExtraction, PrefixRunner};
use crate::datasets::{parse_side_channel, DatasetDsl};
use crate::environment::{Ecosystem, EnvironmentDescriptor};
use crate::error::{read_text, ScriptError};
use crate::identity::{HashMethod, ProduceIdentity};
use crate::service::ExecutionService;
use crate::workspace::{contained_path, Workspace};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File the export stub writes the produced registrations to.
pub const SIDE_CHANNEL: &str = "__produces__.json";

const INSPECTION_SCRIPT: &str = "__sseal_inspect__.py";
const SEAL_METHOD: HashMethod = HashMethod::Sha1;

/// A sealed record plus the workspace holding its verified artifacts.
#[derive(Debug)]
pub struct SealedScript {
    pub record: ScriptRecord,
    pub artifacts: BTreeMap<String, PathBuf>,
    pub workspace: Workspace,
}

struct StaticFacts {
    dependencies: Vec<String>,
    consumes: Vec<String>,
    symbols: Vec<String>,
}

fn static_facts(
    filename: &str,
    contents: &str,
    config: &SealConfig,
    dsl: &dyn DatasetDsl,
) -> Result<StaticFacts, ScriptError> {
    if Ecosystem::from_script_name(filename) != Ecosystem::Python {
        return Err(ScriptError::Unsupported(format!(
            "sealing {filename} from source"
        )));
    }
    let report = StaticAnalyzer::new(config.flags.sealing_policy(), dsl).run(contents, false)?;
    let symbols = report
        .output_datasets
        .unwrap_or_default()
        .into_iter()
        .map(|record| record.symbol)
        .collect();
    Ok(StaticFacts {
        dependencies: report.dependencies.unwrap_or_default(),
        consumes: report.datasets.unwrap_or_default(),
        symbols,
    })
}

/// Seal `contents` by running it and hashing what it produced.
pub fn from_source(
    filename: &str,
    contents: &str,
    config: &SealConfig,
    dsl: &dyn DatasetDsl,
    service: &dyn ExecutionService,
    target: Option<&Path>,
) -> Result<SealedScript, ScriptError> {
    let facts = static_facts(filename, contents, config, dsl)?;
    if facts.symbols.is_empty() {
        return Err(ScriptError::NoRegistrations);
    }

    let instrumented = format!("{contents}{}", dsl.export_stub(&facts.symbols, SIDE_CHANNEL));
    let provisional = ScriptRecord::from_dependencies(
        filename,
        &instrumented,
        &facts.dependencies,
        vec![SIDE_CHANNEL.to_string()],
        facts.consumes.clone(),
        &config.project,
    )?;
    let ExecutionResult {
        outcome,
        products,
        workspace,
    } = provisional.run(service, target)?;
    if let Some(failure) = outcome.failure() {
        return Err(ScriptError::Execution(failure.clone()));
    }

    let side_channel = products.get(SIDE_CHANNEL).ok_or_else(|| ScriptError::ProductNotFound {
        product: SIDE_CHANNEL.to_string(),
    })?;
    let exported = parse_side_channel(&read_text(side_channel)?)?;

    let mut artifacts = BTreeMap::new();
    let mut produces = Vec::new();
    for dataset in &exported {
        let path = contained_path(workspace.path(), &dataset.filename, &dataset.code)?;
        if !path.is_file() {
            return Err(ScriptError::ProductNotFound {
                product: format!("{}({})", dataset.code, dataset.filename),
            });
        }
        let identity = ProduceIdentity::seal(&dataset.code, &dataset.filename, SEAL_METHOD, &path)?;
        tracing::info!(identity = %identity, "artifact sealed");
        artifacts.insert(identity.to_string(), path);
        produces.push(identity.to_string());
    }

    let record = ScriptRecord::new(
        filename,
        contents,
        provisional.environment().clone(),
        produces,
        facts.consumes,
    )
    .with_extra(json!({ "datasets": exported }));

    let identity = single_output(&record)?;
    let path = artifacts
        .get(&identity.to_string())
        .ok_or_else(|| ScriptError::ProductNotFound {
            product: identity.to_string(),
        })?;
    identity.verify(path)?;

    Ok(SealedScript {
        record,
        artifacts,
        workspace,
    })
}

/// Exactly one produce identity, parsed back through the identity grammar.
fn single_output(record: &ScriptRecord) -> Result<ProduceIdentity, ScriptError> {
    match record.produces() {
        [] => Err(ScriptError::NoOutputs),
        [single] => single.parse(),
        many => Err(ScriptError::MultipleOutputs {
            identities: many.to_vec(),
        }),
    }
}

/// Runs a script prefix in its own fresh workspace, with the script's
/// environment, and returns the report file it wrote.
pub struct WorkspaceRunner<'a> {
    environment: EnvironmentDescriptor,
    service: &'a dyn ExecutionService,
}

impl<'a> WorkspaceRunner<'a> {
    pub fn new(environment: EnvironmentDescriptor, service: &'a dyn ExecutionService) -> Self {
        Self {
            environment,
            service,
        }
    }
}

impl PrefixRunner for WorkspaceRunner<'_> {
    fn run_prefix(&self, program: &str, report_file: &str) -> Result<String, ScriptError> {
        let record = ScriptRecord::new(
            INSPECTION_SCRIPT,
            program,
            self.environment.clone(),
            vec![report_file.to_string()],
            Vec::new(),
        );
        let result = record.run(self.service, None)?;
        if let Some(failure) = result.outcome.failure() {
            return Err(ScriptError::Execution(failure.clone()));
        }
        let report = result
            .products
            .get(report_file)
            .ok_or_else(|| ScriptError::ProductNotFound {
                product: report_file.to_string(),
            })?;
        read_text(report)
    }
}

/// Dynamic output extraction for `contents` with its statically resolved
/// environment.
pub fn extract_outputs(
    filename: &str,
    contents: &str,
    config: &SealConfig,
    dsl: &dyn DatasetDsl,
    service: &dyn ExecutionService,
) -> Result<OutputExtraction, ScriptError> {
    let facts = static_facts(filename, contents, config, dsl)?;
    let environment = EnvironmentDescriptor::from_dependencies(
        Ecosystem::Python,
        &facts.dependencies,
        &config.project,
    )?;
    let runner = WorkspaceRunner::new(environment, service);
    dynamic::extract_outputs(contents, dsl, &runner)
}
