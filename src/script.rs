//! Immutable script records and their execution.
//!
//! `run` materializes the environment in a workspace, executes the script
//! through an [`ExecutionService`] and maps every declared product to the
//! file it names. Sealed products are re-hashed on the way out.
use crate::config::ProjectDefaults;
use crate::environment::{write_manifest, Ecosystem, EnvironmentDescriptor};
use crate::error::{read_text, IoContext, ScriptError};
use crate::identity::{product_filename, ProduceIdentity};
use crate::service::{ExecutionService, ProcessOutcome};
use crate::util::{epoch_ms, now_epoch_ms};
use crate::workspace::{contained_path, Workspace};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

mod from_source;

pub use from_source::{extract_outputs, from_source, SealedScript, WorkspaceRunner, SIDE_CHANNEL};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptRecord {
    filename: String,
    contents: String,
    modified_epoch_ms: u128,
    environment: EnvironmentDescriptor,
    produces: Vec<String>,
    consumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra: Option<Value>,
}

/// Outcome of one `run`. Products live inside `workspace`; a temporary
/// workspace is removed when this value is dropped unless kept.
#[derive(Debug)]
pub struct ExecutionResult {
    pub outcome: ProcessOutcome,
    pub products: BTreeMap<String, PathBuf>,
    pub workspace: Workspace,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

impl ScriptRecord {
    pub fn new(
        filename: impl Into<String>,
        contents: impl Into<String>,
        environment: EnvironmentDescriptor,
        produces: Vec<String>,
        consumes: Vec<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            contents: contents.into(),
            modified_epoch_ms: now_epoch_ms(),
            environment,
            produces,
            consumes,
            extra: None,
        }
    }

    /// Read the script at `script_path`, keeping its modification time.
    pub fn load(
        script_path: &Path,
        environment: EnvironmentDescriptor,
        produces: Vec<String>,
        consumes: Vec<String>,
    ) -> Result<Self, ScriptError> {
        let filename = script_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ScriptError::InvalidConfig(format!(
                    "script path {} has no file name",
                    script_path.display()
                ))
            })?
            .to_string();
        let contents = read_text(script_path)?;
        let modified = std::fs::metadata(script_path)
            .and_then(|meta| meta.modified())
            .io_context(|| format!("stat {}", script_path.display()))?;
        Ok(Self {
            modified_epoch_ms: epoch_ms(modified),
            ..Self::new(filename, contents, environment, produces, consumes)
        })
    }

    /// Record whose environment is synthesized from `dependencies`.
    pub fn from_dependencies(
        filename: &str,
        contents: &str,
        dependencies: &[String],
        produces: Vec<String>,
        consumes: Vec<String>,
        project: &ProjectDefaults,
    ) -> Result<Self, ScriptError> {
        let ecosystem = Ecosystem::from_script_name(filename);
        let environment = EnvironmentDescriptor::from_dependencies(ecosystem, dependencies, project)?;
        Ok(Self::new(filename, contents, environment, produces, consumes))
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn modified_epoch_ms(&self) -> u128 {
        self.modified_epoch_ms
    }

    pub fn environment(&self) -> &EnvironmentDescriptor {
        &self.environment
    }

    pub fn produces(&self) -> &[String] {
        &self.produces
    }

    pub fn consumes(&self) -> &[String] {
        &self.consumes
    }

    pub fn extra(&self) -> Option<&Value> {
        self.extra.as_ref()
    }

    /// Parse a record and reject it when its environment checksum does
    /// not match the environment content.
    pub fn from_json(text: &str) -> Result<Self, ScriptError> {
        let record: ScriptRecord =
            serde_json::from_str(text).map_err(|err| ScriptError::json("parse script record", err))?;
        record.environment.verify_checksum()?;
        record.environment.check_round_trip()?;
        Ok(record)
    }

    pub fn read(path: &Path) -> Result<Self, ScriptError> {
        Self::from_json(&read_text(path)?)
    }

    pub fn to_json(&self) -> Result<String, ScriptError> {
        serde_json::to_string_pretty(self).map_err(|err| ScriptError::json("serialize script record", err))
    }

    /// Sealed produce identities; fails on any declaration outside the
    /// identity grammar.
    pub fn sealed_products(&self) -> Result<Vec<ProduceIdentity>, ScriptError> {
        self.produces.iter().map(|declared| declared.parse()).collect()
    }

    /// Execute in `target`, or in a fresh temporary workspace.
    pub fn run(
        &self,
        service: &dyn ExecutionService,
        target: Option<&Path>,
    ) -> Result<ExecutionResult, ScriptError> {
        let prefix = format!("{}_", self.filename.replace('.', "-"));
        let workspace = Workspace::for_target(target, &prefix)?;
        let ecosystem = self.environment.ecosystem();
        tracing::debug!(
            script = %self.filename,
            workspace = %workspace.path().display(),
            ecosystem = %ecosystem,
            "running script"
        );

        service.init(ecosystem, workspace.path())?;
        write_manifest(&self.environment, workspace.path())?;
        service.sync(workspace.path())?;
        workspace.write_text(Path::new(&self.filename), &self.contents)?;

        let outcome = service.run(workspace.path(), &self.filename, ecosystem)?;
        if let Some(failure) = outcome.failure() {
            tracing::warn!(script = %self.filename, error = %failure, "script failed");
            return Ok(ExecutionResult {
                outcome,
                products: BTreeMap::new(),
                workspace,
            });
        }

        let products = self.locate_products(&workspace)?;
        Ok(ExecutionResult {
            outcome,
            products,
            workspace,
        })
    }

    fn locate_products(&self, workspace: &Workspace) -> Result<BTreeMap<String, PathBuf>, ScriptError> {
        let files = workspace.files()?;
        let mut products = BTreeMap::new();
        for declared in &self.produces {
            let filename = product_filename(declared);
            contained_path(workspace.path(), &filename, declared)?;
            let wanted = Path::new(&filename);
            let candidates: Vec<PathBuf> = files
                .iter()
                .filter(|file| {
                    file.strip_prefix(workspace.path())
                        .map(|rel| rel.ends_with(wanted))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            let path = match candidates.len() {
                0 => {
                    return Err(ScriptError::ProductNotFound {
                        product: declared.clone(),
                    })
                }
                1 => candidates.into_iter().next().unwrap_or_default(),
                _ => {
                    return Err(ScriptError::AmbiguousProduct {
                        product: declared.clone(),
                        candidates,
                    })
                }
            };
            if let Ok(identity) = declared.parse::<ProduceIdentity>() {
                identity.verify(&path)?;
            }
            products.insert(declared.clone(), path);
        }
        Ok(products)
    }
}

/// Re-hash every sealed product of `record` against files in `artifacts`.
pub fn verify_artifacts(record: &ScriptRecord, artifacts: &Path) -> Result<Vec<ProduceIdentity>, ScriptError> {
    let identities = record.sealed_products()?;
    for identity in &identities {
        let path = contained_path(artifacts, &identity.filename, &identity.to_string())?;
        if !path.is_file() {
            return Err(ScriptError::ProductNotFound {
                product: identity.to_string(),
            });
        }
        identity.verify(&path)?;
    }
    Ok(identities)
}
