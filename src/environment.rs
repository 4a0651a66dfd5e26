//! Reproducible, checksummed environment descriptors.
//!
//! One variant per supported ecosystem. The checksum is a SHA-256 over a
//! canonical serialization, so it depends only on content, never on the
//! in-memory key order.
use crate::config::ProjectDefaults;
use crate::error::{read_text, IoContext, ScriptError};
use crate::util::{canonical_json, sha256_hex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const R_PROFILE: &str = "source(\"renv/activate.R\")\n";
const R_SETTINGS: &str = "{}\n";
const R_ACTIVATE: &str = "local({\n  if (!requireNamespace(\"renv\", quietly = TRUE)) {\n    install.packages(\"renv\", repos = \"https://cloud.r-project.org\")\n  }\n  renv::load()\n})\n";
const CRAN: &str = "https://cloud.r-project.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Python,
    R,
}

impl Ecosystem {
    /// Manifest whose presence marks a workspace of this ecosystem.
    pub fn manifest_file(self) -> &'static str {
        match self {
            Ecosystem::Python => "pyproject.toml",
            Ecosystem::R => "renv.lock",
        }
    }

    pub fn detect(workspace: &Path) -> Option<Ecosystem> {
        [Ecosystem::Python, Ecosystem::R]
            .into_iter()
            .find(|ecosystem| workspace.join(ecosystem.manifest_file()).is_file())
    }

    pub fn from_script_name(filename: &str) -> Ecosystem {
        if filename.ends_with(".R") || filename.ends_with(".r") {
            Ecosystem::R
        } else {
            Ecosystem::Python
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Ecosystem::Python => "python",
            Ecosystem::R => "r",
        })
    }
}

impl FromStr for Ecosystem {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Ecosystem::Python),
            "r" => Ok(Ecosystem::R),
            other => Err(format!("unknown ecosystem {other} (expected python or r)")),
        }
    }
}

/// Python-like environment backed by a `pyproject.toml` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonEnvironment {
    pub dependencies: Vec<String>,
    pub pyproject: toml::Table,
    pub checksum: String,
}

/// R-like environment backed by renv's lockfile and bootstrap files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct REnvironment {
    pub dependencies: Vec<String>,
    pub renv_lock: String,
    pub r_profile: String,
    pub renv_settings: String,
    pub activate: String,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ecosystem", rename_all = "lowercase")]
pub enum EnvironmentDescriptor {
    Python(PythonEnvironment),
    R(REnvironment),
}

impl EnvironmentDescriptor {
    /// Synthesize a manifest from a bare dependency list.
    pub fn from_dependencies(
        ecosystem: Ecosystem,
        dependencies: &[String],
        project: &ProjectDefaults,
    ) -> Result<Self, ScriptError> {
        let descriptor = match ecosystem {
            Ecosystem::Python => {
                let pyproject = pyproject_base(dependencies, project);
                EnvironmentDescriptor::Python(PythonEnvironment {
                    dependencies: dependencies.to_vec(),
                    checksum: python_checksum(&pyproject)?,
                    pyproject,
                })
            }
            Ecosystem::R => {
                let renv_lock = renv_lock_base(dependencies, project)?;
                EnvironmentDescriptor::R(r_environment(
                    dependencies.to_vec(),
                    renv_lock,
                    R_PROFILE.to_string(),
                    R_SETTINGS.to_string(),
                    R_ACTIVATE.to_string(),
                )?)
            }
        };
        descriptor.check_round_trip()?;
        tracing::debug!(
            ecosystem = %ecosystem,
            checksum = descriptor.checksum(),
            "environment synthesized"
        );
        Ok(descriptor)
    }

    /// Load an existing manifest. `path` is the manifest file or the
    /// directory holding it.
    pub fn load(ecosystem: Ecosystem, path: &Path) -> Result<Self, ScriptError> {
        let descriptor = match ecosystem {
            Ecosystem::Python => EnvironmentDescriptor::Python(load_python(path)?),
            Ecosystem::R => EnvironmentDescriptor::R(load_r(path)?),
        };
        descriptor.check_round_trip()?;
        Ok(descriptor)
    }

    pub fn ecosystem(&self) -> Ecosystem {
        match self {
            EnvironmentDescriptor::Python(_) => Ecosystem::Python,
            EnvironmentDescriptor::R(_) => Ecosystem::R,
        }
    }

    pub fn dependencies(&self) -> &[String] {
        match self {
            EnvironmentDescriptor::Python(env) => &env.dependencies,
            EnvironmentDescriptor::R(env) => &env.dependencies,
        }
    }

    pub fn checksum(&self) -> &str {
        match self {
            EnvironmentDescriptor::Python(env) => &env.checksum,
            EnvironmentDescriptor::R(env) => &env.checksum,
        }
    }

    pub fn compute_checksum(&self) -> Result<String, ScriptError> {
        match self {
            EnvironmentDescriptor::Python(env) => python_checksum(&env.pyproject),
            EnvironmentDescriptor::R(env) => Ok(r_checksum(
                &env.renv_lock,
                &env.r_profile,
                &env.renv_settings,
                &env.activate,
            )?),
        }
    }

    /// Reject a descriptor whose recorded checksum does not match its content.
    pub fn verify_checksum(&self) -> Result<(), ScriptError> {
        let computed = self.compute_checksum()?;
        if computed != self.checksum() {
            return Err(ScriptError::ChecksumMismatch {
                recorded: self.checksum().to_string(),
                computed,
            });
        }
        Ok(())
    }

    /// serialize -> deserialize -> serialize must be byte-identical and
    /// yield an equal descriptor.
    pub fn check_round_trip(&self) -> Result<(), ScriptError> {
        let first = serde_json::to_string(self)
            .map_err(|err| ScriptError::json("serialize environment", err))?;
        let parsed: EnvironmentDescriptor = serde_json::from_str(&first)
            .map_err(|err| ScriptError::json("reparse environment", err))?;
        let second = serde_json::to_string(&parsed)
            .map_err(|err| ScriptError::json("serialize environment", err))?;
        if first != second || &parsed != self {
            return Err(ScriptError::RoundTrip("environment descriptor".to_string()));
        }
        self.check_manifest_round_trip()
    }

    /// The manifest text must parse back to the same content.
    pub fn check_manifest_round_trip(&self) -> Result<(), ScriptError> {
        match self {
            EnvironmentDescriptor::Python(env) => {
                let text = pyproject_text(&env.pyproject)?;
                let parsed: toml::Table = toml::from_str(&text)
                    .map_err(|err| ScriptError::InvalidManifest(err.to_string()))?;
                if parsed != env.pyproject || pyproject_text(&parsed)? != text {
                    return Err(ScriptError::RoundTrip("pyproject.toml".to_string()));
                }
            }
            EnvironmentDescriptor::R(env) => {
                let lock = parse_json(&env.renv_lock, "renv.lock")?;
                let text = serde_json::to_string(&lock)
                    .map_err(|err| ScriptError::json("serialize renv.lock", err))?;
                if parse_json(&text, "renv.lock")? != lock {
                    return Err(ScriptError::RoundTrip("renv.lock".to_string()));
                }
            }
        }
        Ok(())
    }

    /// Manifest files as (workspace-relative path, contents).
    pub fn manifest_files(&self) -> Result<Vec<(PathBuf, String)>, ScriptError> {
        Ok(match self {
            EnvironmentDescriptor::Python(env) => vec![(
                PathBuf::from(Ecosystem::Python.manifest_file()),
                pyproject_text(&env.pyproject)?,
            )],
            EnvironmentDescriptor::R(env) => vec![
                (PathBuf::from("renv.lock"), env.renv_lock.clone()),
                (PathBuf::from(".Rprofile"), env.r_profile.clone()),
                (
                    PathBuf::from("renv").join("settings.json"),
                    env.renv_settings.clone(),
                ),
                (PathBuf::from("renv").join("activate.R"), env.activate.clone()),
            ],
        })
    }
}

fn pyproject_base(dependencies: &[String], project: &ProjectDefaults) -> toml::Table {
    let mut table = toml::Table::new();
    table.insert("name".into(), project.name.clone().into());
    table.insert("version".into(), project.version.clone().into());
    table.insert("description".into(), project.description.clone().into());
    table.insert("readme".into(), project.readme.clone().into());
    table.insert(
        "requires-python".into(),
        project.requires_python.clone().into(),
    );
    table.insert(
        "dependencies".into(),
        toml::Value::Array(dependencies.iter().cloned().map(toml::Value::from).collect()),
    );
    let mut pyproject = toml::Table::new();
    pyproject.insert("project".into(), toml::Value::Table(table));
    pyproject
}

fn pyproject_text(pyproject: &toml::Table) -> Result<String, ScriptError> {
    toml::to_string(pyproject).map_err(|err| ScriptError::InvalidManifest(err.to_string()))
}

fn python_checksum(pyproject: &toml::Table) -> Result<String, ScriptError> {
    let value = serde_json::to_value(pyproject)
        .map_err(|err| ScriptError::json("canonicalize pyproject", err))?;
    let canonical = serde_json::to_string(&canonical_json(&value))
        .map_err(|err| ScriptError::json("canonicalize pyproject", err))?;
    Ok(sha256_hex(canonical.as_bytes()))
}

fn load_python(path: &Path) -> Result<PythonEnvironment, ScriptError> {
    let file = if path.is_dir() {
        path.join(Ecosystem::Python.manifest_file())
    } else {
        path.to_path_buf()
    };
    let pyproject: toml::Table = toml::from_str(&read_text(&file)?)
        .map_err(|err| ScriptError::InvalidManifest(format!("{}: {err}", file.display())))?;
    let dependencies = pyproject
        .get("project")
        .and_then(|project| project.get("dependencies"))
        .and_then(toml::Value::as_array)
        .ok_or_else(|| {
            ScriptError::InvalidManifest(format!(
                "{} has no project.dependencies array",
                file.display()
            ))
        })?
        .iter()
        .map(|entry| {
            entry.as_str().map(str::to_string).ok_or_else(|| {
                ScriptError::InvalidManifest(format!("non-string dependency {entry}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PythonEnvironment {
        dependencies,
        checksum: python_checksum(&pyproject)?,
        pyproject,
    })
}

fn parse_json(text: &str, label: &str) -> Result<Value, ScriptError> {
    serde_json::from_str(text).map_err(|err| ScriptError::json(format!("parse {label}"), err))
}

fn r_checksum(
    renv_lock: &str,
    r_profile: &str,
    renv_settings: &str,
    activate: &str,
) -> Result<String, ScriptError> {
    let settings = parse_json(renv_settings, "renv/settings.json")?;
    let settings = serde_json::to_string(&canonical_json(&settings))
        .map_err(|err| ScriptError::json("canonicalize renv settings", err))?;
    let mut bytes = Vec::new();
    for part in [renv_lock, r_profile, settings.as_str(), activate] {
        bytes.extend_from_slice(part.as_bytes());
    }
    Ok(sha256_hex(&bytes))
}

fn r_environment(
    dependencies: Vec<String>,
    renv_lock: String,
    r_profile: String,
    renv_settings: String,
    activate: String,
) -> Result<REnvironment, ScriptError> {
    let checksum = r_checksum(&renv_lock, &r_profile, &renv_settings, &activate)?;
    Ok(REnvironment {
        dependencies,
        renv_lock,
        r_profile,
        renv_settings,
        activate,
        checksum,
    })
}

fn renv_lock_base(dependencies: &[String], project: &ProjectDefaults) -> Result<String, ScriptError> {
    let mut packages = Map::new();
    for dependency in dependencies {
        let entry = match dependency.split_once('@') {
            Some((name, locator)) => json!({
                "Package": name,
                "Source": "URL",
                "RemoteType": "url",
                "RemoteUrl": locator,
            }),
            None => json!({
                "Package": dependency,
                "Source": "Repository",
                "Repository": "CRAN",
            }),
        };
        let name = dependency.split('@').next().unwrap_or(dependency);
        packages.insert(name.to_string(), entry);
    }
    let lock = json!({
        "R": {
            "Version": project.r_version,
            "Repositories": [{"Name": "CRAN", "URL": CRAN}],
        },
        "Packages": Value::Object(packages),
    });
    let mut text = serde_json::to_string_pretty(&canonical_json(&lock))
        .map_err(|err| ScriptError::json("serialize renv.lock", err))?;
    text.push('\n');
    Ok(text)
}

fn load_r(path: &Path) -> Result<REnvironment, ScriptError> {
    let root = if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    let renv_lock = read_text(&root.join("renv.lock"))?;
    let r_profile = read_text(&root.join(".Rprofile"))?;
    let renv_settings = read_text(&root.join("renv").join("settings.json"))?;
    let activate = read_text(&root.join("renv").join("activate.R"))?;
    let lock = parse_json(&renv_lock, "renv.lock")?;
    let dependencies = lock
        .get("Packages")
        .and_then(Value::as_object)
        .map(|packages| {
            packages
                .iter()
                .map(|(name, entry)| match entry.get("RemoteUrl").and_then(Value::as_str) {
                    Some(url) => format!("{name}@{url}"),
                    None => name.clone(),
                })
                .collect()
        })
        .unwrap_or_default();
    r_environment(dependencies, renv_lock, r_profile, renv_settings, activate)
}

/// Write the manifest files into `workspace`.
pub fn write_manifest(
    descriptor: &EnvironmentDescriptor,
    workspace: &Path,
) -> Result<Vec<PathBuf>, ScriptError> {
    descriptor.check_manifest_round_trip()?;
    let mut written = Vec::new();
    for (rel, contents) in descriptor.manifest_files()? {
        let path = workspace.join(&rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .io_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&path, contents.as_bytes())
            .io_context(|| format!("write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
