//! Analysis flags and the on-disk tool configuration.
//!
//! Flags can be forced on from the analyzed source with `#%` directives;
//! they are never forced off that way.
use crate::directive::{self, CONFIG_TOKEN};
use crate::error::{read_text, ScriptError};
use crate::service::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "SSEAL_CONFIG";

/// Named boolean switches of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Flag {
    DetectDependencies,
    ParseImports,
    ParseSourceRelocations,
    ParseEnvironment,
    DetectInputDatasets,
    DetectOutputDatasets,
}

impl Flag {
    pub const ALL: [Flag; 6] = [
        Flag::DetectDependencies,
        Flag::ParseImports,
        Flag::ParseSourceRelocations,
        Flag::ParseEnvironment,
        Flag::DetectInputDatasets,
        Flag::DetectOutputDatasets,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Flag::DetectDependencies => "detect_dependencies",
            Flag::ParseImports => "parse_imports",
            Flag::ParseSourceRelocations => "parse_source_relocations",
            Flag::ParseEnvironment => "parse_environment",
            Flag::DetectInputDatasets => "detect_input_datasets",
            Flag::DetectOutputDatasets => "detect_output_datasets",
        }
    }

    pub fn from_name(name: &str) -> Option<Flag> {
        Flag::ALL.into_iter().find(|flag| flag.name() == name)
    }
}

/// Immutable configuration for a single analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFlags {
    pub detect_dependencies: bool,
    pub parse_imports: bool,
    pub parse_source_relocations: bool,
    pub parse_environment: bool,
    pub detect_input_datasets: bool,
    pub detect_output_datasets: bool,
    /// Bare package name -> qualified replacement (`name@locator`).
    pub known_sources: BTreeMap<String, String>,
}

impl Default for ConfigFlags {
    fn default() -> Self {
        Self {
            detect_dependencies: false,
            parse_imports: true,
            parse_source_relocations: true,
            parse_environment: false,
            detect_input_datasets: false,
            detect_output_datasets: true,
            known_sources: BTreeMap::new(),
        }
    }
}

impl ConfigFlags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::DetectDependencies => self.detect_dependencies,
            Flag::ParseImports => self.parse_imports,
            Flag::ParseSourceRelocations => self.parse_source_relocations,
            Flag::ParseEnvironment => self.parse_environment,
            Flag::DetectInputDatasets => self.detect_input_datasets,
            Flag::DetectOutputDatasets => self.detect_output_datasets,
        }
    }

    /// Copy with `flag` set to `value`.
    pub fn with(&self, flag: Flag, value: bool) -> Self {
        let mut next = self.clone();
        let slot = match flag {
            Flag::DetectDependencies => &mut next.detect_dependencies,
            Flag::ParseImports => &mut next.parse_imports,
            Flag::ParseSourceRelocations => &mut next.parse_source_relocations,
            Flag::ParseEnvironment => &mut next.parse_environment,
            Flag::DetectInputDatasets => &mut next.detect_input_datasets,
            Flag::DetectOutputDatasets => &mut next.detect_output_datasets,
        };
        *slot = value;
        next
    }

    /// Enable-only merge: `merged[f] = detected[f]` when detected, else
    /// the explicit value. Detected flags are always `true`.
    pub fn merge_detected(&self, detected: &BTreeSet<Flag>) -> Self {
        detected
            .iter()
            .fold(self.clone(), |config, flag| config.with(*flag, true))
    }

    /// Merge the `#%` directives found in `source` into this config.
    pub fn detect_from_source(&self, source: &str) -> Self {
        self.merge_detected(&detect_flags(source))
    }

    /// Defaults used when sealing a script from source: static analysis
    /// and output discovery are always on, independent of directives.
    pub fn sealing_policy(&self) -> Self {
        [
            Flag::DetectDependencies,
            Flag::ParseImports,
            Flag::ParseSourceRelocations,
            Flag::DetectInputDatasets,
            Flag::DetectOutputDatasets,
        ]
        .into_iter()
        .fold(self.clone(), |config, flag| config.with(flag, true))
    }
}

/// Flags named by `#%` directives, ignoring tags that are not flag names.
pub fn detect_flags(source: &str) -> BTreeSet<Flag> {
    directive::all_tags(source, CONFIG_TOKEN)
        .iter()
        .filter_map(|tag| Flag::from_name(tag))
        .collect()
}

/// Project metadata used when synthesizing an environment manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectDefaults {
    pub name: String,
    pub version: String,
    pub description: String,
    pub readme: String,
    pub requires_python: String,
    pub r_version: String,
}

impl Default for ProjectDefaults {
    fn default() -> Self {
        Self {
            name: "sealed-script".to_string(),
            version: "0.1.0".to_string(),
            description: "Add your description here".to_string(),
            readme: "README.md".to_string(),
            requires_python: ">=3.12".to_string(),
            r_version: "4.4.1".to_string(),
        }
    }
}

/// Names the Python dataset DSL runtime exposes to analyzed scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DslConfig {
    /// Attribute root used by scripts, e.g. `Datasets.R1C1.register(...)`.
    pub accessor: String,
    /// Fully qualified class of the runtime's dataset proxy.
    pub proxy_class: String,
    /// Proxy method returning the registration metadata stack.
    pub stack_method: String,
}

impl Default for DslConfig {
    fn default() -> Self {
        Self {
            accessor: "Datasets".to_string(),
            proxy_class: "argendata_datasets.dsl.datasets.DatasetProxy".to_string(),
            stack_method: "_get_registrations_metadata_stack".to_string(),
        }
    }
}

/// Contents of the JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SealConfig {
    pub flags: ConfigFlags,
    pub project: ProjectDefaults,
    pub service: ServiceConfig,
    pub dsl: DslConfig,
}

/// Load the config file, or defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<SealConfig, ScriptError> {
    let Some(path) = path else {
        return Ok(SealConfig::default());
    };
    let text = read_text(path)?;
    let config: SealConfig = serde_json::from_str(&text)
        .map_err(|err| ScriptError::json(format!("parse config {}", path.display()), err))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &SealConfig) -> Result<(), ScriptError> {
    for (name, qualified) in &config.flags.known_sources {
        if name.trim().is_empty() || qualified.trim().is_empty() {
            return Err(ScriptError::InvalidConfig(format!(
                "known source entries must be non-empty (got {name:?} -> {qualified:?})"
            )));
        }
    }
    if !config.dsl.proxy_class.contains('.') {
        return Err(ScriptError::InvalidConfig(format!(
            "dsl.proxy_class must be module-qualified, got {}",
            config.dsl.proxy_class
        )));
    }
    Ok(())
}
