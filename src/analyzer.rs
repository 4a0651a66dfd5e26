//! Static analysis of a script: nothing here executes the analyzed code.
use crate::config::{ConfigFlags, Flag};
use crate::datasets::{DatasetDsl, RegistrationRecord};
use crate::deps;
use crate::directive::{self, ENVIRONMENT_TOKEN};
use crate::error::ScriptError;
use serde::Serialize;

/// One key per analysis step; a key is absent when its step was off.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Consume identities, e.g. `R1C0@latest`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasets: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_datasets: Option<Vec<RegistrationRecord>>,
}

pub struct StaticAnalyzer<'a> {
    config: ConfigFlags,
    dsl: &'a dyn DatasetDsl,
}

impl<'a> StaticAnalyzer<'a> {
    pub fn new(config: ConfigFlags, dsl: &'a dyn DatasetDsl) -> Self {
        Self { config, dsl }
    }

    /// Effective flags for `text`: `#%` directives merged in when
    /// `detect_config` is set.
    pub fn effective_config(&self, text: &str, detect_config: bool) -> ConfigFlags {
        if detect_config {
            self.config.detect_from_source(text)
        } else {
            self.config.clone()
        }
    }

    pub fn run(&self, text: &str, detect_config: bool) -> Result<AnalysisReport, ScriptError> {
        let config = self.effective_config(text, detect_config);
        let enabled: Vec<&str> = Flag::ALL
            .into_iter()
            .filter(|flag| config.get(*flag))
            .map(Flag::name)
            .collect();
        tracing::debug!(?enabled, detect_config, "static analysis");
        let mut report = AnalysisReport::default();
        if config.detect_dependencies {
            report.dependencies = Some(deps::resolve(text, &config)?.into_iter().collect());
        }
        if config.parse_environment {
            report.environment = Some(parse_environment(text)?);
        }
        if config.detect_input_datasets {
            report.datasets = Some(
                self.dsl
                    .consumes(text)
                    .iter()
                    .map(|reference| reference.identity())
                    .collect(),
            );
        }
        if config.detect_output_datasets {
            report.output_datasets = Some(self.dsl.registrations(text));
        }
        Ok(report)
    }
}

/// The single `#^` environment path declared by `text`.
pub fn parse_environment(text: &str) -> Result<String, ScriptError> {
    let pointers = directive::scan(text, ENVIRONMENT_TOKEN);
    if pointers.len() != 1 {
        return Err(ScriptError::EnvironmentPointer {
            found: pointers.len(),
        });
    }
    let Some((line, tags)) = pointers.into_iter().next() else {
        return Err(ScriptError::EnvironmentPointer { found: 0 });
    };
    let mut tags: Vec<String> = tags.into_iter().collect();
    match tags.len() {
        1 => Ok(tags.remove(0)),
        _ => Err(ScriptError::EnvironmentPointerTags { line, tags }),
    }
}
