//! Dataset references a script consumes and registrations it produces.
//!
//! Discovery itself belongs to the dataset DSL runtime; [`DatasetDsl`] is the
//! seam, [`PythonDsl`] the binding for the Python runtime.
use crate::error::ScriptError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub mod dynamic;
mod python_dsl;

pub use python_dsl::PythonDsl;

/// A consumed dataset: logical code plus version pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetReference {
    pub code: String,
    pub version: String,
}

impl DatasetReference {
    /// Consume identity, e.g. `R1C0@latest`.
    pub fn identity(&self) -> String {
        format!("{}@{}", self.code, self.version)
    }
}

/// A statically discovered registration of a produced dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationRecord {
    pub symbol: String,
    pub code: String,
    /// Source text of the `filename=` argument, when present.
    pub filename_expr: Option<String>,
    /// Top-level statement index of the final registration of `symbol`.
    pub registration_index: usize,
    /// 0-based source line where that registration starts.
    pub line: usize,
    /// Top-level statement index of the `save` call, when present.
    pub save_index: Option<usize>,
}

/// A produced dataset as the runtime actually registered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedDataset {
    pub code: String,
    pub filename: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ExportedDataset {
    /// Split `filename` and `name` out of registration metadata; the rest
    /// stays as free-form metadata.
    pub fn from_metadata(mut metadata: Map<String, Value>) -> Result<Self, ScriptError> {
        let filename = take_string(&mut metadata, "filename")?;
        let code = take_string(&mut metadata, "name")?;
        Ok(Self {
            code,
            filename,
            metadata: metadata.into_iter().collect(),
        })
    }
}

fn take_string(metadata: &mut Map<String, Value>, key: &str) -> Result<String, ScriptError> {
    match metadata.remove(key) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value),
        Some(other) => Err(ScriptError::MalformedReport(format!(
            "registration field {key} must be a non-empty string, got {other}"
        ))),
        None => Err(ScriptError::MalformedReport(format!(
            "registration is missing {key}"
        ))),
    }
}

/// Capabilities this crate needs from the dataset DSL runtime.
pub trait DatasetDsl {
    /// Consumed datasets declared in `text`, without running it.
    fn consumes(&self, text: &str) -> Vec<DatasetReference>;

    /// Registrations declared at top level of `text`, without running it.
    fn registrations(&self, text: &str) -> Vec<RegistrationRecord>;

    /// Code appended to a script prefix that writes, per symbol, whether it
    /// is missing, a foreign value, or a proxy with its registration stack.
    fn inspection_stub(&self, symbols: &[String], report_file: &str) -> String;

    /// Code appended to a full script that writes, per symbol, its status
    /// and, for a proxy, its last registration, as a JSON array.
    fn export_stub(&self, symbols: &[String], side_channel: &str) -> String;
}

/// One symbol's entry in the side-channel file.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum SideChannelEntry {
    Missing {
        symbol: String,
    },
    Foreign {
        symbol: String,
    },
    Empty {
        symbol: String,
    },
    Proxy {
        symbol: String,
        registration: Map<String, Value>,
    },
}

/// Parse a side-channel file: one status entry per registered symbol.
/// A missing symbol or an empty registration stack is fatal.
pub fn parse_side_channel(text: &str) -> Result<Vec<ExportedDataset>, ScriptError> {
    let entries: Vec<SideChannelEntry> = serde_json::from_str(text)
        .map_err(|err| ScriptError::json("parse produced datasets", err))?;
    let mut datasets = Vec::new();
    for entry in entries {
        match entry {
            SideChannelEntry::Missing { symbol } => {
                return Err(ScriptError::MissingSymbol { symbol })
            }
            SideChannelEntry::Empty { symbol } => {
                return Err(ScriptError::EmptyRegistrationStack { symbol })
            }
            SideChannelEntry::Foreign { symbol } => {
                tracing::debug!(%symbol, "skipping non-proxy symbol");
            }
            SideChannelEntry::Proxy { registration, .. } => {
                datasets.push(ExportedDataset::from_metadata(registration)?);
            }
        }
    }
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_filename_and_name_from_metadata() {
        let Value::Object(metadata) =
            json!({"filename": "output.csv", "name": "R1C1", "foo": "a", "bar": 1})
        else {
            panic!("object literal");
        };
        let dataset = ExportedDataset::from_metadata(metadata).expect("exported dataset");
        assert_eq!(dataset.code, "R1C1");
        assert_eq!(dataset.filename, "output.csv");
        assert_eq!(dataset.metadata.len(), 2);
        assert_eq!(dataset.metadata["bar"], json!(1));
    }

    #[test]
    fn side_channel_requires_filename_and_name() {
        let parsed = parse_side_channel(
            r#"[{"symbol": "dataset", "status": "proxy", "registration": {"filename": "a.csv", "name": "R1C1"}}]"#,
        )
        .expect("parse side channel");
        assert_eq!(parsed.len(), 1);
        assert!(parse_side_channel(
            r#"[{"symbol": "dataset", "status": "proxy", "registration": {"filename": "a.csv"}}]"#
        )
        .is_err());
        assert!(parse_side_channel(
            r#"[{"symbol": "dataset", "status": "proxy", "registration": {"filename": 3, "name": "R1C1"}}]"#
        )
        .is_err());
        assert!(parse_side_channel(r#"[{"filename": "a.csv", "name": "R1C1"}]"#).is_err());
        assert!(parse_side_channel("{}").is_err());
    }

    #[test]
    fn side_channel_statuses_are_not_ignored() {
        assert!(matches!(
            parse_side_channel(r#"[{"symbol": "dataset", "status": "missing"}]"#),
            Err(ScriptError::MissingSymbol { ref symbol }) if symbol == "dataset"
        ));
        assert!(matches!(
            parse_side_channel(r#"[{"symbol": "dataset", "status": "empty"}]"#),
            Err(ScriptError::EmptyRegistrationStack { ref symbol }) if symbol == "dataset"
        ));
        let parsed = parse_side_channel(
            r#"[{"symbol": "helper", "status": "foreign"},
                {"symbol": "dataset", "status": "proxy", "registration": {"filename": "a.csv", "name": "R1C1"}}]"#,
        )
        .expect("foreign symbols are skipped");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].code, "R1C1");
    }

    #[test]
    fn consume_identity_pins_version() {
        let reference = DatasetReference {
            code: "R1C0".to_string(),
            version: "latest".to_string(),
        };
        assert_eq!(reference.identity(), "R1C0@latest");
    }
}
