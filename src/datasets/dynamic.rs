//! Recover the runtime identity of produced datasets.
//!
//! Static discovery names the registered symbols; the script is then run
//! once, only up to the last registration, with an inspection appended that
//! reports each symbol's registration stack.
use super::{DatasetDsl, ExportedDataset};
use crate::error::ScriptError;
use crate::source;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Report file the inspection writes inside the execution workspace.
pub const INSPECTION_FILE: &str = "__registrations__.json";

/// Runs a truncated script once and hands back the inspection report.
pub trait PrefixRunner {
    fn run_prefix(&self, program: &str, report_file: &str) -> Result<String, ScriptError>;
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum SymbolInspection {
    Missing,
    Foreign,
    Proxy {
        registrations: Vec<Map<String, Value>>,
    },
}

/// Last-write-wins registration metadata per symbol, with full history.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RegistrationLedger {
    latest: BTreeMap<String, Map<String, Value>>,
    history: BTreeMap<String, Vec<Map<String, Value>>>,
}

impl RegistrationLedger {
    fn record(
        &mut self,
        symbol: &str,
        mut stack: Vec<Map<String, Value>>,
    ) -> Result<&Map<String, Value>, ScriptError> {
        let last = stack
            .pop()
            .ok_or_else(|| ScriptError::EmptyRegistrationStack {
                symbol: symbol.to_string(),
            })?;
        let history = self.history.entry(symbol.to_string()).or_default();
        history.extend(stack);
        history.push(last.clone());
        self.latest.insert(symbol.to_string(), last);
        Ok(&self.latest[symbol])
    }

    pub fn latest(&self, symbol: &str) -> Option<&Map<String, Value>> {
        self.latest.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.latest.keys().map(String::as_str)
    }

    pub fn history(&self, symbol: &str) -> &[Map<String, Value>] {
        self.history.get(symbol).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Exported datasets plus the registration history they were taken from.
#[derive(Debug)]
pub struct OutputExtraction {
    pub datasets: Vec<ExportedDataset>,
    pub ledger: RegistrationLedger,
}

/// Run the registration prefix of `text` once and export one dataset per
/// proxy symbol (its final registration).
pub fn extract_outputs(
    text: &str,
    dsl: &dyn DatasetDsl,
    runner: &dyn PrefixRunner,
) -> Result<OutputExtraction, ScriptError> {
    let records = dsl.registrations(text);
    let last = records
        .iter()
        .map(|record| record.registration_index)
        .max()
        .ok_or(ScriptError::NoRegistrations)?;
    let statements = source::statements(text);
    let prefix = source::prefix_through(text, &statements, last).ok_or_else(|| {
        ScriptError::MalformedReport(format!("statement {last} is outside the script"))
    })?;
    tracing::debug!(
        statements = statements.len(),
        last_registration = last,
        cut_after_line = statements[last].last_line,
        "truncated script for output extraction"
    );

    let symbols: Vec<String> = records.iter().map(|record| record.symbol.clone()).collect();
    let program = format!("{prefix}{}", dsl.inspection_stub(&symbols, INSPECTION_FILE));
    let report = runner.run_prefix(&program, INSPECTION_FILE)?;
    let mut inspections: BTreeMap<String, SymbolInspection> = serde_json::from_str(&report)
        .map_err(|err| ScriptError::json("parse registration inspection report", err))?;

    let mut ledger = RegistrationLedger::default();
    let mut datasets = Vec::new();
    for record in &records {
        match inspections.remove(&record.symbol) {
            None | Some(SymbolInspection::Missing) => {
                return Err(ScriptError::MissingSymbol {
                    symbol: record.symbol.clone(),
                })
            }
            Some(SymbolInspection::Foreign) => {
                tracing::debug!(symbol = %record.symbol, "skipping non-proxy symbol");
            }
            Some(SymbolInspection::Proxy { registrations }) => {
                let latest = ledger.record(&record.symbol, registrations)?;
                datasets.push(ExportedDataset::from_metadata(latest.clone())?);
            }
        }
    }
    if datasets.is_empty() {
        return Err(ScriptError::NoExportedDatasets);
    }
    Ok(OutputExtraction { datasets, ledger })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DslConfig;
    use crate::datasets::PythonDsl;
    use crate::error::ErrorKind;
    use std::cell::RefCell;

    struct CannedRunner {
        report: String,
        programs: RefCell<Vec<String>>,
    }

    impl CannedRunner {
        fn new(report: &str) -> Self {
            Self {
                report: report.to_string(),
                programs: RefCell::new(Vec::new()),
            }
        }
    }

    impl PrefixRunner for CannedRunner {
        fn run_prefix(&self, program: &str, report_file: &str) -> Result<String, ScriptError> {
            assert_eq!(report_file, INSPECTION_FILE);
            self.programs.borrow_mut().push(program.to_string());
            Ok(self.report.clone())
        }
    }

    const SCRIPT: &str = "\
import pathlib
from argendata_datasets import Datasets
FILENAME = 'output.csv'
dataset = Datasets.R1C1.register(filename=FILENAME, foo='a')
dataset.save(pathlib.Path(FILENAME).write_text('Hello, world!'))
raise SystemExit('never reached')
";

    fn dsl() -> PythonDsl {
        PythonDsl::new(&DslConfig::default()).expect("dsl binding")
    }

    #[test]
    fn runs_only_through_the_last_registration() {
        let runner = CannedRunner::new(
            r#"{"dataset": {"status": "proxy", "registrations": [{"filename": "output.csv", "name": "R1C1", "foo": "a"}]}}"#,
        );
        let extraction = extract_outputs(SCRIPT, &dsl(), &runner).expect("extract outputs");
        let programs = runner.programs.borrow();
        assert_eq!(programs.len(), 1);
        assert!(programs[0].contains("dataset = Datasets.R1C1.register"));
        assert!(!programs[0].contains("dataset.save"));
        assert!(!programs[0].contains("never reached"));

        assert_eq!(extraction.datasets.len(), 1);
        let dataset = &extraction.datasets[0];
        assert_eq!(dataset.code, "R1C1");
        assert_eq!(dataset.filename, "output.csv");
        assert_eq!(dataset.metadata["foo"], Value::from("a"));
    }

    #[test]
    fn last_registration_wins() {
        let runner = CannedRunner::new(
            r#"{"dataset": {"status": "proxy", "registrations": [
                {"filename": "first.csv", "name": "R1C1"},
                {"filename": "second.csv", "name": "R1C1"}
            ]}}"#,
        );
        let extraction = extract_outputs(SCRIPT, &dsl(), &runner).expect("extract outputs");
        assert_eq!(extraction.datasets[0].filename, "second.csv");
        assert_eq!(extraction.ledger.history("dataset").len(), 2);
        assert_eq!(extraction.ledger.symbols().collect::<Vec<_>>(), ["dataset"]);
        assert_eq!(
            extraction.ledger.latest("dataset").map(|meta| meta["filename"].clone()),
            Some(Value::from("second.csv"))
        );
    }

    #[test]
    fn missing_symbol_is_fatal() {
        let runner = CannedRunner::new(r#"{"dataset": {"status": "missing"}}"#);
        let err = extract_outputs(SCRIPT, &dsl(), &runner).expect_err("missing symbol");
        assert!(matches!(err, ScriptError::MissingSymbol { ref symbol } if symbol == "dataset"));
        assert_eq!(err.kind(), ErrorKind::Discovery);

        let runner = CannedRunner::new("{}");
        assert!(matches!(
            extract_outputs(SCRIPT, &dsl(), &runner),
            Err(ScriptError::MissingSymbol { .. })
        ));
    }

    #[test]
    fn foreign_values_are_skipped_and_nothing_left_fails() {
        let runner = CannedRunner::new(r#"{"dataset": {"status": "foreign"}}"#);
        assert!(matches!(
            extract_outputs(SCRIPT, &dsl(), &runner),
            Err(ScriptError::NoExportedDatasets)
        ));
    }

    #[test]
    fn empty_stack_is_an_internal_error() {
        let runner = CannedRunner::new(r#"{"dataset": {"status": "proxy", "registrations": []}}"#);
        assert!(matches!(
            extract_outputs(SCRIPT, &dsl(), &runner),
            Err(ScriptError::EmptyRegistrationStack { .. })
        ));
    }

    #[test]
    fn script_without_registrations_is_rejected() {
        let runner = CannedRunner::new("{}");
        let err = extract_outputs("import pandas\n", &dsl(), &runner).expect_err("no registrations");
        assert!(matches!(err, ScriptError::NoRegistrations));
        assert!(runner.programs.borrow().is_empty());
    }
}
