use super::{DatasetDsl, DatasetReference, RegistrationRecord};
use crate::config::DslConfig;
use crate::error::ScriptError;
use crate::source;
use regex::Regex;

const DEFAULT_VERSION: &str = "latest";

/// Binding to the Python dataset DSL (`Datasets.<CODE>.get/register`).
pub struct PythonDsl {
    proxy_module: String,
    proxy_name: String,
    stack_method: String,
    consume: Regex,
    version_kw: Regex,
    version_pos: Regex,
    register: Regex,
    filename_kw: Regex,
    save: Regex,
}

impl PythonDsl {
    pub fn new(config: &DslConfig) -> Result<Self, ScriptError> {
        let (proxy_module, proxy_name) = config.proxy_class.rsplit_once('.').ok_or_else(|| {
            ScriptError::InvalidConfig(format!(
                "dsl.proxy_class must be module-qualified, got {}",
                config.proxy_class
            ))
        })?;
        let accessor = regex::escape(&config.accessor);
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|err| ScriptError::InvalidConfig(format!("dsl pattern: {err}")))
        };
        Ok(Self {
            proxy_module: proxy_module.to_string(),
            proxy_name: proxy_name.to_string(),
            stack_method: config.stack_method.clone(),
            consume: compile(&format!(r"\b{accessor}\.([A-Za-z0-9_]+)\.get\(([^)]*)\)"))?,
            version_kw: compile(r#"\bversion\s*=\s*['"]([^'"]*)['"]"#)?,
            version_pos: compile(r#"^\s*['"]([^'"]*)['"]"#)?,
            register: compile(&format!(
                r"^([A-Za-z_][A-Za-z0-9_]*)\s*(?::[^=]+)?=\s*{accessor}\.([A-Za-z0-9_]+)\.register\("
            ))?,
            filename_kw: compile(r"\bfilename\s*=\s*([^,)]+)")?,
            save: compile(r"^([A-Za-z_][A-Za-z0-9_]*)\.save\(")?,
        })
    }

    fn stub_header(&self, function: &str) -> String {
        format!(
            "\n\ndef {function}():\n    import json\n    from {module} import {name} as proxy_type\n    namespace = globals()\n",
            module = self.proxy_module,
            name = self.proxy_name,
        )
    }
}

fn python_literal(value: &impl serde::Serialize) -> String {
    // JSON strings and arrays of strings are valid Python literals.
    serde_json::to_string(value).unwrap_or_else(|_| "None".to_string())
}

impl DatasetDsl for PythonDsl {
    fn consumes(&self, text: &str) -> Vec<DatasetReference> {
        let mut references = Vec::new();
        for line in source::logical_lines(text) {
            for segment in &line.segments {
                for captures in self.consume.captures_iter(&segment.code) {
                    let args = &captures[2];
                    let version = self
                        .version_kw
                        .captures(args)
                        .or_else(|| self.version_pos.captures(args))
                        .map(|found| found[1].to_string())
                        .unwrap_or_else(|| DEFAULT_VERSION.to_string());
                    references.push(DatasetReference {
                        code: captures[1].to_string(),
                        version,
                    });
                }
            }
        }
        references
    }

    fn registrations(&self, text: &str) -> Vec<RegistrationRecord> {
        let mut records: Vec<RegistrationRecord> = Vec::new();
        for statement in source::statements(text) {
            if let Some(captures) = self.register.captures(&statement.code) {
                let symbol = captures[1].to_string();
                let code = captures[2].to_string();
                let filename_expr = self
                    .filename_kw
                    .captures(&statement.code)
                    .map(|found| found[1].trim().to_string());
                match records.iter_mut().find(|record| record.symbol == symbol) {
                    Some(record) => {
                        record.code = code;
                        record.filename_expr = filename_expr;
                        record.registration_index = statement.index;
                        record.line = statement.first_line;
                    }
                    None => records.push(RegistrationRecord {
                        symbol,
                        code,
                        filename_expr,
                        registration_index: statement.index,
                        line: statement.first_line,
                        save_index: None,
                    }),
                }
                continue;
            }
            if let Some(captures) = self.save.captures(&statement.code) {
                if let Some(record) = records
                    .iter_mut()
                    .find(|record| record.symbol == captures[1])
                {
                    record.save_index = Some(statement.index);
                }
            }
        }
        records
    }

    fn inspection_stub(&self, symbols: &[String], report_file: &str) -> String {
        let mut stub = self.stub_header("__sseal_inspect");
        stub.push_str("    report = {}\n");
        stub.push_str(&format!("    for symbol in {}:\n", python_literal(&symbols)));
        stub.push_str("        value = namespace.get(symbol)\n");
        stub.push_str("        if value is None:\n");
        stub.push_str("            report[symbol] = {\"status\": \"missing\"}\n");
        stub.push_str("        elif not isinstance(value, proxy_type):\n");
        stub.push_str("            report[symbol] = {\"status\": \"foreign\"}\n");
        stub.push_str("        else:\n");
        stub.push_str(&format!(
            "            stack = [dict(entry) for entry in value.{}()]\n",
            self.stack_method
        ));
        stub.push_str(
            "            report[symbol] = {\"status\": \"proxy\", \"registrations\": stack}\n",
        );
        stub.push_str(&format!(
            "    with open({}, \"w\", encoding=\"utf-8\") as handle:\n",
            python_literal(&report_file)
        ));
        stub.push_str("        json.dump(report, handle, default=str)\n\n\n__sseal_inspect()\n");
        stub
    }

    fn export_stub(&self, symbols: &[String], side_channel: &str) -> String {
        let mut stub = self.stub_header("__sseal_export");
        stub.push_str("    exported = []\n");
        stub.push_str(&format!("    for symbol in {}:\n", python_literal(&symbols)));
        stub.push_str("        value = namespace.get(symbol)\n");
        stub.push_str("        if value is None:\n");
        stub.push_str("            exported.append({\"symbol\": symbol, \"status\": \"missing\"})\n");
        stub.push_str("        elif not isinstance(value, proxy_type):\n");
        stub.push_str("            exported.append({\"symbol\": symbol, \"status\": \"foreign\"})\n");
        stub.push_str("        else:\n");
        stub.push_str(&format!(
            "            stack = list(value.{}())\n",
            self.stack_method
        ));
        stub.push_str("            if not stack:\n");
        stub.push_str("                exported.append({\"symbol\": symbol, \"status\": \"empty\"})\n");
        stub.push_str("            else:\n");
        stub.push_str(
            "                exported.append({\"symbol\": symbol, \"status\": \"proxy\", \"registration\": dict(stack[-1])})\n",
        );
        stub.push_str(&format!(
            "    with open({}, \"w\", encoding=\"utf-8\") as handle:\n",
            python_literal(&side_channel)
        ));
        stub.push_str("        json.dump(exported, handle, default=str)\n\n\n__sseal_export()\n");
        stub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "\
from argendata_datasets import Datasets #@ git+https://github.com/joangq/argendatafundar-datasets.git
import pandas as pd
import pathlib

x = Datasets.R1C0.get(version='latest')

FILENAME = 'output.csv'
dataset = Datasets.R1C1.register(
    filename=FILENAME,
    foo='a',
    bar=1,
)

dataset.save(pathlib.Path(FILENAME).write_text('Hello, world!'))
print('done')
";

    fn dsl() -> PythonDsl {
        PythonDsl::new(&DslConfig::default()).expect("dsl binding")
    }

    #[test]
    fn consumes_are_found_statically() {
        let references = dsl().consumes(SCRIPT);
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].identity(), "R1C0@latest");
    }

    #[test]
    fn import_alone_is_not_a_consume() {
        assert!(dsl()
            .consumes("from argendata_datasets import Datasets\n")
            .is_empty());
        let positional = dsl().consumes("y = Datasets.R2C3.get('v2')\nz = Datasets.R2C4.get()\n");
        assert_eq!(positional[0].identity(), "R2C3@v2");
        assert_eq!(positional[1].identity(), "R2C4@latest");
    }

    #[test]
    fn registrations_carry_statement_indexes() {
        let records = dsl().registrations(SCRIPT);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.symbol, "dataset");
        assert_eq!(record.code, "R1C1");
        assert_eq!(record.filename_expr.as_deref(), Some("FILENAME"));
        assert_eq!(record.registration_index, 5);
        assert_eq!(record.line, 7);
        assert_eq!(record.save_index, Some(6));
    }

    #[test]
    fn re_registration_keeps_the_final_statement() {
        let text = "\
a = Datasets.R1C1.register(filename='first.csv')
b = 2
a = Datasets.R1C1.register(filename='second.csv')
";
        let records = dsl().registrations(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].registration_index, 2);
        assert_eq!(records[0].line, 2);
        assert_eq!(records[0].filename_expr.as_deref(), Some("'second.csv'"));
    }

    #[test]
    fn stubs_reference_symbols_and_files() {
        let symbols = vec!["dataset".to_string()];
        let inspection = dsl().inspection_stub(&symbols, "__registrations__.json");
        assert!(inspection.contains("from argendata_datasets.dsl.datasets import DatasetProxy as proxy_type"));
        assert!(inspection.contains("for symbol in [\"dataset\"]:"));
        assert!(inspection.contains("value._get_registrations_metadata_stack()"));
        assert!(inspection.contains("open(\"__registrations__.json\""));
        assert!(inspection.ends_with("__sseal_inspect()\n"));

        let export = dsl().export_stub(&symbols, "__produces__.json");
        assert!(export.contains("open(\"__produces__.json\""));
        assert!(export.ends_with("__sseal_export()\n"));
    }

    #[test]
    fn export_stub_reports_every_symbol_status() {
        let symbols = vec!["dataset".to_string(), "other".to_string()];
        let export = dsl().export_stub(&symbols, "__produces__.json");
        assert!(export.contains("for symbol in [\"dataset\",\"other\"]:"));
        for status in ["missing", "foreign", "empty"] {
            assert!(
                export.contains(&format!("{{\"symbol\": symbol, \"status\": \"{status}\"}}")),
                "no {status} entry in:\n{export}"
            );
        }
        assert!(export.contains("\"status\": \"proxy\", \"registration\": dict(stack[-1])"));
    }
}
