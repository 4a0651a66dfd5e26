//! External dependency closure of a script.
//!
//! Resolution order: imports, `#'` overrides, standard library removal,
//! `#@` relocations, then the configured known-sources rewrite.
use crate::config::ConfigFlags;
use crate::directive::{self, DEPENDENCY_TOKEN, RELOCATION_TOKEN};
use crate::error::ScriptError;
use crate::source;
use std::collections::BTreeSet;

mod stdlib;

pub fn is_stdlib(name: &str) -> bool {
    stdlib::PYTHON_STDLIB.binary_search(&name).is_ok()
}

/// Compute the deduplicated dependency set of `text`.
pub fn resolve(text: &str, config: &ConfigFlags) -> Result<BTreeSet<String>, ScriptError> {
    let mut dependencies = BTreeSet::new();
    if config.parse_imports {
        dependencies.extend(source::imports(text));
    }
    apply_overrides(text, &mut dependencies)?;
    dependencies.retain(|name| !is_stdlib(name));
    if config.parse_source_relocations {
        apply_relocations(text, &mut dependencies)?;
    }
    apply_known_sources(config, &mut dependencies);
    tracing::debug!(count = dependencies.len(), "dependencies resolved");
    Ok(dependencies)
}

/// `#' +name` adds `name`; `#' name` replaces the one dependency that
/// appears as a word on the same line (or adds it when none does).
fn apply_overrides(text: &str, dependencies: &mut BTreeSet<String>) -> Result<(), ScriptError> {
    let lines: Vec<&str> = text.lines().collect();
    for (index, tags) in directive::scan(text, DEPENDENCY_TOKEN) {
        let line = lines.get(index).copied().unwrap_or_default();
        let words: Vec<&str> = line.split_whitespace().collect();
        for tag in tags {
            let force = tag.starts_with('+');
            let name = tag.trim_start_matches('+');
            if name.is_empty() {
                continue;
            }
            let seen: Vec<String> = dependencies
                .iter()
                .filter(|dependency| words.contains(&dependency.as_str()))
                .cloned()
                .collect();
            if seen.len() > 1 {
                return Err(ScriptError::DependencyCollision {
                    tag: name.to_string(),
                    line: index,
                    text: words.join(" "),
                    candidates: seen,
                });
            }
            if let (false, Some(replaced)) = (force, seen.first()) {
                tracing::debug!(line = index, from = %replaced, to = name, "dependency replaced");
                dependencies.remove(replaced);
            }
            dependencies.insert(name.to_string());
        }
    }
    Ok(())
}

/// `import name #@ locator` turns the bare `name` into `name@locator`.
fn apply_relocations(text: &str, dependencies: &mut BTreeSet<String>) -> Result<(), ScriptError> {
    let lines: Vec<&str> = text.lines().collect();
    for (index, tags) in directive::scan(text, RELOCATION_TOKEN) {
        if tags.is_empty() {
            continue;
        }
        let line = lines.get(index).copied().unwrap_or_default();
        let imports = source::imports(line);
        let name = match imports.as_slice() {
            [name] => name,
            [] => {
                return Err(ScriptError::MissingRelocationImport {
                    line: index,
                    text: line.trim().to_string(),
                })
            }
            _ => {
                return Err(ScriptError::AmbiguousRelocation {
                    line: index,
                    text: line.trim().to_string(),
                    imports: imports.clone(),
                })
            }
        };
        dependencies.remove(name);
        for locator in tags {
            dependencies.insert(format!("{name}@{locator}"));
        }
    }
    Ok(())
}

fn apply_known_sources(config: &ConfigFlags, dependencies: &mut BTreeSet<String>) {
    if config.known_sources.is_empty() {
        return;
    }
    let known: Vec<(String, String)> = dependencies
        .iter()
        .filter_map(|name| {
            config
                .known_sources
                .get(name)
                .map(|qualified| (name.clone(), qualified.clone()))
        })
        .collect();
    for (name, qualified) in known {
        dependencies.remove(&name);
        dependencies.insert(qualified);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const DATASETS_GIT: &str = "git+https://github.com/argendatafundar/datasets.git";

    fn detect() -> ConfigFlags {
        ConfigFlags {
            detect_dependencies: true,
            ..ConfigFlags::default()
        }
    }

    fn resolved(text: &str) -> Vec<String> {
        resolve(text, &detect())
            .expect("resolve dependencies")
            .into_iter()
            .collect()
    }

    #[test]
    fn stdlib_table_is_sorted() {
        assert!(stdlib::PYTHON_STDLIB.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(is_stdlib("pathlib"));
        assert!(!is_stdlib("pandas"));
    }

    #[test]
    fn imports_become_dependencies() {
        assert_eq!(
            resolved("import pandas as pd\nfrom sklearn.datasets import load_iris"),
            vec!["pandas", "sklearn"]
        );
    }

    #[test]
    fn stdlib_only_script_has_no_dependencies() {
        assert!(resolved("import os\nimport json, pathlib\nfrom collections import abc\n").is_empty());
    }

    #[test]
    fn force_add_keeps_existing() {
        assert_eq!(
            resolved("import pandas as pd #' +pyarrow\n"),
            vec!["pandas", "pyarrow"]
        );
    }

    #[test]
    fn replace_swaps_the_import_on_the_line() {
        assert_eq!(resolved("import pypdf #' pymupdf\n"), vec!["pymupdf"]);
        assert_eq!(
            resolved("import pypdf #' pymupdf,+rich\n"),
            vec!["pymupdf", "rich"]
        );
    }

    #[test]
    fn replace_without_match_adds() {
        assert_eq!(
            resolved("import pandas\nx = 1 #' openpyxl\n"),
            vec!["openpyxl", "pandas"]
        );
    }

    #[test]
    fn replace_with_two_candidates_collides() {
        let text = "import pandas\nimport numpy\n# pandas or numpy #' polars\n";
        let err = resolve(text, &detect()).expect_err("collision expected");
        assert_eq!(err.kind(), ErrorKind::Collision);
        match err {
            ScriptError::DependencyCollision {
                line, candidates, ..
            } => {
                assert_eq!(line, 2);
                assert_eq!(candidates, vec!["numpy", "pandas"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn relocation_qualifies_the_import() {
        let text = format!("import pandas as pd\nimport argendata_datasets #@ {DATASETS_GIT}\n");
        assert_eq!(
            resolved(&text),
            vec![
                format!("argendata_datasets@{DATASETS_GIT}"),
                "pandas".to_string()
            ]
        );

        let ssh = "import argendata_datasets #@ git+ssh://git@github.com/argendatafundar/datasets.git\n";
        assert_eq!(
            resolved(ssh),
            vec!["argendata_datasets@git+ssh://git@github.com/argendatafundar/datasets.git"]
        );
    }

    #[test]
    fn relocation_can_be_disabled() {
        let config = ConfigFlags {
            parse_source_relocations: false,
            ..detect()
        };
        let text = format!("import argendata_datasets #@ {DATASETS_GIT}\n");
        let dependencies = resolve(&text, &config).expect("resolve");
        assert!(dependencies.contains("argendata_datasets"));
    }

    #[test]
    fn relocation_rejects_multiple_imports() {
        let err = resolve("import pandas, numpy #@ git+https://example.org/x.git\n", &detect())
            .expect_err("ambiguous relocation");
        assert!(matches!(err, ScriptError::AmbiguousRelocation { line: 0, .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn relocation_requires_an_import_on_its_line() {
        let text = "import pandas\ndata = load() #@ git+https://example.org/x.git\n";
        let err = resolve(text, &detect()).expect_err("relocation without import");
        match &err {
            ScriptError::MissingRelocationImport { line, text } => {
                assert_eq!(*line, 1);
                assert_eq!(text, "data = load() #@ git+https://example.org/x.git");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn optional_imports_in_inline_blocks_are_dependencies() {
        let text = "\
try: import yaml
except ImportError: yaml = None
if True: import requests
";
        assert_eq!(resolved(text), vec!["requests", "yaml"]);
    }

    #[test]
    fn known_sources_rewrite_bare_names() {
        let mut config = detect();
        config.known_sources.insert(
            "argendata_datasets".to_string(),
            format!("argendata_datasets@{DATASETS_GIT}"),
        );
        let dependencies = resolve("import argendata_datasets\n", &config).expect("resolve");
        assert_eq!(
            dependencies.into_iter().collect::<Vec<_>>(),
            vec![format!("argendata_datasets@{DATASETS_GIT}")]
        );
        assert_eq!(resolved("import argendata_datasets\n"), vec!["argendata_datasets"]);
    }

    #[test]
    fn overrides_apply_without_import_parsing() {
        let config = ConfigFlags {
            parse_imports: false,
            ..detect()
        };
        let dependencies = resolve("import pandas #' +pyarrow\n", &config).expect("resolve");
        assert_eq!(dependencies.into_iter().collect::<Vec<_>>(), vec!["pyarrow"]);
    }
}
