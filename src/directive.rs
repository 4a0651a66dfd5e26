//! Line-level directives embedded in comments.
//!
//! A directive is a token prefix followed by comma separated tags. The
//! scanner is token-agnostic; each directive kind only differs by prefix.
use std::collections::{BTreeMap, BTreeSet};

/// Configuration flags to force on (`#% detect_dependencies`).
pub const CONFIG_TOKEN: &str = "#%";
/// Dependency overrides (`#' +pyarrow`, `#' pymupdf`).
pub const DEPENDENCY_TOKEN: &str = "#'";
/// Source relocation for the import on the same line.
pub const RELOCATION_TOKEN: &str = "#@";
/// Pointer to an environment manifest.
pub const ENVIRONMENT_TOKEN: &str = "#^";

/// Tags found per line index, for a single token.
pub type Directives = BTreeMap<usize, BTreeSet<String>>;

/// Collect the tags following `token` on every line that contains it.
///
/// Whitespace inside the tag text is removed before splitting on commas and
/// empty tags are dropped, so `#% a , b` and `#%a,b` scan the same.
pub fn scan(text: &str, token: &str) -> Directives {
    let mut directives = Directives::new();
    for (index, line) in text.lines().enumerate() {
        let Some(tail) = line.split(token).nth(1) else {
            continue;
        };
        let compact: String = tail.chars().filter(|ch| !ch.is_whitespace()).collect();
        let tags = directives.entry(index).or_default();
        tags.extend(
            compact
                .split(',')
                .filter(|tag| !tag.is_empty())
                .map(str::to_string),
        );
    }
    directives
}

/// Union of every tag for `token`, regardless of line.
pub fn all_tags(text: &str, token: &str) -> BTreeSet<String> {
    scan(text, token).into_values().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_collects_tags_per_line() {
        let text = "import pandas as pd #' +pyarrow\nx = 1\nimport pypdf #' pymupdf, +rich\n";
        let directives = scan(text, DEPENDENCY_TOKEN);
        assert_eq!(directives.len(), 2);
        assert_eq!(
            directives[&0].iter().collect::<Vec<_>>(),
            vec!["+pyarrow"]
        );
        assert_eq!(
            directives[&2].iter().cloned().collect::<Vec<_>>(),
            vec!["+rich".to_string(), "pymupdf".to_string()]
        );
    }

    #[test]
    fn scan_is_idempotent() {
        let text = "#% detect_dependencies,  detect_input_datasets\n#% parse_environment\n";
        assert_eq!(scan(text, CONFIG_TOKEN), scan(text, CONFIG_TOKEN));
    }

    #[test]
    fn scan_ignores_other_tokens_and_empty_tags() {
        let text = "from lib import Datasets #@ git+https://example.org/lib.git\n#'\n";
        assert!(scan(text, CONFIG_TOKEN).is_empty());
        let relocations = scan(text, RELOCATION_TOKEN);
        assert!(relocations[&0].contains("git+https://example.org/lib.git"));
        assert!(scan(text, DEPENDENCY_TOKEN)[&1].is_empty());
    }

    #[test]
    fn all_tags_unions_lines() {
        let text = "#% detect_dependencies\n\n#% detect_input_datasets, detect_dependencies\n";
        let tags = all_tags(text, CONFIG_TOKEN);
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("detect_input_datasets"));
    }
}
