//! Searchable-name form of identifiers
//!
//! Camel/Pascal-case names are split into underscore-separated lowercase runs
//! before they reach the full-text index, so `setToolTip` is stored as
//! `set_tool_tip` and a query for `set tip` matches it token by token.

use regex::Regex;
use std::sync::OnceLock;

fn camel_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:[A-Z][a-z]+)+").expect("static regex"))
}

/// Convert a name to the form the full-text index is built over.
///
/// Names containing at least one uppercase-then-lowercase run have every
/// uppercase letter replaced by `_` plus its lowercase form. Anything else is
/// returned unchanged.
pub fn searchable(name: &str) -> String {
    if !camel_run().is_match(name) {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_uppercase() {
            out.push('_');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Tokens of a name in searchable form, as the FTS tokenizer would see them
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Build an FTS5 match expression for a user filter.
///
/// Every token of the filter's searchable form becomes a quoted prefix term;
/// terms are implicitly ANDed. Returns `None` when the filter has no
/// alphanumeric content.
pub fn match_expression(filter: &str) -> Option<String> {
    let terms: Vec<String> = tokens(&searchable(filter))
        .into_iter()
        .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case() {
        assert_eq!(searchable("setToolTip"), "set_tool_tip");
        assert_eq!(searchable("setCallTip.py"), "set_call_tip.py");
        assert_eq!(searchable("SetTip"), "_set_tip");
    }

    #[test]
    fn test_passthrough() {
        assert_eq!(searchable("setup.py"), "setup.py");
        assert_eq!(searchable("README.md"), "README.md");
        assert_eq!(searchable("snake_case_name"), "snake_case_name");
        assert_eq!(searchable("HTTP"), "HTTP");
    }

    #[test]
    fn test_runs_recovered_in_order() {
        for name in ["setToolTip", "SetCallTip", "parseHTTPRequest", "a", "x1Y2"] {
            let runs: Vec<String> = searchable(name)
                .split('_')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            // Concatenating the runs gives back the lowercased identifier
            // whenever it was rewritten, and the identifier itself otherwise
            let joined = runs.concat();
            if camel_run().is_match(name) {
                assert_eq!(joined, name.to_lowercase(), "{}", name);
            } else {
                assert_eq!(joined, name, "{}", name);
            }
        }
        assert_eq!(
            searchable("setToolTip").split('_').collect::<Vec<_>>(),
            vec!["set", "tool", "tip"]
        );
    }

    #[test]
    fn test_match_expression() {
        assert_eq!(match_expression("set tip").as_deref(), Some("\"set\"* \"tip\"*"));
        assert_eq!(match_expression("setTip").as_deref(), Some("\"set\"* \"tip\"*"));
        assert_eq!(match_expression("mod.py").as_deref(), Some("\"mod\"* \"py\"*"));
        assert_eq!(match_expression("  _-. "), None);
    }
}
