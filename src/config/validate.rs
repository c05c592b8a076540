//! Settings validation: unknown keys, misspellings and suspicious values.

use serde_json::{Map, Value};

/// Recognised keys, per section. The empty section is the top level.
const SECTIONS: &[(&str, &[&str])] = &[
    ("", &["logging", "engine"]),
    ("logging", &["format", "level", "file"]),
    (
        "engine",
        &["error_history", "reverse_shutdown", "trace_transitions"],
    ),
];

const LOG_FORMATS: &[&str] = &["pretty", "component", "json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
}

/// One finding about a settings document.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted key path, empty for the document itself.
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(severity: Severity, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Warn => "warning",
            Severity::Error => "error",
        };
        match self.path.as_str() {
            "" => write!(f, "{}: {}", tag, self.message),
            path => write!(f, "{} at `{}`: {}", tag, path, self.message),
        }
    }
}

/// Edit distance between two keys.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// The recognised key closest to `key`, if any is within two edits.
pub fn closest<'a>(key: &str, known: &[&'a str]) -> Option<&'a str> {
    known
        .iter()
        .map(|k| (*k, edit_distance(key, k)))
        .filter(|(_, d)| *d <= 2)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| k)
}

fn section<'v>(root: &'v Map<String, Value>, name: &str) -> Option<&'v Map<String, Value>> {
    if name.is_empty() {
        Some(root)
    } else {
        root.get(name).and_then(Value::as_object)
    }
}

/// Check a raw settings document. An empty result means nothing to report.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let Some(root) = raw.as_object() else {
        return vec![Diagnostic::new(
            Severity::Error,
            "",
            "settings must be a table of sections",
        )];
    };

    let mut found = Vec::new();
    for (name, known) in SECTIONS {
        let Some(table) = section(root, name) else {
            continue;
        };
        for key in table.keys().filter(|k| !known.contains(&k.as_str())) {
            let path = if name.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", name, key)
            };
            let message = match closest(key, known) {
                Some(hint) => format!("unknown key, did you mean `{}`?", hint),
                None => "unknown key".to_string(),
            };
            found.push(Diagnostic::new(Severity::Error, path, message));
        }
    }

    if let Some(format) = raw.pointer("/logging/format").and_then(Value::as_str) {
        if !LOG_FORMATS.contains(&format) {
            found.push(Diagnostic::new(
                Severity::Error,
                "logging.format",
                format!("expected one of {}", LOG_FORMATS.join(", ")),
            ));
        }
    }
    if raw.pointer("/engine/error_history").and_then(Value::as_u64) == Some(0) {
        found.push(Diagnostic::new(
            Severity::Warn,
            "engine.error_history",
            "0 disables the component error channel",
        ));
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn errors(diags: &[Diagnostic]) -> Vec<&Diagnostic> {
        diags
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    #[test]
    fn test_valid_config_reports_nothing() {
        let raw = json!({"logging": {"level": "debug"}, "engine": {"error_history": 8}});
        assert!(validate_config(&raw).is_empty());
    }

    #[test]
    fn test_unknown_top_level_with_suggestion() {
        let diags = validate_config(&json!({"engin": {}}));
        let errs = errors(&diags);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "engin");
        assert!(errs[0].message.contains("did you mean `engine`?"));
    }

    #[test]
    fn test_unknown_nested_field() {
        let diags = validate_config(&json!({"engine": {"reverse_shutdwn": true}}));
        let errs = errors(&diags);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "engine.reverse_shutdwn");
    }

    #[test]
    fn test_unknown_log_format() {
        let diags = validate_config(&json!({"logging": {"format": "xml"}}));
        assert_eq!(errors(&diags)[0].path, "logging.format");
        assert!(validate_config(&json!({"logging": {"format": "json"}})).is_empty());
    }

    #[test]
    fn test_zero_error_history_warns() {
        let diags = validate_config(&json!({"engine": {"error_history": 0}}));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warn);
        assert_eq!(diags[0].path, "engine.error_history");
    }

    #[test]
    fn test_not_an_object() {
        let diags = validate_config(&json!([1, 2]));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Error);
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("engine", "engine"), 0);
        assert_eq!(edit_distance("engin", "engine"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(closest("levle", &["level", "file"]), Some("level"));
        assert_eq!(closest("zzzzzz", &["level"]), None);
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::new(Severity::Warn, "engine.error_history", "low");
        assert_eq!(d.to_string(), "warning at `engine.error_history`: low");
        let d = Diagnostic::new(Severity::Error, "", "bad");
        assert_eq!(d.to_string(), "error: bad");
    }
}
