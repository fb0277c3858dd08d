//! `{{ var }}` placeholder rendering
//!
//! Rendering is strict: a reference that does not resolve fails with
//! `Error::Template` naming the key and the template. An empty string is
//! never substituted for a missing value.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;

use crate::common::{Error, Result};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern is valid")
});

/// A source of template variables
pub trait Variables {
    /// Resolve `key` to its textual form, or `None` if it is not defined
    fn lookup(&self, key: &str) -> Option<Cow<'_, str>>;
}

/// Textual form of a variable value. `null` counts as undefined.
pub fn value_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        other => Some(Cow::Owned(other.to_string())),
    }
}

impl Variables for IndexMap<String, Value> {
    fn lookup(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(key).and_then(value_text)
    }
}

impl Variables for HashMap<String, Value> {
    fn lookup(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(key).and_then(value_text)
    }
}

impl Variables for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(key).map(|s| Cow::Borrowed(s.as_str()))
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Expand every `{{ var }}` in `template` from `vars`
pub fn render(template: &str, vars: &dyn Variables) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).ok_or_else(|| Error::Internal("empty capture".to_string()))?;
        let key = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();

        if !is_identifier(key) {
            return Err(Error::template(key, template));
        }
        let value = vars
            .lookup(key)
            .ok_or_else(|| Error::template(key, template))?;

        out.push_str(&template[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Names referenced by `template`, in order of first appearance
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        if let Some(m) = caps.get(1) {
            let key = m.as_str().trim().to_string();
            if !names.contains(&key) {
                names.push(key);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_simple() {
        let v = vars(&[("name", json!("x"))]);
        assert_eq!(render("echo {{name}}", &v).unwrap(), "echo x");
    }

    #[test]
    fn test_render_tolerates_inner_whitespace() {
        let v = vars(&[("host", json!("db1")), ("port", json!(5432))]);
        assert_eq!(
            render("psql -h {{ host }} -p {{port }}", &v).unwrap(),
            "psql -h db1 -p 5432"
        );
    }

    #[test]
    fn test_render_missing_names_key() {
        let v = vars(&[]);
        let err = render("echo {{missing}}", &v).unwrap_err();
        match err {
            Error::Template { key, template } => {
                assert_eq!(key, "missing");
                assert_eq!(template, "echo {{missing}}");
            }
            other => panic!("Expected Template error, got {other:?}"),
        }
    }

    #[test]
    fn test_null_is_not_substituted() {
        let v = vars(&[("target", Value::Null)]);
        assert!(matches!(
            render("rm -rf /data/{{target}}", &v),
            Err(Error::Template { .. })
        ));
    }

    #[test]
    fn test_malformed_placeholder_fails() {
        let v = vars(&[("a", json!(1))]);
        assert!(render("echo {{ a b }}", &v).is_err());
        assert!(render("echo {{}}", &v).is_err());
    }

    #[test]
    fn test_render_is_idempotent_and_leaves_plain_text() {
        let v = vars(&[("n", json!(3)), ("ok", json!(true))]);
        let first = render("count={{n}} ok={{ok}} {single}", &v).unwrap();
        let second = render("count={{n}} ok={{ok}} {single}", &v).unwrap();
        assert_eq!(first, "count=3 ok=true {single}");
        assert_eq!(first, second);
    }

    #[test]
    fn test_placeholders_deduplicates() {
        assert_eq!(
            placeholders("{{a}} {{ b }} {{a}}"),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
