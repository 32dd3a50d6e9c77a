//! Placeholder detection

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Leading variable path of a `{{ ... }}` expression (filters and calls are ignored)
static JINJA_PARAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{-?\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)")
        .expect("valid regex")
});

/// Names bound by the template itself: `{% for a, b in ... %}`, `{% set x = ... %}`
static BOUND_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\{%-?\s*(?:for\s+([A-Za-z_][A-Za-z0-9_]*)(?:\s*,\s*([A-Za-z_][A-Za-z0-9_]*))?\s+in\b|set\s+([A-Za-z_][A-Za-z0-9_]*))",
    )
    .expect("valid regex")
});

/// `${name}` string-template placeholder
static STRING_PARAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex")
});

/// Dotted identifier path such as `params.PROJECT`
static PARAM_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid regex")
});

/// Whether `param` is a plain dotted variable path rather than an expression
pub fn is_param_path(param: &str) -> bool {
    PARAM_PATH_RE.is_match(param)
}

/// Check if text contains Jinja or `${name}` template syntax
pub fn has_template_syntax(text: &str) -> bool {
    text.contains("{{") || text.contains("{%") || text.contains("{#") || STRING_PARAM_RE.is_match(text)
}

/// Dotted variable names used in `{{ }}` expressions, sorted and unique
pub fn jinja_params(text: &str) -> Vec<String> {
    JINJA_PARAM_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Names used in `${name}` placeholders, sorted and unique
pub fn string_template_params(text: &str) -> Vec<String> {
    STRING_PARAM_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Variables the template binds itself (loop targets, `set`, `loop`)
pub fn bound_names(text: &str) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = BOUND_NAME_RE
        .captures_iter(text)
        .flat_map(|caps| {
            [caps.get(1), caps.get(2), caps.get(3)]
                .into_iter()
                .flatten()
                .map(|m| m.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    if !names.is_empty() {
        names.insert("loop".to_string());
    }
    names
}

/// Parameters a template expects from the mapping: `{{ }}` paths whose root
/// the template does not bind itself
pub fn free_jinja_params(text: &str) -> Vec<String> {
    let bound = bound_names(text);
    jinja_params(text)
        .into_iter()
        .filter(|param| {
            let root = param.split('.').next().unwrap_or(param);
            !bound.contains(root)
        })
        .collect()
}

/// Every placeholder name of either syntax, sorted and unique
pub fn all_params(text: &str) -> Vec<String> {
    free_jinja_params(text)
        .into_iter()
        .chain(string_template_params(text))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Parameter skeleton with `null` leaves
///
/// `["params.PROJECT", "DATE"]` becomes `{DATE: null, params: {PROJECT: null}}`,
/// ready for a human to fill in.
pub fn nested_skeleton(params: &[String]) -> BTreeMap<String, Value> {
    let mut root = Map::new();
    for param in params {
        insert_path(&mut root, param, Value::Null);
    }
    root.into_iter().collect()
}

/// Set `value` at a dotted path, creating intermediate objects
///
/// An existing scalar on the path is replaced by an object.
pub(crate) fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = root;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }

        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
}
