//! Template resolution between resources.
//!
//! A string value of the exact form `<name:key>` is rewritten to a value
//! taken from the `response_data` of an already-applied resource. `name`
//! is the referenced resource's effective name; `key` is a dotted path
//! descended through objects (by field) and lists (by decimal index).
//! Anything that is not exactly a template is returned verbatim, and
//! templates are only recognized in string positions; keys are never
//! rewritten.
//!
//! Resolution reads the in-memory state of the current apply run, so a
//! resource that references `<a:...>` must list `a` in its dependencies
//! to be ordered after it.

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::resource::State;

/// Errors from template resolution, reported per resource.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateError {
    /// The referenced effective name has no state entry.
    #[error("template {template:?}: resource {name:?} not in state")]
    ResourceNotInState {
        /// The full template string.
        template: String,
        /// The referenced effective name.
        name: String,
    },

    /// The dotted path did not lead to a value in the referenced
    /// resource's response data.
    #[error("template {template:?}: path {path:?} not found in response_data of {name:?}")]
    PathNotFound {
        /// The full template string.
        template: String,
        /// The dotted path inside the template.
        path: String,
        /// The referenced effective name.
        name: String,
    },
}

/// Recursively resolves templates in `data` against `state`.
///
/// # Errors
///
/// Returns the first [`TemplateError`] encountered, in document order.
pub fn resolve_templates(data: &JsonValue, state: &State) -> Result<JsonValue, TemplateError> {
    match data {
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), resolve_templates(value, state)?);
            }
            Ok(JsonValue::Object(out))
        },
        JsonValue::Array(items) => items
            .iter()
            .map(|item| resolve_templates(item, state))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        JsonValue::String(s) => resolve_string(s, state).map(JsonValue::String),
        other => Ok(other.clone()),
    }
}

/// Resolves a single string: templates are evaluated, everything else is
/// returned unchanged.
fn resolve_string(s: &str, state: &State) -> Result<String, TemplateError> {
    let Some((name, path)) = parse_template(s) else {
        return Ok(s.to_string());
    };

    let Some(entry) = state.resources.get(name) else {
        return Err(TemplateError::ResourceNotInState {
            template: s.to_string(),
            name: name.to_string(),
        });
    };

    let response_data = entry.response_data.as_ref().unwrap_or(&JsonValue::Null);
    let Some(value) = lookup_path(response_data, path) else {
        return Err(TemplateError::PathNotFound {
            template: s.to_string(),
            path: path.to_string(),
            name: name.to_string(),
        });
    };

    Ok(stringify(value))
}

/// Returns `(name, path)` iff `s` is exactly `<name:path>` with both
/// parts non-empty. The name is everything before the first `:`.
fn parse_template(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_prefix('<')?.strip_suffix('>')?;
    let (name, path) = inner.split_once(':')?;
    if name.is_empty() || path.is_empty() {
        return None;
    }
    Some((name, path))
}

/// Descends `value` along the `.`-separated path. Objects are indexed by
/// field name, lists by non-negative decimal index. Any miss, including
/// reaching a scalar before the path is exhausted, yields `None`.
fn lookup_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Stringifies the leaf value a template resolves to.
fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Null => "null".to_string(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}
