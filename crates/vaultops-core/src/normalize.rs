//! Canonicalization of namespaces, paths, and decoded YAML values.
//!
//! Resource identity and change detection both depend on a stable
//! representation: the same logical resource must normalize to the same
//! namespace/path pair and the same value tree no matter how the YAML
//! decoder happened to shape it. All digests and template lookups operate
//! on the output of [`normalize_value`].

use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

/// Normalizes a namespace string: leading slashes are stripped, and a
/// non-empty namespace always ends with exactly the `/` it carries into
/// the effective name.
#[must_use]
pub fn normalize_namespace(s: &str) -> String {
    let s = s.trim_start_matches('/');
    if s.is_empty() {
        return String::new();
    }
    if s.ends_with('/') {
        s.to_string()
    } else {
        format!("{s}/")
    }
}

/// Normalizes an API path: leading and trailing slashes are stripped.
#[must_use]
pub fn normalize_path(s: &str) -> String {
    s.trim_matches('/').to_string()
}

/// Recursively coerces a decoded YAML value into the JSON value tree used
/// for digests, request bodies, and template resolution.
///
/// Mapping keys that are not strings are replaced with the empty string
/// (the linter rejects such documents before they reach the engine; this
/// keeps the coercion total). List order is preserved. YAML tags are
/// dropped. Non-finite floats have no JSON representation and collapse to
/// null.
#[must_use]
pub fn normalize_value(value: &YamlValue) -> JsonValue {
    match value {
        YamlValue::Null => JsonValue::Null,
        YamlValue::Bool(b) => JsonValue::Bool(*b),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                JsonValue::from(i)
            } else if let Some(u) = n.as_u64() {
                JsonValue::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(JsonValue::Null, JsonValue::Number)
            }
        },
        YamlValue::String(s) => JsonValue::String(s.clone()),
        YamlValue::Sequence(items) => {
            JsonValue::Array(items.iter().map(normalize_value).collect())
        },
        YamlValue::Mapping(mapping) => {
            let mut out = serde_json::Map::new();
            for (key, val) in mapping {
                let key = key.as_str().unwrap_or("").to_string();
                out.insert(key, normalize_value(val));
            }
            JsonValue::Object(out)
        },
        YamlValue::Tagged(tagged) => normalize_value(&tagged.value),
    }
}
