//! The declarative resource model and the persisted apply state.
//!
//! A [`Resource`] is one YAML document from the configuration repository:
//! an API path, a request body, and enough metadata to order it against
//! its peers. A [`State`] is the durable record of what the engine has
//! already applied, keyed by [effective name](Resource::effective_name).
//!
//! # Effective names
//!
//! Every resource has exactly one state key. When the author sets `name`
//! it is used verbatim; otherwise the key is derived from the normalized
//! namespace and path, so unnamed resources stay stable across formatting
//! changes such as leading slashes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use crate::normalize::{normalize_namespace, normalize_path};

/// One declarative resource, decoded from a YAML document.
#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    /// Target API path with path parameters substituted, without the
    /// `/v1/` prefix.
    #[serde(default)]
    pub path: String,

    /// Request body fields, per the target API's schema for `path`.
    /// Ignored for `GET` resources.
    #[serde(default)]
    pub data: YamlValue,

    /// Logical tenant; sent as the `X-Vault-Namespace` header when
    /// non-empty.
    #[serde(default)]
    pub namespace: String,

    /// Optional explicit state key.
    #[serde(default)]
    pub name: String,

    /// Forces a re-apply of otherwise unchanged `data` when bumped.
    /// Participates in the digest and is never sent to the target.
    #[serde(default)]
    pub revision: i64,

    /// Effective names that must be applied before this resource.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// When true, failures on this resource are logged and the rest of
    /// the batch continues.
    #[serde(default)]
    pub ignore_failures: bool,

    /// `GET` or `POST` (the default).
    #[serde(default)]
    pub method: String,
}

impl Resource {
    /// Returns the unique name for this resource: `name` if set,
    /// otherwise normalized namespace + normalized path.
    #[must_use]
    pub fn effective_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        let ns = normalize_namespace(&self.namespace);
        let path = normalize_path(&self.path);
        if ns.is_empty() {
            path
        } else {
            format!("{ns}{path}")
        }
    }

    /// The state key for this resource. Unique within a linted batch.
    #[must_use]
    pub fn key(&self) -> String {
        self.effective_name()
    }

    /// Normalizes `namespace` and `path` in place. The loader calls this
    /// on every parsed document so the engine and state only ever see
    /// normalized pairs.
    pub fn normalize(&mut self) {
        self.namespace = normalize_namespace(&self.namespace);
        self.path = normalize_path(&self.path);
    }
}

/// Per-key record of the last successful apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResource {
    /// Hex SHA-256 over the digest envelope of the resolved data and
    /// revision.
    pub data_digest: String,

    /// Dependencies as they were applied; drives the delete sweep order.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Whether failures on this key were ignorable at apply time.
    #[serde(default)]
    pub ignore_failures: bool,

    /// The `data` sub-object of the last successful response, normalized.
    /// Consumed by template resolution in later batches.
    #[serde(default)]
    pub response_data: Option<JsonValue>,

    /// Normalized namespace at last apply.
    #[serde(default)]
    pub namespace: String,

    /// Normalized path at last apply.
    #[serde(default)]
    pub path: String,
}

/// The persisted apply state: one [`StateResource`] per effective name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Applied resources by effective name. Ordered so persistence and
    /// sweeps are deterministic.
    #[serde(default)]
    pub resources: BTreeMap<String, StateResource>,
}

impl State {
    /// Returns the state key and entry whose normalized namespace/path
    /// pair matches the given one, if any.
    ///
    /// This is the secondary identity used for key migration: when the
    /// author adds or changes `name` without touching the resource
    /// itself, the old entry is found here by its location.
    #[must_use]
    pub fn find_by_ns_path(&self, namespace: &str, path: &str) -> Option<(String, StateResource)> {
        let ns = normalize_namespace(namespace);
        let path = normalize_path(path);
        self.resources
            .iter()
            .find(|(_, entry)| {
                normalize_namespace(&entry.namespace) == ns && normalize_path(&entry.path) == path
            })
            .map(|(key, entry)| (key.clone(), entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str, namespace: &str, path: &str) -> Resource {
        Resource {
            path: path.to_string(),
            data: YamlValue::Null,
            namespace: namespace.to_string(),
            name: name.to_string(),
            revision: 0,
            dependencies: Vec::new(),
            ignore_failures: false,
            method: String::new(),
        }
    }

    #[test]
    fn test_effective_name_prefers_explicit_name() {
        let r = resource("my-name", "team", "kv1/secret");
        assert_eq!(r.effective_name(), "my-name");
    }

    #[test]
    fn test_effective_name_from_namespace_and_path() {
        let r = resource("", "team", "/kv1/secret/");
        assert_eq!(r.effective_name(), "team/kv1/secret");

        let r = resource("", "", "kv1/secret");
        assert_eq!(r.effective_name(), "kv1/secret");
    }

    #[test]
    fn test_resource_yaml_defaults() {
        let r: Resource = serde_yaml::from_str("path: sys/policy/dev\ndata: {}").unwrap();
        assert_eq!(r.path, "sys/policy/dev");
        assert_eq!(r.revision, 0);
        assert!(r.dependencies.is_empty());
        assert!(!r.ignore_failures);
        assert_eq!(r.method, "");
    }

    #[test]
    fn test_find_by_ns_path_normalizes_both_sides() {
        let mut state = State::default();
        state.resources.insert(
            "k".to_string(),
            StateResource {
                data_digest: "d".to_string(),
                dependencies: Vec::new(),
                ignore_failures: false,
                response_data: None,
                namespace: "/team".to_string(),
                path: "/kv1/secret/".to_string(),
            },
        );

        let found = state.find_by_ns_path("team/", "kv1/secret");
        assert_eq!(found.map(|(key, _)| key), Some("k".to_string()));
        assert!(state.find_by_ns_path("other", "kv1/secret").is_none());
    }

    #[test]
    fn test_state_round_trips_as_json() {
        let mut state = State::default();
        state.resources.insert(
            "b".to_string(),
            StateResource {
                data_digest: "abc".to_string(),
                dependencies: vec!["a".to_string()],
                ignore_failures: true,
                response_data: Some(serde_json::json!({"token": "T"})),
                namespace: "team/".to_string(),
                path: "kv1/s".to_string(),
            },
        );

        let bytes = serde_json::to_vec(&state).unwrap();
        let decoded: State = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, state);
    }
}
