//! The apply engine.
//!
//! One call to [`apply`] takes a linted batch and the prior state, and
//! drives the target to match the batch: resources are visited in
//! dependency order, templates are resolved against the in-memory state
//! of the run, unchanged resources are skipped by digest, renamed-but-
//! unchanged resources are migrated in state without touching the
//! target, everything else is created or updated over HTTP, and keys
//! that disappeared from the batch are swept with DELETE requests.
//!
//! State is persisted through the [`StateWriter`] after every mutation,
//! before the next resource is touched, so a crash mid-batch loses no
//! completed work and repeats none. There is no rollback: an aborting
//! error leaves state reflecting exactly the steps that succeeded.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::digest::{data_digest, revision_for_digest};
use crate::normalize::normalize_value;
use crate::order::{CycleError, apply_order, delete_order};
use crate::resource::{Resource, State, StateResource};
use crate::store::{StateWriter, StoreError};
use crate::template::{TemplateError, resolve_templates};

/// Marker header identifying reconciler traffic.
const HEADER_REQUEST: &str = "X-Vault-Request";
/// Credential header.
const HEADER_TOKEN: &str = "X-Vault-Token";
/// Tenant header, sent when a resource has a namespace.
const HEADER_NAMESPACE: &str = "X-Vault-Namespace";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The HTTP API the engine applies resources to.
#[derive(Debug, Clone)]
pub struct Target {
    endpoint: String,
    credential: SecretString,
}

impl Target {
    /// Creates a target. Trailing slashes on the endpoint are ignored.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, credential: SecretString) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credential,
        }
    }

    /// The endpoint without trailing slash.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Errors from one engine run.
///
/// Per-resource variants are subject to the resource's
/// `ignore_failures`: when set, the failure is logged and the batch
/// continues; otherwise the error aborts the batch with all prior
/// progress already persisted.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApplyError {
    /// The target endpoint is empty.
    #[error("target endpoint is required")]
    MissingEndpoint,

    /// The target credential is empty.
    #[error("target credential is required")]
    MissingCredential,

    /// Building the HTTP client failed.
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),

    /// The batch's dependency graph is cyclic.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// Template resolution failed for a resource.
    #[error("resource {resource}: {source}")]
    Template {
        /// Namespace-qualified path of the resource.
        resource: String,
        /// Underlying template error.
        #[source]
        source: TemplateError,
    },

    /// Encoding a request body failed.
    #[error("resource {resource}: json encode: {source}")]
    Encode {
        /// Namespace-qualified path of the resource.
        resource: String,
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// The request could not be sent or the response not read.
    #[error("resource {resource}: request: {source}")]
    Transport {
        /// Namespace-qualified path of the resource.
        resource: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The target answered an apply request with a non-2xx status.
    #[error("resource {resource}: {status}\n{body}")]
    Api {
        /// Namespace-qualified path of the resource.
        resource: String,
        /// Response status.
        status: StatusCode,
        /// Trimmed response body.
        body: String,
    },

    /// Persisting state after a successful apply failed.
    #[error("resource {resource}: save state: {source}")]
    State {
        /// Namespace-qualified path of the resource.
        resource: String,
        /// Underlying storage error.
        #[source]
        source: StoreError,
    },

    /// Persisting state after a key migration failed.
    #[error("resource {resource}: save state (migrate key): {source}")]
    MigrateState {
        /// Namespace-qualified path of the resource.
        resource: String,
        /// Underlying storage error.
        #[source]
        source: StoreError,
    },

    /// A DELETE could not be sent.
    #[error("delete {resource}: request: {source}")]
    DeleteTransport {
        /// Namespace-qualified path of the removed resource.
        resource: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The target answered a DELETE with a non-2xx, non-tombstone
    /// status.
    #[error("delete {resource}: {status}\n{body}")]
    Delete {
        /// Namespace-qualified path of the removed resource.
        resource: String,
        /// Response status.
        status: StatusCode,
        /// Trimmed response body.
        body: String,
    },

    /// Persisting state after a delete failed.
    #[error("delete {resource}: save state: {source}")]
    DeleteState {
        /// Namespace-qualified path of the removed resource.
        resource: String,
        /// Underlying storage error.
        #[source]
        source: StoreError,
    },

    /// Cancellation was observed between resources.
    #[error("apply cancelled")]
    Cancelled,
}

/// Applies a batch to the target and reconciles state.
///
/// See the module docs for the pass structure. `state` is mutated in
/// place and persisted incrementally through `writer`; `cancel` is
/// checked between resources.
///
/// # Errors
///
/// Returns [`ApplyError`]. Pre-flight failures (endpoint, credential,
/// cycle) abort before any network work; per-resource failures abort
/// unless the resource opted into `ignore_failures`.
pub async fn apply(
    resources: &[Resource],
    target: &Target,
    state: &mut State,
    writer: &dyn StateWriter,
    cancel: &CancelFlag,
) -> Result<(), ApplyError> {
    let endpoint = target.endpoint.trim_end_matches('/');
    if endpoint.is_empty() {
        return Err(ApplyError::MissingEndpoint);
    }
    if target.credential.expose_secret().is_empty() {
        return Err(ApplyError::MissingCredential);
    }

    let order = apply_order(resources)?;
    let current_keys: HashSet<String> = resources.iter().map(Resource::key).collect();

    let client = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(ApplyError::Client)?;

    for idx in order {
        if cancel.is_cancelled() {
            return Err(ApplyError::Cancelled);
        }
        let r = &resources[idx];
        if let Err(err) = apply_one(&client, endpoint, target, r, state, writer).await {
            resource_failure(err, r.ignore_failures)?;
        }
    }

    sweep_removed(&client, endpoint, target, &current_keys, state, writer, cancel).await
}

/// Creates or updates a single resource, including the digest
/// short-circuit and key migration. Returns per-resource errors for the
/// caller to route through `ignore_failures`.
async fn apply_one(
    client: &Client,
    endpoint: &str,
    target: &Target,
    r: &Resource,
    state: &mut State,
    writer: &dyn StateWriter,
) -> Result<(), ApplyError> {
    let key = r.key();
    let label = format!("{}{}", r.namespace, r.path);

    let resolved = resolve_templates(&normalize_value(&r.data), state).map_err(|source| {
        ApplyError::Template {
            resource: label.clone(),
            source,
        }
    })?;
    let digest = data_digest(&resolved, revision_for_digest(r.revision));

    if state
        .resources
        .get(&key)
        .is_some_and(|prev| prev.data_digest == digest)
    {
        debug!(resource = %key, "digest unchanged; skipping");
        return Ok(());
    }

    // The key may have moved: the author added or renamed `name` without
    // changing the resource. Matching {namespace, path} with an equal
    // digest migrates the entry instead of re-applying, preserving
    // response_data for templates.
    if !state.resources.contains_key(&key) {
        if let Some((old_key, prev)) = state.find_by_ns_path(&r.namespace, &r.path) {
            if prev.data_digest == digest {
                state.resources.insert(
                    key.clone(),
                    StateResource {
                        data_digest: prev.data_digest,
                        dependencies: prev.dependencies,
                        ignore_failures: prev.ignore_failures,
                        response_data: prev.response_data,
                        namespace: r.namespace.clone(),
                        path: r.path.clone(),
                    },
                );
                state.resources.remove(&old_key);
                info!(old_key = %old_key, new_key = %key, "migrated state key");
                return writer.save_state(state).await.map_err(|source| {
                    ApplyError::MigrateState {
                        resource: label,
                        source,
                    }
                });
            }
        }
    }

    let url = format!("{endpoint}/v1/{}", r.path.trim_start_matches('/'));
    let method = if r.method.trim().eq_ignore_ascii_case("GET") {
        Method::GET
    } else {
        Method::POST
    };

    let mut request = client
        .request(method.clone(), &url)
        .header(HEADER_REQUEST, "true")
        .header(HEADER_TOKEN, target.credential.expose_secret());
    if !r.namespace.is_empty() {
        request = request.header(HEADER_NAMESPACE, r.namespace.as_str());
    }
    if method == Method::POST {
        let body = serde_json::to_vec(&resolved).map_err(|source| ApplyError::Encode {
            resource: label.clone(),
            source,
        })?;
        if !body.is_empty() {
            request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
        }
        request = request.body(body);
    }

    let response = request.send().await.map_err(|source| ApplyError::Transport {
        resource: label.clone(),
        source,
    })?;
    let status = response.status();
    let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();

    if !status.is_success() {
        return Err(ApplyError::Api {
            resource: label,
            status,
            body: String::from_utf8_lossy(&body).trim().to_string(),
        });
    }

    state.resources.insert(
        key.clone(),
        StateResource {
            data_digest: digest,
            dependencies: r.dependencies.clone(),
            ignore_failures: r.ignore_failures,
            response_data: extract_response_data(&body),
            namespace: r.namespace.clone(),
            path: r.path.clone(),
        },
    );
    info!(resource = %key, %status, "applied");
    writer
        .save_state(state)
        .await
        .map_err(|source| ApplyError::State {
            resource: label,
            source,
        })
}

/// Deletes every state key that is no longer in the batch, dependents
/// first. 404 and 405 are tombstones: the path is already gone or does
/// not support DELETE, and the entry is dropped from state either way.
async fn sweep_removed(
    client: &Client,
    endpoint: &str,
    target: &Target,
    current_keys: &HashSet<String>,
    state: &mut State,
    writer: &dyn StateWriter,
    cancel: &CancelFlag,
) -> Result<(), ApplyError> {
    let removed: Vec<String> = state
        .resources
        .keys()
        .filter(|key| !current_keys.contains(*key))
        .cloned()
        .collect();

    for key in delete_order(state, &removed) {
        if cancel.is_cancelled() {
            return Err(ApplyError::Cancelled);
        }
        let Some(entry) = state.resources.get(&key) else {
            continue;
        };
        let namespace = entry.namespace.clone();
        let path = entry.path.clone();
        let ignore_failures = entry.ignore_failures;
        let label = format!("{namespace}{path}");

        let url = format!("{endpoint}/v1/{}", path.trim_start_matches('/'));
        let mut request = client
            .delete(&url)
            .header(HEADER_REQUEST, "true")
            .header(HEADER_TOKEN, target.credential.expose_secret());
        if !namespace.is_empty() {
            request = request.header(HEADER_NAMESPACE, namespace.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(source) => {
                resource_failure(
                    ApplyError::DeleteTransport {
                        resource: label,
                        source,
                    },
                    ignore_failures,
                )?;
                continue;
            },
        };
        let status = response.status();
        let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();

        if status.is_success()
            || status == StatusCode::NOT_FOUND
            || status == StatusCode::METHOD_NOT_ALLOWED
        {
            if status.is_success() {
                info!(resource = %key, "deleted");
            } else {
                info!(resource = %key, %status, "tombstone response; dropping from state");
            }
            state.resources.remove(&key);
            if let Err(source) = writer.save_state(state).await {
                resource_failure(
                    ApplyError::DeleteState {
                        resource: label,
                        source,
                    },
                    ignore_failures,
                )?;
            }
        } else {
            resource_failure(
                ApplyError::Delete {
                    resource: label,
                    status,
                    body: String::from_utf8_lossy(&body).trim().to_string(),
                },
                ignore_failures,
            )?;
        }
    }

    Ok(())
}

/// Routes a per-resource failure: swallowed with a warning when the
/// resource opted into `ignore_failures`, propagated otherwise.
fn resource_failure(err: ApplyError, ignore_failures: bool) -> Result<(), ApplyError> {
    if ignore_failures {
        warn!(error = %err, "ignoring resource failure");
        Ok(())
    } else {
        Err(err)
    }
}

/// Pulls the `data` sub-object out of a 2xx JSON response body, when
/// there is one.
fn extract_response_data(body: &[u8]) -> Option<JsonValue> {
    if body.is_empty() {
        return None;
    }
    let parsed: JsonValue = serde_json::from_slice(body).ok()?;
    parsed.get("data").cloned()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::store::tests::MemoryStore;
    use crate::store::{StateStore, StoreStateWriter};

    fn resource(name: &str, deps: &[&str]) -> Resource {
        Resource {
            path: format!("kv1/{name}"),
            data: serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
            namespace: String::new(),
            name: name.to_string(),
            revision: 0,
            dependencies: deps.iter().map(ToString::to_string).collect(),
            ignore_failures: false,
            method: String::new(),
        }
    }

    fn target() -> Target {
        Target::new("http://127.0.0.1:9", SecretString::new("token".to_string()))
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_fatal() {
        let store = MemoryStore::default();
        let writer = StoreStateWriter::new(&store);
        let t = Target::new("", SecretString::new("token".to_string()));
        let err = apply(&[], &t, &mut State::default(), &writer, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::MissingEndpoint));
    }

    #[tokio::test]
    async fn test_missing_credential_is_fatal() {
        let store = MemoryStore::default();
        let writer = StoreStateWriter::new(&store);
        let t = Target::new("http://127.0.0.1:9", SecretString::new(String::new()));
        let err = apply(&[], &t, &mut State::default(), &writer, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::MissingCredential));
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_any_request() {
        let store = MemoryStore::default();
        let writer = StoreStateWriter::new(&store);
        let batch = vec![resource("x", &["y"]), resource("y", &["x"])];
        let err = apply(
            &batch,
            &target(),
            &mut State::default(),
            &writer,
            &CancelFlag::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApplyError::Cycle(_)));
        // Nothing was persisted: the batch never started.
        assert!(store.get(crate::store::KEY_STATE).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_observed_before_first_resource() {
        let store = MemoryStore::default();
        let writer = StoreStateWriter::new(&store);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let batch = vec![resource("a", &[])];
        let err = apply(&batch, &target(), &mut State::default(), &writer, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Cancelled));
    }

    #[tokio::test]
    async fn test_template_error_respects_ignore_failures() {
        let store = MemoryStore::default();
        let writer = StoreStateWriter::new(&store);

        let mut bad = resource("a", &[]);
        bad.data = serde_yaml::from_str("token: '<ghost:x>'").unwrap();

        let err = apply(
            &[bad.clone()],
            &target(),
            &mut State::default(),
            &writer,
            &CancelFlag::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApplyError::Template { .. }));

        bad.ignore_failures = true;
        apply(
            &[bad],
            &target(),
            &mut State::default(),
            &writer,
            &CancelFlag::new(),
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_target_trims_trailing_slash() {
        let t = Target::new("http://vault:8200/", SecretString::new("t".to_string()));
        assert_eq!(t.endpoint(), "http://vault:8200");
    }

    #[test]
    fn test_extract_response_data() {
        assert_eq!(extract_response_data(b""), None);
        assert_eq!(extract_response_data(b"not json"), None);
        assert_eq!(extract_response_data(b"{\"other\": 1}"), None);
        assert_eq!(
            extract_response_data(b"{\"data\": {\"token\": \"T\"}}"),
            Some(serde_json::json!({"token": "T"}))
        );
        // A non-object top level has no data member.
        assert_eq!(extract_response_data(b"[1, 2]"), None);
    }

    #[test]
    fn test_error_messages_name_the_resource() {
        let err = ApplyError::Api {
            resource: "team/kv1/s".to_string(),
            status: StatusCode::FORBIDDEN,
            body: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "resource team/kv1/s: 403 Forbidden\npermission denied"
        );
    }
}
