//! Durable storage consumed by the reconciler.
//!
//! The host supplies a [`StateStore`] — a minimal byte-oriented KV — and
//! the reconciler keeps three JSON values in it:
//!
//! - [`KEY_CONFIGURATION`]: the loader root path ([`RootConfig`]).
//! - [`KEY_STATE`]: the apply state ([`State`](crate::resource::State)).
//! - [`KEY_LAST_APPLIED`]: the last successfully applied commit
//!   ([`CommitInfo`](crate::source::CommitInfo)).
//!
//! [`StoreStateWriter`] adapts a store into the engine's incremental
//! [`StateWriter`], persisting after every state mutation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::State;

/// Storage key for the reconciler configuration record.
pub const KEY_CONFIGURATION: &str = "gitops_configuration";

/// Storage key for the apply state.
pub const KEY_STATE: &str = "gitops_state";

/// Storage key for the last-applied commit record.
pub const KEY_LAST_APPLIED: &str = "gitops_last_applied";

/// Errors from durable storage.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The backend failed.
    #[error("storage backend: {0}")]
    Backend(String),

    /// Storage I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Encoding a value for storage failed.
    #[error("encoding value for key {key:?}: {source}")]
    Encode {
        /// Storage key being written.
        key: String,
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// Decoding a stored value failed.
    #[error("decoding value for key {key:?}: {source}")]
    Decode {
        /// Storage key being read.
        key: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// The configured root path is not a clean relative path.
    #[error("configured path {path:?} is invalid")]
    InvalidRootPath {
        /// The rejected path.
        path: String,
    },
}

/// A minimal byte-oriented key-value store.
pub trait StateStore: Send + Sync {
    /// Reads the value at `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes `value` at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Removes `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Reads and JSON-decodes the value at `key`.
///
/// # Errors
///
/// Returns [`StoreError`] on backend failure or if the stored bytes do
/// not decode.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(bytes) = store.get(key)? else {
        return Ok(None);
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })
}

/// JSON-encodes `value` and writes it at `key`.
///
/// # Errors
///
/// Returns [`StoreError`] on encode or backend failure.
pub fn put_json<T: Serialize>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.put(key, &bytes)
}

/// The reconciler configuration record: where in the repository the
/// resource YAML lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    /// Directory or file path inside the repository; empty means the
    /// repository root.
    #[serde(default)]
    pub path: String,
}

impl RootConfig {
    /// Validates that the configured path is a clean relative path:
    /// no `..`, no `.` segments, no leading slash, no redundant
    /// separators. The empty path is valid and means the repository
    /// root.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRootPath`] otherwise.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.path.is_empty() {
            return Ok(());
        }
        let clean = self.path.trim_end_matches('/') == self.path
            && !self.path.starts_with('/')
            && !self.path.contains("//")
            && self
                .path
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if clean {
            Ok(())
        } else {
            Err(StoreError::InvalidRootPath {
                path: self.path.clone(),
            })
        }
    }

    /// Loads and validates the configuration record, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure, decode failure, or an
    /// invalid stored path.
    pub fn load(store: &dyn StateStore) -> Result<Option<Self>, StoreError> {
        let config: Option<Self> = get_json(store, KEY_CONFIGURATION)?;
        if let Some(config) = &config {
            config.validate()?;
        }
        Ok(config)
    }

    /// Validates and persists the configuration record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on an invalid path or storage failure.
    pub fn save(&self, store: &dyn StateStore) -> Result<(), StoreError> {
        self.validate()?;
        put_json(store, KEY_CONFIGURATION, self)
    }
}

/// Persists engine state mutations.
///
/// The engine calls this after every successful apply, key migration,
/// and delete, before moving to the next resource, so a crash leaves the
/// store reflecting exactly the completed steps.
#[async_trait]
pub trait StateWriter: Send + Sync {
    /// Persists the full state snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persistence fails.
    async fn save_state(&self, state: &State) -> Result<(), StoreError>;
}

/// [`StateWriter`] that persists to a [`StateStore`] under [`KEY_STATE`].
pub struct StoreStateWriter<'a> {
    store: &'a dyn StateStore,
}

impl<'a> StoreStateWriter<'a> {
    /// Creates a writer over the given store.
    #[must_use]
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StateWriter for StoreStateWriter<'_> {
    async fn save_state(&self, state: &State) -> Result<(), StoreError> {
        put_json(self.store, KEY_STATE, state)
    }
}
