//! Host configuration.
//!
//! The daemon is configured from a single TOML file. Secrets never live
//! in the file: the API token and the optional git password are read
//! from environment variables named by the config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use vaultops_core::store::RootConfig;

/// Errors from loading or validating the configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Reading the file failed.
    #[error("reading {path}: {source}")]
    Read {
        /// Path of the configuration file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("parsing {path}: {source}")]
    Parse {
        /// Path of the configuration file.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A required field is missing or a value is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A referenced environment variable is unset or empty.
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Repository to watch.
    pub git: GitConfig,

    /// Signature requirements for commits.
    #[serde(default)]
    pub signatures: SignatureConfig,

    /// The API the batch is applied to.
    pub target: TargetConfig,

    /// Loop and loader settings.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Repository settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    /// Clone URL.
    pub url: String,

    /// Branch to watch.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Optional PEM CA bundle for the git transport.
    #[serde(default)]
    pub ca_bundle_path: Option<PathBuf>,

    /// Optional basic-auth username.
    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the basic-auth password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Upper bound on clone size in bytes. Zero means unbounded.
    #[serde(default)]
    pub max_clone_size_bytes: u64,
}

/// Commit signature requirements.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureConfig {
    /// Paths to armored trusted public keys.
    #[serde(default)]
    pub trusted_key_paths: Vec<PathBuf>,

    /// Number of distinct valid signatures required per commit.
    #[serde(default = "default_required_signatures")]
    pub required: u32,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            trusted_key_paths: Vec::new(),
            required: default_required_signatures(),
        }
    }
}

/// Target API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Base URL of the target API.
    pub endpoint: String,

    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

/// Loop and loader settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Polling interval.
    #[serde(default = "default_interval")]
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Directory or file path inside the repository holding the
    /// resource YAML; empty means the repository root.
    #[serde(default)]
    pub root_path: String,

    /// Directory for the file-backed state store.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            root_path: String::new(),
            state_dir: default_state_dir(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

const fn default_required_signatures() -> u32 {
    1
}

fn default_token_env() -> String {
    "VAULT_TOKEN".to_string()
}

const fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

impl ReconcilerConfig {
    /// Loads and validates the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on I/O, parse, or validation failure.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on the first inconsistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.git.url.is_empty() {
            return Err(ConfigError::Invalid("git.url must not be empty".to_string()));
        }
        if self.git.branch.is_empty() {
            return Err(ConfigError::Invalid(
                "git.branch must not be empty".to_string(),
            ));
        }
        if self.target.endpoint.is_empty() {
            return Err(ConfigError::Invalid(
                "target.endpoint must not be empty".to_string(),
            ));
        }
        if self.signatures.required > 0 && self.signatures.trusted_key_paths.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "signatures.required is {} but no trusted keys are configured",
                self.signatures.required
            )));
        }
        let root = RootConfig {
            path: self.reconcile.root_path.clone(),
        };
        root.validate().map_err(|err| {
            ConfigError::Invalid(format!("reconcile.root_path: {err}"))
        })?;
        Ok(())
    }

    /// Reads the armored trusted keys from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if any key file cannot be read.
    pub fn load_trusted_keys(&self) -> Result<Vec<String>, ConfigError> {
        self.signatures
            .trusted_key_paths
            .iter()
            .map(|path| {
                std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            })
            .collect()
    }
}

/// Reads a required environment variable into a string.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnv`] when unset or empty.
pub fn required_env(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(name.to_string())),
    }
}
