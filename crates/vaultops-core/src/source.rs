//! Capabilities the reconciler consumes from its host.
//!
//! Git transport and commit-signature verification are deliberately not
//! implemented here. The host supplies a [`RepoSource`] that can produce
//! a fresh [`WorktreeRepo`] for the configured branch, and a
//! [`SignatureVerifier`] that can decide whether a commit carries enough
//! valid signatures from the trusted key set. In-memory fakes of both are
//! enough to exercise the whole reconcile path in tests.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A commit hash plus its committer timestamp.
///
/// Also the durable "last applied" record: the committer date is what the
/// gate's monotonic-time guard compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full commit hash.
    pub hash: String,
    /// Committer timestamp from the commit object.
    pub committer_time: DateTime<Utc>,
}

/// Basic-auth credentials for fetching the repository.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    /// Username.
    pub username: String,
    /// Password or token.
    pub password: SecretString,
}

/// Parameters for producing a fresh clone of the configured branch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Repository URL.
    pub url: String,
    /// Branch to clone.
    pub branch: String,
    /// Optional basic-auth credentials.
    pub auth: Option<BasicAuth>,
    /// Optional PEM CA bundle for the transport.
    pub ca_bundle: Option<Vec<u8>>,
    /// Upper bound on the clone size in bytes. Zero means unbounded.
    pub max_clone_size_bytes: u64,
}

/// One entry of a worktree walk.
pub struct WorktreeEntry<'a> {
    /// Path relative to the worktree root, `/`-separated.
    pub path: &'a str,
    /// Symlink target when the entry is a symlink.
    pub symlink_target: Option<&'a str>,
    /// Content reader for regular files; `None` for anything else.
    pub reader: Option<&'a mut dyn Read>,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Visitor for [`WorktreeRepo::for_each_file`].
pub type WorktreeVisitor<'a> = dyn FnMut(WorktreeEntry<'_>) -> Result<(), SourceError> + 'a;

/// Errors from the repository and verification capabilities.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// Cloning or refreshing the repository failed.
    #[error("fetching repository: {0}")]
    Fetch(String),

    /// The clone exceeded the configured size bound.
    #[error("clone size {size} bytes exceeds limit of {limit} bytes")]
    CloneTooLarge {
        /// Observed size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// A repository operation (head, log, checkout, walk) failed.
    #[error("repository operation: {0}")]
    Repo(String),

    /// The commit does not carry the required number of valid signatures.
    #[error("commit {hash}: {reason}")]
    SignatureRejected {
        /// The commit that failed verification.
        hash: String,
        /// Why verification failed.
        reason: String,
    },

    /// Reading worktree content failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A checked-out clone of the configured branch.
pub trait WorktreeRepo: Send {
    /// Returns HEAD of the checked-out branch.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the repository cannot be read.
    fn head(&self) -> Result<CommitInfo, SourceError>;

    /// Returns the first-parent history starting at `from` (inclusive),
    /// newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the log cannot be walked.
    fn log_first_parent(&self, from: &str) -> Result<Vec<CommitInfo>, SourceError>;

    /// Checks the worktree out at the given commit.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the commit cannot be checked out.
    fn checkout(&mut self, hash: &str) -> Result<(), SourceError>;

    /// Walks every entry of the current worktree, calling `visit` once
    /// per entry. Iteration stops at the first visitor error.
    ///
    /// # Errors
    ///
    /// Returns the visitor's error, or [`SourceError`] if the walk
    /// itself fails.
    fn for_each_file(&self, visit: &mut WorktreeVisitor<'_>) -> Result<(), SourceError>;

    /// The on-disk worktree location, when the repository is backed by
    /// one. Verifiers that shell out to external tooling need it;
    /// in-memory repositories return `None`.
    fn workdir(&self) -> Option<&Path> {
        None
    }
}

/// Produces fresh clones of the configured branch.
pub trait RepoSource: Send + Sync {
    /// Clones the branch described by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on transport failure or when the clone
    /// exceeds its size bound.
    fn fetch(&self, options: &FetchOptions) -> Result<Box<dyn WorktreeRepo>, SourceError>;
}

/// Verifies commit signatures against a trusted key set.
pub trait SignatureVerifier: Send + Sync {
    /// Succeeds iff the commit carries at least `required` valid
    /// signatures from distinct keys in `trusted_keys`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::SignatureRejected`] when the quorum is not
    /// met, or another [`SourceError`] if verification could not run.
    fn verify_commit(
        &self,
        repo: &dyn WorktreeRepo,
        hash: &str,
        trusted_keys: &[String],
        required: u32,
    ) -> Result<(), SourceError>;
}
