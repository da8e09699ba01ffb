//! Signed-commit selection.
//!
//! Starting at HEAD, the gate walks first-parent history and picks the
//! oldest qualifying commit that is newer than the last-applied one. A
//! commit qualifies when the verifier confirms the signature quorum and
//! its committer date is neither in the future (clock-skew guard) nor
//! older than the last-applied commit (monotonic-time guard, so a
//! force-push to an older but signed tree never moves the reconciler
//! backward).

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::source::{CommitInfo, SignatureVerifier, SourceError, WorktreeRepo};

/// The trusted key set and the signature quorum a commit must meet.
#[derive(Debug, Clone)]
pub struct SignaturePolicy {
    /// Armored trusted public keys.
    pub trusted_keys: Vec<String>,
    /// Number of distinct valid signatures required per commit.
    pub required: u32,
}

/// Errors from commit selection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GateError {
    /// Reading the repository failed.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Walks history from HEAD and returns the commit the engine should
/// apply next, or `None` when there is nothing new.
///
/// The walk stops at `last_applied` (exclusive). Commits failing the
/// quorum or the time guards are skipped, not fatal: a later (older)
/// commit may still qualify.
///
/// # Errors
///
/// Returns [`GateError`] if the repository cannot be walked.
pub fn find_first_signed_commit(
    repo: &dyn WorktreeRepo,
    verifier: &dyn SignatureVerifier,
    policy: &SignaturePolicy,
    last_applied: Option<&CommitInfo>,
    now: DateTime<Utc>,
) -> Result<Option<CommitInfo>, GateError> {
    let head = repo.head()?;
    let boundary = last_applied.map(|c| c.hash.as_str());

    if boundary == Some(head.hash.as_str()) {
        debug!(head = %head.hash, "head equals last applied commit; nothing new");
        return Ok(None);
    }

    for commit in repo.log_first_parent(&head.hash)? {
        if boundary == Some(commit.hash.as_str()) {
            debug!(boundary = %commit.hash, "reached last applied commit; stopping search");
            break;
        }

        if let Err(err) = verifier.verify_commit(
            repo,
            &commit.hash,
            &policy.trusted_keys,
            policy.required,
        ) {
            debug!(commit = %commit.hash, error = %err, "commit lacks required signatures; skipping");
            continue;
        }

        if commit.committer_time > now {
            debug!(
                commit = %commit.hash,
                committer_time = %commit.committer_time,
                "commit date is in the future; skipping"
            );
            continue;
        }

        if let Some(last) = last_applied {
            if commit.committer_time < last.committer_time {
                debug!(
                    commit = %commit.hash,
                    committer_time = %commit.committer_time,
                    last_applied_time = %last.committer_time,
                    "commit is older than last applied commit; skipping"
                );
                continue;
            }
        }

        info!(commit = %commit.hash, committer_time = %commit.committer_time, "selected signed commit");
        return Ok(Some(commit));
    }

    debug!("no qualifying signed commit in the search range");
    Ok(None)
}
