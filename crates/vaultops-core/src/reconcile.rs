//! One full reconcile cycle over the host capabilities.
//!
//! [`reconcile_head`] is what a poll tick runs: fetch a fresh clone,
//! select the next signed commit, check the worktree out, load and lint
//! the batch, run the engine, and only then advance the durable
//! last-applied pointer. Any failure leaves the pointer untouched so the
//! same commit is retried on the next tick.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::apply::{ApplyError, Target, apply};
use crate::cancel::CancelFlag;
use crate::gate::{GateError, SignaturePolicy, find_first_signed_commit};
use crate::lint::{LintError, lint};
use crate::loader::{LoaderError, load_resources};
use crate::resource::State;
use crate::source::{CommitInfo, FetchOptions, RepoSource, SignatureVerifier, SourceError};
use crate::store::{
    KEY_LAST_APPLIED, KEY_STATE, RootConfig, StateStore, StoreError, StoreStateWriter, get_json,
    put_json,
};

/// Errors from a reconcile cycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    /// Fetching or reading the repository failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Commit selection failed.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// Loading resources from the worktree failed.
    #[error("loading resources: {0}")]
    Loader(#[from] LoaderError),

    /// The batch failed validation.
    #[error("lint: {0}")]
    Lint(#[from] LintError),

    /// The engine aborted.
    #[error("apply: {0}")]
    Apply(#[from] ApplyError),

    /// Reading or writing durable records failed.
    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A commit qualified and its batch was applied.
    Applied(CommitInfo),
    /// No qualifying commit newer than the last applied one.
    NoNewCommit,
}

/// Runs one reconcile cycle. See the module docs.
///
/// # Errors
///
/// Returns [`ReconcileError`]; the last-applied pointer only advances on
/// success.
pub async fn reconcile_head(
    source: &dyn RepoSource,
    verifier: &dyn SignatureVerifier,
    store: &dyn StateStore,
    fetch: &FetchOptions,
    policy: &SignaturePolicy,
    target: &Target,
    cancel: &CancelFlag,
) -> Result<ReconcileOutcome, ReconcileError> {
    let mut repo = source.fetch(fetch)?;

    let last_applied: Option<CommitInfo> = get_json(store, KEY_LAST_APPLIED)?;
    let Some(commit) = find_first_signed_commit(
        repo.as_ref(),
        verifier,
        policy,
        last_applied.as_ref(),
        Utc::now(),
    )?
    else {
        debug!("no new qualifying commit");
        return Ok(ReconcileOutcome::NoNewCommit);
    };

    repo.checkout(&commit.hash)?;
    debug!(commit = %commit.hash, "checked out worktree");

    let root = RootConfig::load(store)?.unwrap_or_default();
    let resources = load_resources(repo.as_ref(), &root.path)?;
    lint(&resources)?;

    let mut state: State = get_json(store, KEY_STATE)?.unwrap_or_default();
    let writer = StoreStateWriter::new(store);
    apply(&resources, target, &mut state, &writer, cancel).await?;

    put_json(store, KEY_LAST_APPLIED, &commit)?;
    info!(
        commit = %commit.hash,
        resources = resources.len(),
        "reconciled"
    );
    Ok(ReconcileOutcome::Applied(commit))
}
