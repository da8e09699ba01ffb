//! The serialized reconcile loop.
//!
//! One cycle runs at a time: a tick that is still reconciling when the
//! next interval elapses simply delays it, so overlapping ticks coalesce
//! by construction. Failures never advance the last-applied pointer; the
//! same commit is retried on the next tick.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use vaultops_core::apply::Target;
use vaultops_core::cancel::CancelFlag;
use vaultops_core::gate::SignaturePolicy;
use vaultops_core::reconcile::{ReconcileOutcome, reconcile_head};
use vaultops_core::source::{FetchOptions, RepoSource, SignatureVerifier};
use vaultops_core::store::StateStore;

/// How often the loop wakes to check for cancellation between ticks.
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Owns the capabilities and runs reconcile cycles.
pub struct Poller {
    source: Box<dyn RepoSource>,
    verifier: Box<dyn SignatureVerifier>,
    store: Box<dyn StateStore>,
    fetch: FetchOptions,
    policy: SignaturePolicy,
    target: Target,
    interval: Duration,
}

impl Poller {
    /// Assembles a poller.
    #[must_use]
    pub fn new(
        source: Box<dyn RepoSource>,
        verifier: Box<dyn SignatureVerifier>,
        store: Box<dyn StateStore>,
        fetch: FetchOptions,
        policy: SignaturePolicy,
        target: Target,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            verifier,
            store,
            fetch,
            policy,
            target,
            interval,
        }
    }

    /// Runs cycles until cancelled. The first cycle starts immediately.
    pub async fn run(&self, cancel: &CancelFlag) {
        info!(interval = ?self.interval, "reconcile loop started");
        let mut next_run = Instant::now();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if Instant::now() >= next_run {
                self.tick(cancel).await;
                next_run = Instant::now() + self.interval;
            }
            tokio::time::sleep(CANCEL_POLL).await;
        }
        info!("reconcile loop stopped");
    }

    /// Runs one cycle to completion.
    pub async fn tick(&self, cancel: &CancelFlag) {
        match reconcile_head(
            self.source.as_ref(),
            self.verifier.as_ref(),
            self.store.as_ref(),
            &self.fetch,
            &self.policy,
            &self.target,
            cancel,
        )
        .await
        {
            Ok(ReconcileOutcome::Applied(commit)) => {
                info!(commit = %commit.hash, "applied commit");
            },
            Ok(ReconcileOutcome::NoNewCommit) => {
                debug!("nothing to reconcile");
            },
            Err(err) => {
                warn!(error = %err, "reconcile failed; retrying on next tick");
            },
        }
    }
}
