//! Cooperative cancellation.
//!
//! The engine and the polling loop check a shared [`CancelFlag`] between
//! units of work. Cancellation never interrupts an in-flight request;
//! the next check observes it and the batch aborts with state reflecting
//! every completed step.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cheaply clonable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a flag in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
