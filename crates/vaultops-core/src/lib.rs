//! # vaultops-core
//!
//! Core library for vaultops - a declarative configuration reconciler
//! that watches a signed Git repository and applies the resources it
//! contains to a Vault-style HTTP API.
//!
//! The crate is built around a small pipeline:
//!
//! - **Gate**: walk first-parent history from HEAD and select the oldest
//!   qualifying commit carrying the required signature quorum.
//! - **Loader**: collect `.yaml`/`.yml` files from the checked-out
//!   worktree and parse them into a resource batch.
//! - **Linter**: reject malformed batches before any network work.
//! - **Engine**: order the batch by dependencies, resolve `<name:key>`
//!   templates from prior responses, skip unchanged resources by digest,
//!   apply the rest over HTTP, and sweep deleted keys — persisting state
//!   after every step.
//!
//! Git transport, signature verification, and durable storage are
//! capabilities the host provides through the traits in [`source`] and
//! [`store`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use secrecy::SecretString;
//! use vaultops_core::apply::Target;
//! use vaultops_core::cancel::CancelFlag;
//!
//! let target = Target::new(
//!     "https://vault.internal:8200",
//!     SecretString::new("s.token".to_string()),
//! );
//! let cancel = CancelFlag::new();
//! # let _ = (target, cancel);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod apply;
pub mod cancel;
pub mod digest;
pub mod gate;
pub mod lint;
pub mod loader;
pub mod normalize;
pub mod order;
pub mod reconcile;
pub mod resource;
pub mod source;
pub mod store;
pub mod template;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::apply::{ApplyError, Target, apply};
    pub use crate::cancel::CancelFlag;
    pub use crate::gate::SignaturePolicy;
    pub use crate::reconcile::{ReconcileOutcome, reconcile_head};
    pub use crate::resource::{Resource, State, StateResource};
    pub use crate::source::{CommitInfo, FetchOptions, RepoSource, SignatureVerifier};
    pub use crate::store::{StateStore, StateWriter};
}

/// Re-export commonly used types at the crate root.
pub use apply::{ApplyError, Target};
pub use cancel::CancelFlag;
pub use reconcile::{ReconcileError, ReconcileOutcome, reconcile_head};
pub use resource::{Resource, State, StateResource};
pub use source::{CommitInfo, FetchOptions};
