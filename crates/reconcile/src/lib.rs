//! glk reconcile: the convergence engine for a single GitLab workload.
//!
//! Readiness signals (image resource, database credentials, leadership)
//! arrive as discrete events in any order. The [`Reconciler`] keeps the
//! convergence state, asks the [`Arbiter`] which failing condition to surface,
//! and applies a [`glk_core::PodSpec`] once everything holds. The
//! [`Dispatcher`] redelivers deferred events after each convergence.

#![forbid(unsafe_code)]

pub mod arbiter;
pub mod config;
pub mod dispatch;
pub mod queue;
pub mod reconciler;

pub use arbiter::{Arbiter, Findings};
pub use config::{ConfigError, Precedence, ReconcilerConfig};
pub use dispatch::Dispatcher;
pub use glk_core::Deferred;
pub use queue::DeferredQueue;
pub use reconciler::{Convergence, Host, Outcome, Reconciler};
