//! Concurrency utilities for coordinating subscriptions and producer lanes.
//!
//! # Coordination Patterns
//!
//! ## Scoped cancellation
//!
//! The [`closer`] module issues cancellable [`closer::Scope`]s derived from a caller supplied
//! [`tokio_util::sync::CancellationToken`]. A single [`closer::Closer::close`] cancels every
//! live scope and waits until all of them report completion, so no subscription outlives the
//! owner that created it.
//!
//! ## Lane shutdown
//!
//! The [`shutdown`] module implements the broadcast channel that producers use to tell their
//! lanes to stop once a subscription is torn down.

pub mod closer;
pub mod shutdown;
