//! Utilities for testing subscriptions and producer lanes.
//!
//! The [`observer`] module records every delivery event and lets tests wait for a condition on
//! them with a bounded timeout. The [`producer`] module provides a scripted [`Producer`] whose
//! lanes deliver generated messages, together with a probe exposing what happened to it.
//!
//! [`Producer`]: crate::subscriber::Producer

use std::time::Duration;

pub mod observer;
pub mod producer;

/// Default bound for waits in tests.
///
/// Reaching it means the awaited state was never reached, so tests fail instead of hanging.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
