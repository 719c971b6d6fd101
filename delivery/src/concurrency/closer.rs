//! Scoped cancellation with a blocking, drain-waiting shutdown.
//!
//! A [`Closer`] hands out [`Scope`]s. Each scope owns a [`CancellationToken`] that fires when
//! either the caller's parent token or the closer's global signal fires. [`Closer::close`]
//! triggers the global signal and then waits until every registered scope reported completion.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{DeliveryResult, ErrorKind};
use crate::delivery_error;

/// Counter and closing flag, mutated together under the watch channel lock.
#[derive(Debug, Clone, Copy, Default)]
struct CloserState {
    closing: bool,
    outstanding: usize,
}

#[derive(Debug)]
struct CloserInner {
    global: CancellationToken,
    state: watch::Sender<CloserState>,
}

/// Issues cancellable scopes and waits for all of them on shutdown.
///
/// The closer is cheap to clone; clones share the same shutdown domain.
#[derive(Debug, Clone)]
pub struct Closer {
    inner: Arc<CloserInner>,
}

impl Closer {
    /// Creates a closer with no outstanding scopes.
    pub fn new() -> Self {
        let (state, _) = watch::channel(CloserState::default());

        Self {
            inner: Arc::new(CloserInner {
                global: CancellationToken::new(),
                state,
            }),
        }
    }

    /// Registers a unit of work derived from `parent` and returns its [`Scope`].
    ///
    /// If the closer is already closing, the returned scope is detached: its token is cancelled,
    /// it is not counted and no watcher task is spawned.
    ///
    /// Must be called from within a Tokio runtime, since registered scopes spawn a watcher task.
    pub fn start(&self, parent: &CancellationToken) -> Scope {
        let token = CancellationToken::new();

        let registered = self.inner.state.send_if_modified(|state| {
            if state.closing {
                return false;
            }

            state.outstanding += 1;
            true
        });

        if !registered {
            debug!("closer is closing, issuing a detached cancelled scope");
            token.cancel();

            return Scope {
                token,
                registration: None,
            };
        }

        let global = self.inner.global.clone();
        if parent.is_cancelled() || global.is_cancelled() {
            token.cancel();
        } else {
            let parent = parent.clone();
            let own = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = parent.cancelled() => {}
                    _ = global.cancelled() => {}
                    _ = own.cancelled() => {}
                }

                own.cancel();
            });
        }

        Scope {
            token,
            registration: Some(Registration {
                inner: self.inner.clone(),
            }),
        }
    }

    /// Returns `true` once [`Closer::close`] has been called.
    pub fn is_closing(&self) -> bool {
        self.inner.state.borrow().closing
    }

    /// Returns the number of registered scopes that have not reported completion.
    pub fn outstanding(&self) -> usize {
        self.inner.state.borrow().outstanding
    }

    /// Cancels every live scope and waits until all of them reported completion.
    ///
    /// Calling it again is allowed: the signal is only triggered once and every caller waits for
    /// the same drain.
    pub async fn close(&self) -> DeliveryResult<()> {
        let first = self.inner.state.send_if_modified(|state| {
            if state.closing {
                return false;
            }

            state.closing = true;
            true
        });

        if first {
            debug!(outstanding = self.outstanding(), "closing, cancelling all scopes");
            self.inner.global.cancel();
        }

        let mut state_rx = self.inner.state.subscribe();
        state_rx
            .wait_for(|state| state.outstanding == 0)
            .await
            .map_err(|err| {
                delivery_error!(
                    ErrorKind::InvalidState,
                    "Closer state channel closed while draining",
                    source: err
                )
            })?;

        debug!("all scopes completed");

        Ok(())
    }
}

impl Default for Closer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Registration {
    inner: Arc<CloserInner>,
}

impl Registration {
    fn complete(self) {
        let decremented = self
            .inner
            .state
            .send_if_modified(|state| match state.outstanding.checked_sub(1) {
                Some(outstanding) => {
                    state.outstanding = outstanding;
                    true
                }
                None => false,
            });

        if !decremented {
            error!("scope completed with no outstanding registrations");
        }
    }
}

/// A cancellable unit of work issued by [`Closer::start`].
///
/// Completion is reported exactly once, either through [`Scope::done`] or when the scope is
/// dropped. Completing a scope cancels its token.
#[derive(Debug)]
pub struct Scope {
    token: CancellationToken,
    registration: Option<Registration>,
}

impl Scope {
    /// Returns the token cancelled when the parent or the closer shuts down.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until the scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Returns `true` if the scope counts towards the closer's outstanding work.
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Reports that all work tied to this scope has finished.
    pub fn done(self) {
        drop(self);
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.token.cancel();

        if let Some(registration) = self.registration.take() {
            registration.complete();
        }
    }
}
