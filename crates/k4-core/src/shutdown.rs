//! One-shot shutdown signal shared by every forward in a run
//!
//! Several sources may race to stop the run: the operator interrupt, the first
//! failing forward under the strict policy, a status sink failure. The signal is
//! promoted from "running" to "shutting down" exactly once; the winning trigger
//! records its cause and cancels the shared token, every later trigger is a no-op.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Why the run was shut down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// SIGINT / SIGTERM
    Interrupt,
    /// A forward failed under the strict policy
    ForwardFailed(String),
    /// The status sink could not be updated
    SinkFailed,
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Interrupt => write!(f, "interrupt"),
            ShutdownCause::ForwardFailed(name) => write!(f, "forward '{}' failed", name),
            ShutdownCause::SinkFailed => write!(f, "status sink failed"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    fired: AtomicBool,
    cause: OnceLock<ShutdownCause>,
    token: CancellationToken,
}

/// Cloneable handle to the run's shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                cause: OnceLock::new(),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Fire the signal.
    ///
    /// Returns `true` only for the call that actually fired it.
    pub fn trigger(&self, cause: ShutdownCause) -> bool {
        if self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Shutdown already in progress, ignoring {}", cause);
            return false;
        }

        tracing::info!("Shutting down all forwards ({})", cause);
        let _ = self.inner.cause.set(cause);
        self.inner.token.cancel();
        true
    }

    /// Whether the signal has fired
    pub fn is_triggered(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Cause recorded by the winning trigger
    pub fn cause(&self) -> Option<ShutdownCause> {
        self.inner.cause.get().cloned()
    }

    /// Token observed by sessions and tunnel providers
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Wait until the signal fires
    pub async fn triggered(&self) {
        self.inner.token.cancelled().await
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
