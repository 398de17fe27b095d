//! Per-job cancellation flag.
//!
//! The flag is set once and then latched. Runners poll it at step boundaries and
//! hand the token to executors, which may watch it to abort a step early.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Latched cancellation flag paired with a token for async observers.
#[derive(Debug, Default)]
pub struct CancellationFlag {
    requested: AtomicBool,
    token: CancellationToken,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the flag. Returns `true` only for the call that set it.
    pub fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::AcqRel);
        if first {
            self.token.cancel();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Token cancelled when the flag is latched.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
