//! Cooperative cancellation shared by a batch, its matches and their agent calls.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared flag used to stop a batch or a single match.
///
/// Once cancelled, no new agent call is issued; calls already in flight are abandoned and
/// their results discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Never blocks.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once [`cancel`](Self::cancel) was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
