use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation handle shared between a long-running operation
/// and its controller.
///
/// Clones share the same underlying flag: once any handle calls `cancel()`,
/// every handle observes `is_cancelled()`. The operation being cancelled
/// polls the flag at its own suspension points; nothing is pre-empted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Non-blocking.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Re-arm the token before starting a new operation on the same source.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
