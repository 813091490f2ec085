use std::sync::Arc;

use tokio::sync::watch;

/// Cancellation-aware execution context passed through every operation.
///
/// Clones share one cancellation flag: the caller keeps a clone and calls
/// [`TaskContext::cancel`], while workers and use cases check
/// [`TaskContext::is_cancelled`] between persistence steps.
#[derive(Debug, Clone)]
pub struct TaskContext {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskContext {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        let mut cancel_rx = self.cancel_tx.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot observe a
        // closed channel here.
        let _ = cancel_rx.wait_for(|cancelled| *cancelled).await;
    }
}
