use std::{future::Future, sync::Arc};

use tokio::sync::Semaphore;

use crate::Result;

/// Counting gate bounding handler executions in flight across the whole bus.
///
/// Waiters are served in arrival order (Tokio's semaphore is fair), and a slot
/// is given back when the task finishes, whether it succeeded or failed.
#[derive(Debug, Clone)]
pub(crate) struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    size: usize,
}

impl ConcurrencyGate {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Run `task` once a slot is free, holding the slot until it completes.
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.permits.acquire().await?;
        Ok(task.await)
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Reject every current and future waiter with `Error::GateClosed`.
    pub fn close(&self) {
        self.permits.close();
    }
}
