//! Concurrency gate bounding simultaneously running tasks.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Gate acquisition failed within the queue-wait budget.
#[derive(Debug, Error)]
#[error("no task slot became available within {wait:?}")]
pub struct GateClosed {
    pub wait: Duration,
}

/// Counting semaphore acquired before `pending → running` and released on
/// any terminal transition (the permit is held by the worker and dropped
/// with it).
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    queue_wait: Duration,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize, queue_wait: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            queue_wait,
        }
    }

    /// Wait for a slot, up to the configured queue-wait timeout.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, GateClosed> {
        match tokio::time::timeout(self.queue_wait, self.semaphore.clone().acquire_owned()).await {
            // The semaphore is never closed while the gate is alive.
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => Err(GateClosed {
                wait: self.queue_wait,
            }),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let gate = ConcurrencyGate::new(2, Duration::from_millis(50));
        let a = gate.acquire().await.unwrap();
        let _b = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);
        drop(a);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_saturated_gate_times_out() {
        let gate = ConcurrencyGate::new(1, Duration::from_millis(20));
        let _held = gate.acquire().await.unwrap();
        let err = gate.acquire().await.unwrap_err();
        assert_eq!(err.wait, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_queued_acquire_succeeds_when_slot_frees() {
        let gate = Arc::new(ConcurrencyGate::new(1, Duration::from_secs(5)));
        let held = gate.acquire().await.unwrap();

        let gate2 = gate.clone();
        let waiter = tokio::spawn(async move { gate2.acquire().await.is_ok() });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }
}
