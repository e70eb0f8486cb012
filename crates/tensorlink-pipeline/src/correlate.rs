//! Output correlator — pending inference results in submission order.
//!
//! One entry is registered per unit of submitted work, before the work is
//! handed to the engine.  The consumer side drains entries strictly FIFO,
//! so the `i`-th egress await pairs with the `i`-th submission regardless
//! of when the engine actually resolves each slot.
//!
//! When the metadata and result streams desynchronize (a contract
//! violation by the submitting side), `next()` simply never completes —
//! intentional backpressure, not a detected error.

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use tensorlink_core::engine::{PendingResult, ResultSlot};
use tensorlink_core::error::{LinkError, Result};

/// Unbounded FIFO of pending result handles.
pub struct OutputCorrelator<T> {
    pending_tx: mpsc::UnboundedSender<PendingResult<T>>,
    // Single consumer seat: egress methods share one receiver, and holding
    // the lock across the await keeps concurrent callers in FIFO order.
    pending_rx: Mutex<mpsc::UnboundedReceiver<PendingResult<T>>>,
}

impl<T> Default for OutputCorrelator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OutputCorrelator<T> {
    pub fn new() -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        Self {
            pending_tx,
            pending_rx: Mutex::new(pending_rx),
        }
    }

    /// Create one pending entry, returning the engine's resolve slot.
    pub fn register(&self) -> Result<ResultSlot<T>> {
        let (slot, pending) = ResultSlot::channel();
        self.pending_tx
            .send(pending)
            .map_err(|_| LinkError::ChannelClosed)?;
        Ok(slot)
    }

    /// Create `count` entries in sub-position order (batch submission).
    pub fn register_batch(&self, count: usize) -> Result<Vec<ResultSlot<T>>> {
        (0..count).map(|_| self.register()).collect()
    }

    /// Await the oldest unconsumed result.
    pub async fn next(&self) -> Result<T> {
        let mut rx = self.pending_rx.lock().await;
        let pending = rx.recv().await.ok_or(LinkError::ChannelClosed)?;
        pending.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn results_arrive_in_submission_order() {
        let correlator = OutputCorrelator::new();
        let slots = correlator.register_batch(3).expect("register");

        // Resolve out of registration order; consumption order must not
        // change — entry i still yields submission i's result.
        let mut slots = slots.into_iter();
        let s0 = slots.next().unwrap();
        let s1 = slots.next().unwrap();
        let s2 = slots.next().unwrap();
        s2.fill(2u32);
        s0.fill(0u32);
        s1.fill(1u32);

        assert_eq!(correlator.next().await.expect("r0"), 0);
        assert_eq!(correlator.next().await.expect("r1"), 1);
        assert_eq!(correlator.next().await.expect("r2"), 2);
    }

    #[tokio::test]
    async fn abandoned_slot_surfaces_as_error() {
        let correlator = OutputCorrelator::<u32>::new();
        let slot = correlator.register().expect("register");
        drop(slot);

        let err = correlator.next().await.expect_err("abandoned");
        assert!(matches!(err, LinkError::ResultAbandoned(_)));
    }

    #[tokio::test]
    async fn next_blocks_until_resolution() {
        let correlator = std::sync::Arc::new(OutputCorrelator::new());
        let slot = correlator.register().expect("register");

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.next().await })
        };

        tokio::task::yield_now().await;
        slot.fill(42u32);
        assert_eq!(waiter.await.expect("join").expect("result"), 42);
    }
}
