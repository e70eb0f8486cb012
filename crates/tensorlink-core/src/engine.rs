//! Inference engine trait — the opaque compute boundary.
//!
//! The engine accepts units of work and eventually resolves each unit's
//! result slots.  Everything else about it — node graph execution, model
//! scheduling, batching internals — is invisible to the bridge.
//!
//! # Hard contract
//!
//! - `submit_*` is fire-and-forget: it may fail fast (malformed graph
//!   state), and such failures are propagated, never retried, by the
//!   bridge.
//! - Every [`ResultSlot`] handed over MUST be resolved exactly once, and a
//!   video batch's slots MUST be resolved in sub-position order: slot `i`
//!   receives the result for frame `i` of the batch.  The bridge pairs
//!   results to frame metadata purely positionally; engine-side reordering
//!   is not corrected.
//! - There is no implicit timeout.  A caller that needs one imposes it.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::{LinkError, Result};
use crate::graph::PromptGraph;
use crate::types::Tensor;

// ─── Result slots ────────────────────────────────────────────────────────

/// The resolve half of one pending inference result.
///
/// Consuming `self` on [`fill`](Self::fill) makes exactly-once resolution a
/// type-level guarantee.  Dropping a slot unresolved surfaces as
/// [`LinkError::ResultAbandoned`] on the awaiting side.
#[derive(Debug)]
pub struct ResultSlot<T>(oneshot::Sender<T>);

impl<T> ResultSlot<T> {
    /// Create a slot and its awaitable half.
    pub fn channel() -> (Self, PendingResult<T>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), PendingResult(rx))
    }

    /// Resolve the slot.  The value is discarded if the awaiting side has
    /// already been torn down (whole-pipeline shutdown).
    pub fn fill(self, value: T) {
        let _ = self.0.send(value);
    }
}

/// The awaitable half of one pending inference result.
#[derive(Debug)]
pub struct PendingResult<T>(oneshot::Receiver<T>);

impl<T> PendingResult<T> {
    /// Wait for the engine to resolve this slot.
    pub async fn wait(self) -> Result<T> {
        self.0
            .await
            .map_err(|_| LinkError::ResultAbandoned("slot dropped before resolution".into()))
    }
}

// ─── Work units ──────────────────────────────────────────────────────────

/// One video submission: a stacked batch and one slot per sub-position.
///
/// `slots.len()` always equals `batch.shape.batch`.
#[derive(Debug)]
pub struct VideoWork {
    pub batch: Tensor,
    pub slots: Vec<ResultSlot<Tensor>>,
}

/// One audio submission: a mono sample chunk and its single slot.
///
/// The resolved chunk need not match the submitted length; the bridge's
/// carry-over buffer absorbs the difference.
#[derive(Debug)]
pub struct AudioWork {
    pub samples: Vec<i16>,
    pub slot: ResultSlot<Vec<i16>>,
}

// ─── Engine trait ────────────────────────────────────────────────────────

/// The external frame-by-frame inference engine.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Install (or replace) the prompt graph the engine executes.
    ///
    /// Callers serialize this with in-flight submissions; implementations
    /// may assume no `submit_*` call overlaps a graph swap.
    async fn set_graph(&self, graph: PromptGraph) -> Result<()>;

    /// Submit one video batch.  Resolution obligations per the module docs.
    async fn submit_video(&self, work: VideoWork) -> Result<()>;

    /// Submit one audio chunk.
    async fn submit_audio(&self, work: AudioWork) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::ResultSlot;
    use crate::error::LinkError;

    #[tokio::test]
    async fn slot_resolves_exactly_once() {
        let (slot, pending) = ResultSlot::channel();
        slot.fill(7u32);
        assert_eq!(pending.wait().await.expect("resolved"), 7);
    }

    #[tokio::test]
    async fn dropped_slot_surfaces_as_abandonment() {
        let (slot, pending) = ResultSlot::<u32>::channel();
        drop(slot);
        let err = pending.wait().await.expect_err("abandoned");
        assert!(matches!(err, LinkError::ResultAbandoned(_)));
    }
}
