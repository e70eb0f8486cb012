//! Loopback engine — synthetic collaborator for benches and contract tests.
//!
//! Resolves every unit of work with its own input (identity inference),
//! optionally after a simulated per-submission latency.  Honors the hard
//! engine contract: one resolution per slot, sub-positions in order.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use tensorlink_core::engine::{AudioWork, InferenceEngine, VideoWork};
use tensorlink_core::error::{LinkError, Result};
use tensorlink_core::graph::PromptGraph;

/// Identity engine.
#[derive(Default)]
pub struct LoopbackEngine {
    latency: Option<Duration>,
    graph: Mutex<Option<PromptGraph>>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate engine compute time per submission.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            graph: Mutex::new(None),
        }
    }

    /// The graph most recently installed, if any.
    pub fn graph(&self) -> Option<PromptGraph> {
        self.graph.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEngine for LoopbackEngine {
    async fn set_graph(&self, graph: PromptGraph) -> Result<()> {
        debug!(nodes = graph.len(), "loopback engine: graph installed");
        *self.graph.lock().unwrap() = Some(graph);
        Ok(())
    }

    async fn submit_video(&self, work: VideoWork) -> Result<()> {
        if work.slots.len() != work.batch.shape.batch {
            return Err(LinkError::EngineFailure(format!(
                "slot count {} does not match batch size {}",
                work.slots.len(),
                work.batch.shape.batch
            )));
        }
        let latency = self.latency;
        tokio::spawn(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let units = work.batch.into_units();
            for (slot, unit) in work.slots.into_iter().zip(units) {
                slot.fill(unit);
            }
        });
        Ok(())
    }

    async fn submit_audio(&self, work: AudioWork) -> Result<()> {
        let latency = self.latency;
        tokio::spawn(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            work.slot.fill(work.samples);
        });
        Ok(())
    }
}
