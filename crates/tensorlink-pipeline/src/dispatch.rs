//! Dispatch workers — the bridge between buffered frames and the engine.
//!
//! Two worker tasks per pipeline:
//!
//! - **video**: forms batches on a blocking thread (the channel drain may
//!   park), registers one correlator entry per sub-position, and submits
//!   the stacked batch.
//! - **audio**: forwards per-frame mono chunks unbatched, one correlator
//!   entry each.
//!
//! Both serialize engine submission against prompt-graph replacement
//! through the shared graph gate, and both terminate on cancellation or
//! channel closure.  A submission failure is propagated: the worker parks
//! the error, cancels the pipeline, and `shutdown()` reports it — the core
//! never retries.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use tensorlink_core::engine::{AudioWork, InferenceEngine, VideoWork};
use tensorlink_core::error::{LinkError, Result};
use tensorlink_core::graph::PromptGraph;
use tensorlink_core::types::{DispatchTag, Tensor};

use crate::batch::BatchAccumulator;
use crate::context::BufferContext;
use crate::correlate::OutputCorrelator;

/// The exclusive section shared by submission and graph mutation.
///
/// Holding the lock while submitting guarantees the engine never observes
/// a graph swap interleaved with a unit of work.
pub(crate) type GraphGate = Arc<tokio::sync::Mutex<Option<PromptGraph>>>;

pub(crate) struct DispatchWorkers {
    handles: Vec<JoinHandle<()>>,
    failure: Arc<Mutex<Option<LinkError>>>,
}

impl DispatchWorkers {
    /// Spawn the video and audio dispatch loops.  Must be called from
    /// within a tokio runtime.
    pub(crate) fn spawn(
        ctx: &BufferContext,
        engine: Arc<dyn InferenceEngine>,
        gate: GraphGate,
        video_outputs: Arc<OutputCorrelator<Tensor>>,
        audio_outputs: Arc<OutputCorrelator<Vec<i16>>>,
        audio_rx: mpsc::UnboundedReceiver<(Vec<i16>, DispatchTag)>,
        cancel: CancellationToken,
    ) -> Self {
        let failure: Arc<Mutex<Option<LinkError>>> = Arc::new(Mutex::new(None));
        let accumulator = BatchAccumulator::new(ctx.channel.clone(), ctx.monitor.clone());

        let video = tokio::spawn(supervise(
            "video-dispatch",
            video_dispatch_loop(
                accumulator,
                engine.clone(),
                gate.clone(),
                video_outputs,
                cancel.clone(),
            ),
            failure.clone(),
            cancel.clone(),
        ));
        let audio = tokio::spawn(supervise(
            "audio-dispatch",
            audio_dispatch_loop(audio_rx, engine, gate, audio_outputs, cancel.clone()),
            failure.clone(),
            cancel,
        ));

        Self {
            handles: vec![video, audio],
            failure,
        }
    }

    /// Join both workers and surface the first parked failure, if any.
    pub(crate) async fn shutdown(self) -> Result<()> {
        for handle in self.handles {
            let _ = handle.await;
        }
        match self.failure.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn supervise(
    name: &'static str,
    work: impl std::future::Future<Output = Result<()>>,
    failure: Arc<Mutex<Option<LinkError>>>,
    cancel: CancellationToken,
) {
    match work.await {
        Ok(()) => debug!(worker = name, "dispatch worker stopped"),
        Err(e) if e.is_shutdown() => debug!(worker = name, "dispatch worker stopped at shutdown"),
        Err(e) => {
            error!(worker = name, %e, code = e.error_code(), "dispatch worker failed");
            let mut slot = failure.lock().unwrap();
            if slot.is_none() {
                *slot = Some(e);
            }
            drop(slot);
            cancel.cancel();
        }
    }
}

async fn video_dispatch_loop(
    accumulator: BatchAccumulator,
    engine: Arc<dyn InferenceEngine>,
    gate: GraphGate,
    outputs: Arc<OutputCorrelator<Tensor>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let worker = accumulator.clone();
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("video dispatch cancelled");
                return Ok(());
            }
            formed = tokio::task::spawn_blocking(move || worker.form_batch()) => match formed {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => return Err(e),
                Err(join_err) => {
                    return Err(LinkError::InvariantViolation(format!(
                        "batch worker panicked: {join_err}"
                    )));
                }
            }
        };

        let slots = outputs.register_batch(batch.shape.batch)?;
        let _graph = gate.lock().await;
        engine.submit_video(VideoWork { batch, slots }).await?;
    }
}

async fn audio_dispatch_loop(
    mut inputs: mpsc::UnboundedReceiver<(Vec<i16>, DispatchTag)>,
    engine: Arc<dyn InferenceEngine>,
    gate: GraphGate,
    outputs: Arc<OutputCorrelator<Vec<i16>>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let (samples, tag) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("audio dispatch cancelled");
                return Ok(());
            }
            item = inputs.recv() => match item {
                Some(item) => item,
                None => {
                    debug!("audio dispatch: ingress closed");
                    return Ok(());
                }
            }
        };

        tag.mark_submitted();
        let slot = outputs.register()?;
        let _graph = gate.lock().await;
        engine.submit_audio(AudioWork { samples, slot }).await?;
    }
}
