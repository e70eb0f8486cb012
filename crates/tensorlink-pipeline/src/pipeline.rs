//! Pipeline orchestrator — ingress, pairing, and egress per media kind.
//!
//! # Architecture
//!
//! ```text
//!            ┌───────────────┐ blocking ┌─────────────┐   async   ┌────────┐
//! frame ──►──┤ InputChannel  ├─────────►│ Accumulator ├──────────►│ engine │
//!   │        └───────────────┘          └─────────────┘  submit   └───┬────┘
//!   │ metadata (non-blocking, FIFO)                                   │ resolve
//!   ▼        ┌───────────────┐          ┌─────────────┐              ▼
//! record ──►─┤ metadata queue├────────► │   pairing   │◄─── OutputCorrelator
//!            └───────────────┘  egress  └─────────────┘
//! ```
//!
//! Metadata queues and correlators are populated and drained in matching
//! submission order — that shared order is the entire pairing protocol.
//! When one side runs dry the egress await suspends until the other
//! catches up; desynchronization manifests as indefinite blocking by
//! design, not as a detected error.
//!
//! # Shutdown
//!
//! Whole-pipeline only: cancel the workers, close the channel (waking any
//! blocked producer), join, discard queued state.  No individual in-flight
//! request is cancellable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use tensorlink_core::config::BufferConfig;
use tensorlink_core::engine::InferenceEngine;
use tensorlink_core::error::{LinkError, Result};
use tensorlink_core::graph::PromptGraph;
use tensorlink_core::types::{
    AudioFrame, AudioRecord, DispatchTag, Rational, Tensor, VideoFrame, VideoRecord,
};

use crate::context::{BufferContext, BufferStatus};
use crate::convert;
use crate::correlate::OutputCorrelator;
use crate::dispatch::{DispatchWorkers, GraphGate};

/// Ingress frames ignored before input-rate tracking starts, to avoid
/// startup-transient skew.
const RATE_WARMUP_FRAMES: u64 = 5;
/// Aggregate health is logged every this many ingress frames.
const HEALTH_LOG_INTERVAL: u64 = 30;
/// Dummy frames pushed through the loop by the warm-up helpers.
const WARMUP_RUNS: usize = 5;

/// Pipeline construction parameters.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Expected video frame width (used by warm-up).
    pub width: u32,
    /// Expected video frame height (used by warm-up).
    pub height: u32,
    pub buffer: BufferConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            buffer: BufferConfig::default(),
        }
    }
}

/// The streaming bridge for one media session.
///
/// Must be constructed inside a tokio runtime — the dispatch workers are
/// spawned immediately.
pub struct Pipeline {
    ctx: BufferContext,
    engine: Arc<dyn InferenceEngine>,
    gate: GraphGate,
    options: PipelineOptions,

    video_meta_tx: mpsc::UnboundedSender<VideoRecord>,
    video_meta_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<VideoRecord>>,
    audio_meta_tx: mpsc::UnboundedSender<AudioRecord>,
    audio_meta_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<AudioRecord>>,
    audio_in_tx: mpsc::UnboundedSender<(Vec<i16>, DispatchTag)>,

    video_outputs: Arc<OutputCorrelator<Tensor>>,
    audio_outputs: Arc<OutputCorrelator<Vec<i16>>>,
    /// Leftover mono samples from prior engine output, strictly FIFO.
    carry_over: tokio::sync::Mutex<Vec<i16>>,

    frame_count: AtomicU64,
    last_frame_at: std::sync::Mutex<Instant>,

    workers: std::sync::Mutex<Option<DispatchWorkers>>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn InferenceEngine>, options: PipelineOptions) -> Self {
        let ctx = BufferContext::new(options.buffer);
        let gate: GraphGate = Arc::new(tokio::sync::Mutex::new(None));
        let video_outputs = Arc::new(OutputCorrelator::new());
        let audio_outputs = Arc::new(OutputCorrelator::new());

        let (video_meta_tx, video_meta_rx) = mpsc::unbounded_channel();
        let (audio_meta_tx, audio_meta_rx) = mpsc::unbounded_channel();
        let (audio_in_tx, audio_in_rx) = mpsc::unbounded_channel();

        let cancel = CancellationToken::new();
        let workers = DispatchWorkers::spawn(
            &ctx,
            engine.clone(),
            gate.clone(),
            video_outputs.clone(),
            audio_outputs.clone(),
            audio_in_rx,
            cancel.clone(),
        );

        Self {
            ctx,
            engine,
            gate,
            options,
            video_meta_tx,
            video_meta_rx: tokio::sync::Mutex::new(video_meta_rx),
            audio_meta_tx,
            audio_meta_rx: tokio::sync::Mutex::new(audio_meta_rx),
            audio_in_tx,
            video_outputs,
            audio_outputs,
            carry_over: tokio::sync::Mutex::new(Vec::new()),
            frame_count: AtomicU64::new(0),
            last_frame_at: std::sync::Mutex::new(Instant::now()),
            workers: std::sync::Mutex::new(Some(workers)),
            cancel: cancel.clone(),
        }
    }

    // ── Graph management ────────────────────────────────────────────────

    /// Rewrite a source graph for streaming and install it on the engine.
    ///
    /// Serialized against in-flight submissions through the graph gate.
    pub async fn set_graph(&self, graph: PromptGraph) -> Result<()> {
        let graph = graph.rewrite_for_streaming()?;
        let mut guard = self.gate.lock().await;
        self.engine.set_graph(graph.clone()).await?;
        *guard = Some(graph);
        Ok(())
    }

    /// Update one input field on one node of the installed graph and push
    /// the updated graph to the engine.
    pub async fn update_node_input(&self, node_id: &str, field: &str, value: Value) -> Result<()> {
        let mut guard = self.gate.lock().await;
        let graph = guard
            .as_mut()
            .ok_or_else(|| LinkError::Graph("no graph installed".into()))?;
        graph.update_node_input(node_id, field, value)?;
        self.engine.set_graph(graph.clone()).await
    }

    // ── Video path ──────────────────────────────────────────────────────

    /// Ingress one video frame.
    ///
    /// Derives the input tensor, pushes it onto the bounded channel
    /// (suspending on a blocking worker while the channel is at capacity)
    /// and the frame's timing record onto the metadata queue.
    pub async fn submit_video_frame(&self, frame: VideoFrame) -> Result<()> {
        let tensor = convert::video_frame_to_tensor(&frame)?;
        let tag = DispatchTag::new();
        let record = VideoRecord {
            tag: tag.clone(),
            pts: frame.pts,
            time_base: frame.time_base,
        };

        let channel = self.ctx.channel.clone();
        tokio::task::spawn_blocking(move || channel.submit(tensor, tag))
            .await
            .map_err(|join_err| {
                LinkError::InvariantViolation(format!("ingress worker panicked: {join_err}"))
            })??;

        self.video_meta_tx
            .send(record)
            .map_err(|_| LinkError::ChannelClosed)?;

        self.observe_video_ingress();
        Ok(())
    }

    /// Egress the next processed video frame, in submission order, with
    /// the original frame's timing stamped on.
    pub async fn next_video_frame(&self) -> Result<VideoFrame> {
        let tensor = self.video_outputs.next().await?;

        // The paired record is the first one whose tensor actually reached
        // the engine; records still Pending lost their tensor to a
        // capacity shrink and carry no corresponding result.
        let record = {
            let mut rx = self.video_meta_rx.lock().await;
            loop {
                let record = rx.recv().await.ok_or(LinkError::ChannelClosed)?;
                if record.tag.is_submitted() {
                    break record;
                }
                debug!(pts = record.pts, "discarding record for frame never submitted");
            }
        };

        convert::tensor_to_video_frame(&tensor, record.pts, record.time_base)
    }

    /// Push `WARMUP_RUNS` dummy frames through the full loop.
    ///
    /// Intended for the single-frame configuration (the source system
    /// warms up before enabling batching); with gating active the first
    /// put/get pair would wait on the fill threshold.
    #[instrument(skip_all, name = "warm_video")]
    pub async fn warm_video(&self) -> Result<()> {
        info!(
            width = self.options.width,
            height = self.options.height,
            "warming video pipeline"
        );
        let pixels = (self.options.width * self.options.height * 3) as usize;
        for _ in 0..WARMUP_RUNS {
            self.submit_video_frame(VideoFrame {
                data: vec![0; pixels],
                width: self.options.width,
                height: self.options.height,
                pts: 0,
                time_base: Rational::new(1, 1),
            })
            .await?;
            self.next_video_frame().await?;
        }
        Ok(())
    }

    // ── Audio path ──────────────────────────────────────────────────────

    /// Ingress one audio frame: downmix to mono, queue for dispatch, and
    /// record the frame's timing and requested sample count.
    pub async fn submit_audio_frame(&self, frame: AudioFrame) -> Result<()> {
        let mono = convert::audio_frame_to_mono(&frame);
        let tag = DispatchTag::new();
        let record = AudioRecord {
            tag: tag.clone(),
            pts: frame.pts,
            time_base: frame.time_base,
            sample_rate: frame.sample_rate,
            samples: frame.samples,
        };

        self.audio_in_tx
            .send((mono, tag))
            .map_err(|_| LinkError::ChannelClosed)?;
        self.audio_meta_tx
            .send(record)
            .map_err(|_| LinkError::ChannelClosed)?;
        Ok(())
    }

    /// Egress the next processed audio frame.
    ///
    /// Serves the frame's requested sample count from the carry-over
    /// buffer, awaiting engine output only when the buffer runs short.
    /// Slicing is strict FIFO: no sample is duplicated or dropped across
    /// frame boundaries.
    pub async fn next_audio_frame(&self) -> Result<AudioFrame> {
        let record = {
            let mut rx = self.audio_meta_rx.lock().await;
            rx.recv().await.ok_or(LinkError::ChannelClosed)?
        };

        let mut carry = self.carry_over.lock().await;
        while carry.len() < record.samples {
            let chunk = self.audio_outputs.next().await?;
            carry.extend_from_slice(&chunk);
        }
        let samples: Vec<i16> = carry.drain(..record.samples).collect();
        drop(carry);

        Ok(convert::mono_to_audio_frame(&samples, &record))
    }

    /// Audio counterpart of [`warm_video`](Self::warm_video): half a
    /// second of silence at 48 kHz per run.
    #[instrument(skip_all, name = "warm_audio")]
    pub async fn warm_audio(&self) -> Result<()> {
        let per_channel = 24_000;
        for _ in 0..WARMUP_RUNS {
            self.submit_audio_frame(AudioFrame {
                data: vec![0; per_channel * 2],
                sample_rate: 48_000,
                samples: per_channel,
                pts: 0,
                time_base: Rational::new(1, 48_000),
            })
            .await?;
            self.next_audio_frame().await?;
        }
        Ok(())
    }

    // ── Control surface ─────────────────────────────────────────────────

    /// Apply a new buffering configuration at runtime.  Returns the
    /// clamped config actually installed; the gating epoch restarts.
    pub fn configure_batching(&self, config: BufferConfig) -> BufferConfig {
        self.ctx.configure(config)
    }

    /// Read-only buffering snapshot; no side effects.
    pub fn buffer_status(&self) -> BufferStatus {
        self.ctx.status()
    }

    /// Whole-pipeline shutdown: cancel the workers, abandon the channel
    /// (waking blocked producers), join, and discard buffered state.
    /// Returns the first engine failure a worker parked, if any.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        self.ctx.channel.close();
        let workers = self.workers.lock().unwrap().take();
        let result = match workers {
            Some(workers) => workers.shutdown().await,
            None => Ok(()),
        };
        self.carry_over.lock().await.clear();
        result
    }

    fn observe_video_ingress(&self) {
        let count = self.frame_count.fetch_add(1, Ordering::AcqRel) + 1;

        let elapsed = {
            let mut last = self.last_frame_at.lock().unwrap();
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        if count > RATE_WARMUP_FRAMES && elapsed > 0.0 {
            self.ctx.record_input_rate(1.0 / elapsed);
        }

        if count % HEALTH_LOG_INTERVAL == 0 {
            let m = self.ctx.monitor.snapshot();
            info!(
                fill = format!("{:.2}", m.fill_level),
                health = format!("{:.2}", m.buffer_health),
                "buffer metrics"
            );
            if m.buffer_health < 0.8 && m.fill_level > 0.8 {
                warn!("buffer filling faster than processing; consider a larger batch size");
            } else if m.processing_rate > m.input_rate * 1.2 && m.fill_level < 0.3 {
                info!("processing outpaces input; batch size could be reduced");
            }
        }
    }
}
