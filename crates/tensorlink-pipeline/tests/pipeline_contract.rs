//! End-to-end contract tests for the streaming bridge, driven through the
//! loopback engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tensorlink_core::config::BufferConfig;
use tensorlink_core::engine::{AudioWork, InferenceEngine, VideoWork};
use tensorlink_core::error::{LinkError, Result};
use tensorlink_core::graph::PromptGraph;
use tensorlink_core::types::{AudioFrame, Rational, VideoFrame};
use tensorlink_pipeline::loopback::LoopbackEngine;
use tensorlink_pipeline::{Pipeline, PipelineOptions};

const TB: Rational = Rational::new(1, 90_000);

fn options(buffer: BufferConfig) -> PipelineOptions {
    PipelineOptions {
        width: 2,
        height: 2,
        buffer,
    }
}

/// 2x2 frame whose pixels encode `seed` as alternating 0/255 — values the
/// normalize/denormalize round trip reproduces exactly.
fn video_frame(pts: i64, seed: u8) -> VideoFrame {
    let v = if seed % 2 == 0 { 0 } else { 255 };
    VideoFrame {
        data: vec![v; 2 * 2 * 3],
        width: 2,
        height: 2,
        pts,
        time_base: TB,
    }
}

/// Stereo frame carrying mono samples `base..base + len`, requesting
/// `requested` samples on egress.
fn audio_frame(pts: i64, base: i16, len: usize, requested: usize) -> AudioFrame {
    let mut data = Vec::with_capacity(len * 2);
    for i in 0..len {
        let s = base + i as i16;
        data.push(s);
        data.push(s);
    }
    AudioFrame {
        data,
        sample_rate: 48_000,
        samples: requested,
        pts,
        time_base: Rational::new(1, 48_000),
    }
}

#[tokio::test]
async fn single_frame_mode_preserves_order_and_timestamps() {
    let pipeline = Pipeline::new(
        Arc::new(LoopbackEngine::new()),
        options(BufferConfig::default()),
    );

    for i in 0..10 {
        pipeline
            .submit_video_frame(video_frame(i * 3_000, i as u8))
            .await
            .expect("submit");
    }
    for i in 0..10 {
        let out = pipeline.next_video_frame().await.expect("egress");
        assert_eq!(out.pts, i * 3_000);
        assert_eq!(out.time_base, TB);
        assert_eq!(out.data, video_frame(0, i as u8).data);
    }

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn batched_mode_keeps_fifo_order_across_batches() {
    // Batches of 2, gate at one batch: grouping must not reorder egress.
    let pipeline = Pipeline::new(
        Arc::new(LoopbackEngine::with_latency(Duration::from_millis(1))),
        options(BufferConfig::clamped(2, 1, 4)),
    );

    for i in 0..8 {
        pipeline
            .submit_video_frame(video_frame(i, i as u8))
            .await
            .expect("submit");
    }

    for i in 0..8 {
        let out = pipeline.next_video_frame().await.expect("egress");
        assert_eq!(out.pts, i);
    }

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn threshold_gates_only_the_first_batch_of_an_epoch() {
    // batch_size 4, threshold 2: nothing may emerge until 8 tensors queued.
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(LoopbackEngine::new()),
        options(BufferConfig::clamped(4, 2, 5)),
    ));

    for i in 0..7 {
        pipeline
            .submit_video_frame(video_frame(i, 0))
            .await
            .expect("submit");
    }

    let gated = {
        let pipeline = pipeline.clone();
        tokio::time::timeout(Duration::from_millis(100), async move {
            pipeline.next_video_frame().await
        })
        .await
    };
    assert!(gated.is_err(), "batch released below the fill threshold");

    // The eighth tensor trips the latch; all 8 drain in order.
    pipeline
        .submit_video_frame(video_frame(7, 0))
        .await
        .expect("submit");
    for i in 0..8 {
        let out = pipeline.next_video_frame().await.expect("egress");
        assert_eq!(out.pts, i);
    }

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn audio_carry_over_slices_without_loss_or_duplication() {
    // Engine chunks of 1000 samples serve requests of 800/800/400: the
    // emitted frames are exactly the concatenation re-sliced.
    let pipeline = Pipeline::new(
        Arc::new(LoopbackEngine::new()),
        options(BufferConfig::default()),
    );

    pipeline
        .submit_audio_frame(audio_frame(0, 0, 1000, 800))
        .await
        .expect("submit");
    pipeline
        .submit_audio_frame(audio_frame(800, 1000, 1000, 800))
        .await
        .expect("submit");
    pipeline
        .submit_audio_frame(audio_frame(1600, 0, 0, 400))
        .await
        .expect("submit");

    let mut emitted: Vec<i16> = Vec::new();
    for (expected_pts, expected_len) in [(0, 800), (800, 800), (1600, 400)] {
        let out = pipeline.next_audio_frame().await.expect("egress");
        assert_eq!(out.pts, expected_pts);
        assert_eq!(out.samples, expected_len);
        assert_eq!(out.data.len(), expected_len * 2);
        // De-interleave one channel; both carry the same mono signal.
        emitted.extend(out.data.iter().step_by(2));
    }

    let expected: Vec<i16> = (0..1000).chain(1000..2000).collect();
    assert_eq!(emitted, expected, "sample stream was reordered, duplicated, or dropped");

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn reconfigure_restarts_gating_epoch() {
    let pipeline = Pipeline::new(
        Arc::new(LoopbackEngine::new()),
        options(BufferConfig::default()),
    );

    // Single-frame mode first: ungated.
    pipeline
        .submit_video_frame(video_frame(0, 1))
        .await
        .expect("submit");
    assert_eq!(pipeline.next_video_frame().await.expect("egress").pts, 0);

    let applied = pipeline.configure_batching(BufferConfig::clamped(2, 2, 4));
    assert_eq!(applied.capacity(), 8);

    let status = pipeline.buffer_status();
    assert_eq!(status.batch_size, 2);
    assert!(!status.is_buffer_ready, "reconfiguration must reset the latch");

    // Four tensors reach the new threshold; everything drains in order.
    for i in 1..5 {
        pipeline
            .submit_video_frame(video_frame(i, 1))
            .await
            .expect("submit");
    }
    for i in 1..5 {
        assert_eq!(pipeline.next_video_frame().await.expect("egress").pts, i);
    }

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn buffer_status_reports_capacity_invariant() {
    let pipeline = Pipeline::new(
        Arc::new(LoopbackEngine::new()),
        options(BufferConfig::clamped(4, 2, 5)),
    );
    let status = pipeline.buffer_status();
    assert_eq!(status.batch_size * status.max_queue_size, 20);

    let applied = pipeline.configure_batching(BufferConfig::clamped(3, 2, 7));
    assert_eq!(applied.capacity(), 21);

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn graph_is_rewritten_before_reaching_the_engine() {
    let engine = Arc::new(LoopbackEngine::new());
    let pipeline = Pipeline::new(engine.clone(), options(BufferConfig::default()));

    let graph = PromptGraph::from_json(serde_json::json!({
        "1": { "class_type": "LoadImage", "inputs": {} },
        "2": { "class_type": "Stylize", "inputs": { "image": ["1", 0], "strength": 0.5 } },
        "3": { "class_type": "PreviewImage", "inputs": { "images": ["2", 0] } },
    }))
    .expect("graph");

    pipeline.set_graph(graph).await.expect("set graph");
    let installed = engine.graph().expect("engine saw the graph");
    assert!(installed.is_streamable());

    pipeline
        .update_node_input("2", "strength", serde_json::json!("0.75"))
        .await
        .expect("update");
    let updated = engine.graph().expect("updated graph");
    assert_eq!(
        updated.node("2").unwrap().inputs.get("strength"),
        Some(&serde_json::json!(0.75))
    );

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn warm_up_round_trips_dummy_frames() {
    let pipeline = Pipeline::new(
        Arc::new(LoopbackEngine::new()),
        options(BufferConfig::default()),
    );
    pipeline.warm_video().await.expect("warm video");
    pipeline.warm_audio().await.expect("warm audio");
    pipeline.shutdown().await.expect("shutdown");
}

// ── Engine failure propagation ──────────────────────────────────────────

struct FailingEngine;

#[async_trait]
impl InferenceEngine for FailingEngine {
    async fn set_graph(&self, _graph: PromptGraph) -> Result<()> {
        Ok(())
    }

    async fn submit_video(&self, _work: VideoWork) -> Result<()> {
        Err(LinkError::EngineFailure("node graph in invalid state".into()))
    }

    async fn submit_audio(&self, _work: AudioWork) -> Result<()> {
        Err(LinkError::EngineFailure("node graph in invalid state".into()))
    }
}

#[tokio::test]
async fn engine_submission_failure_surfaces_at_shutdown() {
    let pipeline = Pipeline::new(Arc::new(FailingEngine), options(BufferConfig::default()));

    pipeline
        .submit_video_frame(video_frame(0, 1))
        .await
        .expect("ingress itself succeeds");

    // The dispatch worker hits the engine failure, parks it, and cancels
    // the pipeline; shutdown reports it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = pipeline.shutdown().await.expect_err("parked failure");
    assert!(matches!(err, LinkError::EngineFailure(_)));
    assert_eq!(err.error_code(), 200);
}
