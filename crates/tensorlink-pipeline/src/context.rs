//! Shared buffering context — one per pipeline instance.
//!
//! Groups the input channel and health monitor behind a single explicit
//! object so components receive their shared state by reference instead of
//! reaching for ambient globals, and so the exclusive-section discipline
//! around reconfiguration lives in one place.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use tensorlink_core::config::BufferConfig;
use tensorlink_core::metrics::{BufferMetrics, HealthMonitor};

use crate::channel::InputChannel;

/// Read-only snapshot of the buffering surface.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct BufferStatus {
    pub batch_size: usize,
    pub buffer_threshold: usize,
    pub max_queue_size: usize,
    pub is_buffer_ready: bool,
    pub metrics: BufferMetrics,
}

/// The per-pipeline shared buffering state.
pub struct BufferContext {
    pub channel: Arc<InputChannel>,
    pub monitor: Arc<HealthMonitor>,
}

impl BufferContext {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            channel: Arc::new(InputChannel::new(config)),
            monitor: Arc::new(HealthMonitor::new()),
        }
    }

    /// Apply a new buffering configuration and return the clamped config
    /// actually installed.
    pub fn configure(&self, config: BufferConfig) -> BufferConfig {
        let applied = self.channel.configure(config);
        self.monitor.record_fill(self.channel.fill_level());
        info!(
            batch_size = applied.batch_size,
            buffer_threshold = applied.buffer_threshold,
            max_queue_size = applied.max_queue_size,
            queue_capacity = applied.capacity(),
            "Configured batch processing"
        );
        applied
    }

    /// Producer-side rate report with a fresh fill reading.
    pub fn record_input_rate(&self, rate: f64) {
        self.monitor.record_input_rate(rate, self.channel.fill_level());
    }

    /// Read-only status snapshot; no side effects.
    pub fn status(&self) -> BufferStatus {
        let config = self.channel.config();
        BufferStatus {
            batch_size: config.batch_size,
            buffer_threshold: config.buffer_threshold,
            max_queue_size: config.max_queue_size,
            is_buffer_ready: self.channel.is_ready(),
            metrics: self.monitor.snapshot(),
        }
    }
}
