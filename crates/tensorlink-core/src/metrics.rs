//! Buffer health metrics.
//!
//! Producer and consumer sides report their observed rates; every report
//! recomputes the derived fields so any snapshot is internally consistent.
//! The monitor is purely observational — it never applies backpressure
//! beyond what the bounded input channel already enforces.

use std::sync::Mutex;

use serde::Serialize;

/// One consistent snapshot of buffer health.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BufferMetrics {
    /// Current queue depth over capacity, in `[0, 1]`.
    pub fill_level: f64,
    /// Frames per second arriving at the buffer.
    pub input_rate: f64,
    /// Frames per second drained toward the engine.
    pub processing_rate: f64,
    /// `min(1, processing_rate / input_rate)`, or `1` when no input rate
    /// has been observed.  A value below 1 means the buffer is trending
    /// toward growth.
    pub buffer_health: f64,
}

impl Default for BufferMetrics {
    fn default() -> Self {
        Self {
            fill_level: 0.0,
            input_rate: 0.0,
            processing_rate: 0.0,
            buffer_health: 1.0,
        }
    }
}

/// Shared rate/fill tracker for one pipeline instance.
///
/// All fields live behind a single mutex so `fill_level` and
/// `buffer_health` are recomputed atomically with respect to the rate that
/// triggered the update — a reader never observes a health value computed
/// from rates it cannot see.  No operation blocks beyond the lock.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    inner: Mutex<BufferMetrics>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer-side report: observed ingress rate in frames/sec.
    pub fn record_input_rate(&self, rate: f64, fill_level: f64) {
        self.update(Some(rate), None, fill_level);
    }

    /// Consumer-side report: observed drain rate in frames/sec.
    pub fn record_processing_rate(&self, rate: f64, fill_level: f64) {
        self.update(None, Some(rate), fill_level);
    }

    /// Refresh `fill_level` (and the derived health) without a new rate.
    pub fn record_fill(&self, fill_level: f64) {
        self.update(None, None, fill_level);
    }

    fn update(&self, input_rate: Option<f64>, processing_rate: Option<f64>, fill_level: f64) {
        let mut m = self.inner.lock().unwrap();
        if let Some(rate) = input_rate {
            m.input_rate = rate.max(0.0);
        }
        if let Some(rate) = processing_rate {
            m.processing_rate = rate.max(0.0);
        }
        m.fill_level = fill_level.clamp(0.0, 1.0);
        m.buffer_health = if m.input_rate > 0.0 {
            (m.processing_rate / m.input_rate).min(1.0)
        } else {
            1.0
        };
    }

    /// One consistent copy of the current metrics.
    pub fn snapshot(&self) -> BufferMetrics {
        *self.inner.lock().unwrap()
    }
}
