//! Batch accumulator — drains the input channel into engine-sized units.

use std::sync::Arc;
use std::time::Instant;

use tensorlink_core::error::Result;
use tensorlink_core::metrics::HealthMonitor;
use tensorlink_core::types::Tensor;

use crate::channel::InputChannel;

/// Consumer-side batch former.
///
/// `form_batch` blocks the calling thread (channel waits are condvar
/// based), so it runs on the dispatch worker, never on the cooperative
/// scheduler.
#[derive(Clone)]
pub struct BatchAccumulator {
    channel: Arc<InputChannel>,
    monitor: Arc<HealthMonitor>,
}

impl BatchAccumulator {
    pub fn new(channel: Arc<InputChannel>, monitor: Arc<HealthMonitor>) -> Self {
        Self { channel, monitor }
    }

    /// Form the next unit of engine work.
    ///
    /// - `batch_size == 1`: pop one tensor and return it directly —
    ///   single-frame mode keeps its pre-batching latency.
    /// - Otherwise: wait for the epoch's ready latch, then pop exactly
    ///   `batch_size` tensors (blocking on each as needed) and stack them,
    ///   sub-positions 0..B-1 in pop order.
    ///
    /// Every drained tag is marked `Submitted` here — this is the point a
    /// frame counts as handed to the engine.  The observed drain rate is
    /// reported to the health monitor as the processing rate.
    pub fn form_batch(&self) -> Result<Tensor> {
        let config = self.channel.config();
        let started = Instant::now();

        let batch = if config.batch_size == 1 {
            let (tensor, tag) = self.channel.pop()?;
            tag.mark_submitted();
            tensor
        } else {
            self.channel.wait_ready()?;
            let mut units = Vec::with_capacity(config.batch_size);
            for _ in 0..config.batch_size {
                let (tensor, tag) = self.channel.pop()?;
                tag.mark_submitted();
                units.push(tensor);
            }
            Tensor::stack(units)?
        };

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.monitor
                .record_processing_rate(batch.shape.batch as f64 / elapsed, self.channel.fill_level());
        } else {
            self.monitor.record_fill(self.channel.fill_level());
        }

        Ok(batch)
    }
}
