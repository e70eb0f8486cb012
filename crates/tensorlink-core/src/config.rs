//! Runtime-tunable buffering configuration.

use serde::{Deserialize, Serialize};

/// Batch and queue sizing for the input channel.
///
/// Mutable at runtime: applying a new config through the pipeline resets the
/// buffer-ready latch and rebuilds the channel to the new capacity while
/// preserving queued frames (oldest first, up to the new capacity).
///
/// # Invariants (enforced by [`BufferConfig::clamped`])
///
/// - `batch_size ≥ 1`
/// - `buffer_threshold ≥ 1`
/// - `max_queue_size ≥ buffer_threshold + 1` (room to keep filling while a
///   batch is being drained)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Frames submitted to the engine as one unit of work.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batches that must accumulate before the first batch after a
    /// (re)configuration is released.
    #[serde(default = "default_buffer_threshold")]
    pub buffer_threshold: usize,
    /// Maximum batches the input channel may hold.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_batch_size() -> usize {
    1
}

fn default_buffer_threshold() -> usize {
    2
}

fn default_max_queue_size() -> usize {
    5
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            buffer_threshold: default_buffer_threshold(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl BufferConfig {
    /// Build a config from raw values, clamping each field into its valid
    /// range rather than rejecting.
    pub fn clamped(batch_size: usize, buffer_threshold: usize, max_queue_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let buffer_threshold = buffer_threshold.max(1);
        let max_queue_size = max_queue_size.max(buffer_threshold + 1);
        Self {
            batch_size,
            buffer_threshold,
            max_queue_size,
        }
    }

    /// Return a copy of `self` with every field clamped into range.
    pub fn normalized(self) -> Self {
        Self::clamped(self.batch_size, self.buffer_threshold, self.max_queue_size)
    }

    /// Input channel capacity in individual tensors.
    ///
    /// Holds at all times, including immediately after reconfiguration.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.max_queue_size * self.batch_size
    }

    /// Queue depth at which the ready latch trips for `batch_size > 1`.
    #[inline]
    pub const fn ready_depth(&self) -> usize {
        self.buffer_threshold * self.batch_size
    }
}
