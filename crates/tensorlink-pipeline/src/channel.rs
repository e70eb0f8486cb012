//! Bounded input channel — tensors awaiting batch formation.
//!
//! # Backpressure
//!
//! The channel is bounded at `config.capacity()` tensors.  A producer at
//! capacity blocks until the consumer drains a slot — frames are never
//! dropped on the ingress path, which is what keeps metadata records and
//! inference results aligned frame-for-frame.
//!
//! # Ready latch
//!
//! With `batch_size > 1` the consumer is gated until the queue has filled
//! to `buffer_threshold * batch_size` once.  The latch then stays set for
//! the rest of the configuration epoch, so only the first batch after a
//! (re)configuration pays the fill delay.
//!
//! # Reconfiguration
//!
//! `configure()` holds the same mutex as push/pop, so the capacity change
//! and content migration are atomic with respect to concurrent traffic: no
//! tensor is lost or duplicated mid-swap.  Queued tensors are kept oldest
//! first up to the new capacity; entries beyond it are discarded with
//! their dispatch tags still `Pending`, which routes the orphaned metadata
//! records to the egress discard path.
//!
//! # Blocking model
//!
//! Waits are condvar-based (no sleep polling).  All operations block the
//! calling OS thread, so they belong on `spawn_blocking` workers, never on
//! the cooperative scheduler.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use tensorlink_core::config::BufferConfig;
use tensorlink_core::error::{LinkError, Result};
use tensorlink_core::types::{DispatchTag, Tensor};

struct ChannelState {
    queue: VecDeque<(Tensor, DispatchTag)>,
    config: BufferConfig,
    ready: bool,
    closed: bool,
}

/// Bounded blocking queue of `(tensor, tag)` pairs with a per-epoch ready
/// latch.  See the module docs for the full contract.
pub struct InputChannel {
    state: Mutex<ChannelState>,
    /// Signalled on push, configure, and close — wakes consumers.
    readable: Condvar,
    /// Signalled on pop, configure, and close — wakes blocked producers.
    writable: Condvar,
}

impl InputChannel {
    pub fn new(config: BufferConfig) -> Self {
        let config = config.normalized();
        Self {
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(config.capacity()),
                config,
                ready: false,
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Push one tensor, blocking while the channel is at capacity.
    ///
    /// Fails with [`LinkError::ChannelClosed`] once the channel has been
    /// abandoned — including while blocked.
    pub fn submit(&self, tensor: Tensor, tag: DispatchTag) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(LinkError::ChannelClosed);
            }
            if state.queue.len() < state.config.capacity() {
                break;
            }
            state = self.writable.wait(state).unwrap();
        }
        state.queue.push_back((tensor, tag));
        self.readable.notify_all();
        Ok(())
    }

    /// Pop the oldest tensor, blocking while the channel is empty.
    pub fn pop(&self) -> Result<(Tensor, DispatchTag)> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(LinkError::ChannelClosed);
            }
            if let Some(entry) = state.queue.pop_front() {
                self.writable.notify_all();
                return Ok(entry);
            }
            state = self.readable.wait(state).unwrap();
        }
    }

    /// Block until the ready latch is set for this configuration epoch.
    ///
    /// Returns immediately for `batch_size == 1` (single-frame mode has no
    /// gating) or once the latch tripped earlier in the epoch.
    pub fn wait_ready(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(LinkError::ChannelClosed);
            }
            if state.config.batch_size == 1 || state.ready {
                return Ok(());
            }
            if state.queue.len() >= state.config.ready_depth() {
                state.ready = true;
                return Ok(());
            }
            state = self.readable.wait(state).unwrap();
        }
    }

    /// Apply a new configuration, returning the clamped config actually
    /// installed.
    ///
    /// Resets the ready latch and migrates queued tensors in original
    /// order, truncating at the new capacity.
    pub fn configure(&self, config: BufferConfig) -> BufferConfig {
        let config = config.normalized();
        let mut state = self.state.lock().unwrap();
        state.config = config;
        state.ready = false;
        state.queue.truncate(config.capacity());
        // Wake everyone: capacity or gating conditions may have changed.
        self.readable.notify_all();
        self.writable.notify_all();
        config
    }

    /// Abandon the channel: all blocked and future operations fail with
    /// [`LinkError::ChannelClosed`].  Queued tensors are discarded.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.queue.clear();
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().config.capacity()
    }

    /// Current depth over capacity, in `[0, 1]`.
    pub fn fill_level(&self) -> f64 {
        let state = self.state.lock().unwrap();
        state.queue.len() as f64 / state.config.capacity() as f64
    }

    /// Raw latch state.  Single-frame mode never trips the latch — it has
    /// no gating to be ready *for* — so this stays `false` there.
    pub fn is_ready(&self) -> bool {
        self.state.lock().unwrap().ready
    }

    pub fn config(&self) -> BufferConfig {
        self.state.lock().unwrap().config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn tensor(v: f32) -> Tensor {
        Tensor::new(
            vec![v],
            tensorlink_core::types::TensorShape {
                batch: 1,
                height: 1,
                width: 1,
                channels: 1,
            },
        )
        .expect("valid tensor")
    }

    fn fill(channel: &InputChannel, values: std::ops::Range<u32>) {
        for v in values {
            channel
                .submit(tensor(v as f32), DispatchTag::new())
                .expect("submit");
        }
    }

    #[test]
    fn capacity_follows_config() {
        let channel = InputChannel::new(BufferConfig::clamped(4, 2, 5));
        assert_eq!(channel.capacity(), 20);

        let applied = channel.configure(BufferConfig::clamped(2, 1, 3));
        assert_eq!(applied.capacity(), 6);
        assert_eq!(channel.capacity(), 6);
    }

    #[test]
    fn pop_returns_fifo_order() {
        let channel = InputChannel::new(BufferConfig::clamped(1, 1, 8));
        fill(&channel, 0..5);
        for v in 0..5 {
            let (t, _) = channel.pop().expect("pop");
            assert_eq!(t.data[0], v as f32);
        }
    }

    #[test]
    fn ready_latch_trips_at_threshold_and_stays() {
        let channel = InputChannel::new(BufferConfig::clamped(4, 2, 5));
        assert!(!channel.is_ready());

        fill(&channel, 0..8);
        channel.wait_ready().expect("ready");
        assert!(channel.is_ready());

        // Draining below the threshold does not reset the latch.
        for _ in 0..6 {
            channel.pop().expect("pop");
        }
        assert!(channel.is_ready());

        // Reconfiguration starts a new epoch.
        channel.configure(BufferConfig::clamped(4, 2, 5));
        assert!(!channel.is_ready());
    }

    #[test]
    fn wait_ready_blocks_until_depth_reached() {
        let channel = Arc::new(InputChannel::new(BufferConfig::clamped(4, 2, 5)));
        let (done_tx, done_rx) = mpsc::channel();

        let waiter = {
            let channel = channel.clone();
            thread::spawn(move || {
                channel.wait_ready().expect("ready");
                done_tx.send(()).expect("signal");
            })
        };

        fill(&channel, 0..7);
        assert!(
            done_rx.recv_timeout(Duration::from_millis(50)).is_err(),
            "latch tripped below threshold depth"
        );

        fill(&channel, 7..8);
        done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("latch should trip at depth 8");
        waiter.join().expect("join waiter");
    }

    #[test]
    fn submit_blocks_at_capacity_until_drained() {
        let channel = Arc::new(InputChannel::new(BufferConfig::clamped(1, 1, 2)));
        fill(&channel, 0..2);

        let (done_tx, done_rx) = mpsc::channel();
        let producer = {
            let channel = channel.clone();
            thread::spawn(move || {
                channel.submit(tensor(99.0), DispatchTag::new()).expect("submit");
                done_tx.send(()).expect("signal");
            })
        };

        assert!(
            done_rx.recv_timeout(Duration::from_millis(50)).is_err(),
            "submit should block at capacity"
        );

        channel.pop().expect("pop");
        done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("submit should unblock after drain");
        producer.join().expect("join producer");
    }

    #[test]
    fn shrink_keeps_oldest_frames_in_order() {
        let channel = InputChannel::new(BufferConfig::clamped(1, 1, 5));
        let tags: Vec<DispatchTag> = (0..5).map(|_| DispatchTag::new()).collect();
        for (v, tag) in tags.iter().enumerate() {
            channel.submit(tensor(v as f32), tag.clone()).expect("submit");
        }

        channel.configure(BufferConfig::clamped(1, 1, 3));
        assert_eq!(channel.capacity(), 3);
        assert_eq!(channel.len(), 3);

        for v in 0..3 {
            let (t, tag) = channel.pop().expect("pop");
            assert_eq!(t.data[0], v as f32);
            tag.mark_submitted();
        }

        // The two discarded entries never reached the engine.
        assert!(!tags[3].is_submitted());
        assert!(!tags[4].is_submitted());
    }

    #[test]
    fn shrink_below_depth_keeps_all_when_capacity_allows() {
        // 3 queued, capacity shrinks 5 -> 4: all 3 survive in order.
        let channel = InputChannel::new(BufferConfig::clamped(1, 1, 5));
        fill(&channel, 0..3);
        channel.configure(BufferConfig::clamped(1, 1, 4));
        assert_eq!(channel.len(), 3);
        for v in 0..3 {
            let (t, _) = channel.pop().expect("pop");
            assert_eq!(t.data[0], v as f32);
        }
    }

    #[test]
    fn close_wakes_blocked_operations() {
        let channel = Arc::new(InputChannel::new(BufferConfig::clamped(1, 1, 2)));

        let consumer = {
            let channel = channel.clone();
            thread::spawn(move || channel.pop())
        };

        thread::sleep(Duration::from_millis(20));
        channel.close();

        let err = consumer.join().expect("join").expect_err("closed");
        assert!(matches!(err, LinkError::ChannelClosed));
        assert!(matches!(
            channel.submit(tensor(0.0), DispatchTag::new()),
            Err(LinkError::ChannelClosed)
        ));
    }
}
