//! Frame and tensor types that travel the streaming bridge.
//!
//! # Ownership model
//!
//! A frame arrives as a raw [`VideoFrame`] or [`AudioFrame`], is converted
//! into a [`Tensor`] (video) or mono sample buffer (audio), and from that
//! point the tensor and the frame's timing metadata travel separately:
//! the tensor through the bounded input channel toward the engine, the
//! metadata through the orchestrator's FIFO record queue.  The shared
//! [`DispatchTag`] is the only link between the two halves — it records
//! whether the tensor was ever actually handed to the engine, so the
//! egress side can discard metadata whose tensor was dropped.
//!
//! # Invariants
//!
//! 1. `Tensor::data.len() == shape.element_count()` at all times.
//! 2. Stacking N single-frame tensors preserves sub-position order:
//!    unit `i` of the stacked tensor is the `i`-th input.
//! 3. A [`DispatchTag`] transitions `Pending → Submitted` at most once and
//!    never back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{LinkError, Result};

// ─── Timing ──────────────────────────────────────────────────────────────

/// A stream time base as a rational number (e.g. 1/90000 for MPEG video).
///
/// Presentation timestamps are expressed in units of `num/den` seconds and
/// are copied through the bridge unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }
}

// ─── Tensors ─────────────────────────────────────────────────────────────

/// Logical shape of a dense NHWC float tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TensorShape {
    /// Number of stacked frames (1 for a single preprocessed frame).
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl TensorShape {
    /// Total number of `f32` elements for this shape.
    #[inline]
    pub const fn element_count(&self) -> usize {
        self.batch * self.height * self.width * self.channels
    }

    /// Elements contributed by a single frame (batch of 1).
    #[inline]
    pub const fn unit_elements(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// The same shape with `batch == 1`.
    #[inline]
    pub const fn unit(&self) -> TensorShape {
        TensorShape {
            batch: 1,
            height: self.height,
            width: self.width,
            channels: self.channels,
        }
    }
}

/// A dense NHWC float tensor — the unit of work crossing the engine
/// boundary on the video path.
///
/// Preprocessing produces normalized values in `[0.0, 1.0]`; the engine may
/// return values outside that range, which postprocessing clamps.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: TensorShape,
}

impl Tensor {
    /// Build a tensor, validating that `data` matches `shape`.
    pub fn new(data: Vec<f32>, shape: TensorShape) -> Result<Self> {
        if data.len() != shape.element_count() {
            return Err(LinkError::InvariantViolation(format!(
                "tensor data length {} does not match shape {:?}",
                data.len(),
                shape
            )));
        }
        Ok(Self { data, shape })
    }

    /// Zero-filled tensor of the given shape.
    pub fn zeros(shape: TensorShape) -> Self {
        Self {
            data: vec![0.0; shape.element_count()],
            shape,
        }
    }

    /// Stack single-frame tensors into one batch tensor.
    ///
    /// Sub-position `i` of the result is `units[i]`.  All inputs must share
    /// the same per-frame shape and have `batch == 1`.
    pub fn stack(units: Vec<Tensor>) -> Result<Tensor> {
        let first = units
            .first()
            .ok_or_else(|| LinkError::InvariantViolation("cannot stack zero tensors".into()))?;
        let unit_shape = first.shape;
        if unit_shape.batch != 1 {
            return Err(LinkError::ShapeMismatch {
                expected: unit_shape.unit(),
                actual: unit_shape,
            });
        }

        let mut data = Vec::with_capacity(unit_shape.element_count() * units.len());
        let count = units.len();
        for unit in units {
            if unit.shape != unit_shape {
                return Err(LinkError::ShapeMismatch {
                    expected: unit_shape,
                    actual: unit.shape,
                });
            }
            data.extend_from_slice(&unit.data);
        }

        Ok(Tensor {
            data,
            shape: TensorShape {
                batch: count,
                ..unit_shape
            },
        })
    }

    /// Split a batch tensor back into single-frame tensors, preserving
    /// sub-position order.
    pub fn into_units(self) -> Vec<Tensor> {
        let unit_shape = self.shape.unit();
        let stride = unit_shape.element_count();
        if self.shape.batch <= 1 {
            return vec![self];
        }
        self.data
            .chunks_exact(stride)
            .map(|chunk| Tensor {
                data: chunk.to_vec(),
                shape: unit_shape,
            })
            .collect()
    }
}

// ─── Raw frames (codec collaborator surface) ─────────────────────────────

/// One raw video frame as supplied/consumed by the codec layer.
///
/// Pixel data is interleaved RGB24, row-major, `width * height * 3` bytes.
/// `pts` and `time_base` are opaque to the bridge and copied through to the
/// processed frame unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts: i64,
    pub time_base: Rational,
}

/// One raw audio frame: interleaved stereo `i16` samples.
///
/// `samples` is the per-channel sample count the frame represents — the
/// count an emitted processed frame must carry, independent of the engine's
/// native output chunk size.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub data: Vec<i16>,
    pub sample_rate: u32,
    pub samples: usize,
    pub pts: i64,
    pub time_base: Rational,
}

// ─── Dispatch state ──────────────────────────────────────────────────────

/// Whether a frame's tensor was ever handed to the inference engine.
///
/// Replaces a mutable "skipped" boolean: the state is an explicit two-value
/// tag set exactly once, at the moment the batch accumulator drains the
/// tensor toward the engine.  Metadata records still `Pending` at egress
/// had their tensor dropped (reconfiguration shrink) and must be discarded
/// so records and results stay aligned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchState {
    Pending,
    Submitted,
}

/// Shared handle to a frame's [`DispatchState`].
///
/// Cheap to clone; one clone rides the input channel with the tensor, the
/// other rides the metadata queue with the record.
#[derive(Clone, Debug, Default)]
pub struct DispatchTag {
    submitted: Arc<AtomicBool>,
}

impl DispatchTag {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-way transition `Pending → Submitted`.
    #[inline]
    pub fn mark_submitted(&self) {
        self.submitted.store(true, Ordering::Release);
    }

    #[inline]
    pub fn state(&self) -> DispatchState {
        if self.submitted.load(Ordering::Acquire) {
            DispatchState::Submitted
        } else {
            DispatchState::Pending
        }
    }

    #[inline]
    pub fn is_submitted(&self) -> bool {
        self.state() == DispatchState::Submitted
    }
}

// ─── Metadata records ────────────────────────────────────────────────────

/// Timing metadata for one in-flight video frame.
///
/// Created at ingress, consumed exactly once at egress when the paired
/// inference result arrives; never mutated after submission apart from the
/// tag transition.
#[derive(Clone, Debug)]
pub struct VideoRecord {
    pub tag: DispatchTag,
    pub pts: i64,
    pub time_base: Rational,
}

/// Timing metadata for one in-flight audio frame.
#[derive(Clone, Debug)]
pub struct AudioRecord {
    pub tag: DispatchTag,
    pub pts: i64,
    pub time_base: Rational,
    pub sample_rate: u32,
    /// Requested per-channel sample count for the emitted frame.
    pub samples: usize,
}
