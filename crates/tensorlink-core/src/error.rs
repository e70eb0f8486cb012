//! Typed error hierarchy for the streaming bridge.
//!
//! Uses `thiserror` for library-grade errors.  Application code should wrap
//! these in `anyhow::Result` at call sites.
//!
//! Each variant maps to a stable integer code via [`LinkError::error_code`]
//! for structured telemetry without string parsing.

use crate::types::TensorShape;

/// All errors originating from the tensorlink core.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    // ── Buffering ─────────────────────────────────────────────────────
    /// The input channel (or a result queue) was closed while an
    /// operation was blocked on it.  Producers see this after
    /// [`shutdown`](crate::engine::InferenceEngine), never as silent loss.
    #[error("channel closed while waiting")]
    ChannelClosed,

    #[error("pipeline shutdown signal received")]
    Shutdown,

    // ── Engine ────────────────────────────────────────────────────────
    /// Submission to the external inference engine failed.  The core does
    /// not retry; recovery is owned by the caller of the submit path.
    #[error("engine submission failed: {0}")]
    EngineFailure(String),

    /// A pending result handle was dropped without ever being resolved.
    #[error("engine abandoned a pending result: {0}")]
    ResultAbandoned(String),

    // ── Graph ─────────────────────────────────────────────────────────
    #[error("prompt graph error: {0}")]
    Graph(String),

    // ── Type contracts ────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Config(String),

    #[error("tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: TensorShape,
        actual: TensorShape,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl LinkError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: buffering / queues
    /// - 2xx: engine boundary
    /// - 3xx: prompt graph
    /// - 4xx: type contracts
    pub fn error_code(&self) -> u32 {
        match self {
            Self::ChannelClosed => 100,
            Self::Shutdown => 101,
            Self::EngineFailure(_) => 200,
            Self::ResultAbandoned(_) => 201,
            Self::Graph(_) => 300,
            Self::Config(_) => 400,
            Self::ShapeMismatch { .. } => 401,
            Self::InvariantViolation(_) => 402,
        }
    }

    /// Whether this error is part of orderly teardown rather than a fault.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::ChannelClosed | Self::Shutdown)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LinkError>;
