#![doc = include_str!("../README.md")]

pub mod batch;
pub mod channel;
pub mod context;
pub mod convert;
pub mod correlate;
mod dispatch;
pub mod loopback;
pub mod pipeline;

pub use context::{BufferContext, BufferStatus};
pub use pipeline::{Pipeline, PipelineOptions};
