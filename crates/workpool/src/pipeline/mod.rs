//! Stage pipelines and fan-out/fan-in
//!
//! This module provides:
//! - [`Stream`] / [`Sink`] - Bounded hand-off between stages ([`channel`])
//! - [`Stage`] - Named async transform, optionally dropping items
//! - [`Pipeline`] / [`PipelineBuilder`] - Linear chain of stages, each on its own task
//! - [`fan_out`] / [`fan_in`] - Split one stream across K consumers and merge K streams back
//!
//! # Architecture
//!
//! ```text
//! source ──► [stage 1] ──► [stage 2] ──► ... ──► output
//!        hand-off     hand-off     hand-off
//! ```
//!
//! Every stage reads its input until it closes, then drops its output. Closing
//! the source therefore closes the output, and no stage stays blocked: a stage
//! whose consumer disappears stops on its next send and drops its own input.

mod builder;
mod channel;
mod fan;
mod stage;

pub use builder::{Pipeline, PipelineBuilder, PipelineError};
pub use channel::{channel, Sink, Stream};
pub use fan::{fan_in, fan_out};
pub use stage::{spawn_stage, Stage};
pub use tokio_util::task::TaskTracker;
