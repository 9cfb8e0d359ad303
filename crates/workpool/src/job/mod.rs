//! Job abstractions
//!
//! Jobs are the units of work handed to a [`WorkerPool`](crate::worker::WorkerPool). They:
//! - Carry an opaque, caller-defined payload
//! - Are identified by a [`JobId`] assigned at submission time
//! - Produce exactly one [`JobResult`] when a worker executes them

mod context;
mod definition;
mod result;

pub use context::JobContext;
pub use definition::{DynJob, Job, JobHandler, JobId, Priority};
pub use result::{JobError, JobErrorKind, JobResult};
