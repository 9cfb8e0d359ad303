//! Job results and the per-job error taxonomy

use std::any::Any;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::JobId;

/// Kind of job failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The handler returned an error ("job logic failed")
    Failed,

    /// The handler panicked and the worker recovered ("job logic crashed")
    InternalFault,

    /// The handler observed cancellation and gave up
    Cancelled,
}

impl std::fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed => write!(f, "failed"),
            Self::InternalFault => write!(f, "internal_fault"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Error value carried by a failed [`JobResult`]
///
/// Job errors are data: they never cross a worker boundary as a fault and
/// never stop the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    /// What went wrong
    pub kind: JobErrorKind,

    /// Error message
    pub message: String,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl JobError {
    fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Handler-reported failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Failed, message)
    }

    /// Recovered panic or fault
    pub fn internal_fault(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::InternalFault, message)
    }

    /// Handler stopped because cancellation was observed
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Cancelled, message)
    }

    /// Build an internal fault from a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "job handler panicked".to_string()
        };
        Self::internal_fault(message)
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_internal_fault(&self) -> bool {
        self.kind == JobErrorKind::InternalFault
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == JobErrorKind::Cancelled
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for JobError {}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::failed(format!("{err:#}"))
    }
}

/// Outcome of executing one job
///
/// Produced by exactly one worker per job. Results correlate to jobs by
/// `job_id`, never by position in the stream.
#[derive(Debug, Clone)]
pub struct JobResult<O> {
    /// Originating job
    pub job_id: JobId,

    /// Handler output or error
    pub outcome: Result<O, JobError>,

    /// Time spent inside the handler
    pub elapsed: Duration,

    /// Index of the worker that ran the job
    pub worker: usize,

    /// Whether pool cancellation had been signalled when the job finished
    pub cancel_observed: bool,
}

impl<O> JobResult<O> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn output(&self) -> Option<&O> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.outcome.as_ref().err()
    }

    pub fn into_outcome(self) -> Result<O, JobError> {
        self.outcome
    }
}
