//! Error taxonomy for volume lifecycle runs.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::orchestrator::OperationKind;
use crate::session::TaskHandle;
use crate::volume::RequestError;

/// Coarse classification callers use to decide how to react to a failure.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// Caller input was rejected before anything was submitted.
    InvalidRequest,
    /// The session failed to submit, track, or decode a task.
    Transport,
    /// A completed task carried no usable result.
    EmptyResult,
    /// The backend ran the task and reported a logical failure.
    OperationFault,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::InvalidRequest => "invalid request",
            Self::Transport => "transport error",
            Self::EmptyResult => "empty result",
            Self::OperationFault => "operation fault",
        })
    }
}

/// Step of a single operation run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Nothing has been sent yet.
    Idle,
    /// The descriptor is being handed to the session.
    Submitting,
    /// A task handle exists and is being polled.
    AwaitingTask,
    /// The task resolved into an outcome.
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::AwaitingTask => "awaiting task",
            Self::Completed => "completed",
        })
    }
}

/// Errors surfaced while running volume operations.
///
/// Logical failures reported by the backend are not errors; they arrive as
/// [`crate::TaskOutcome::OperationFault`].
#[derive(Debug, Error)]
pub enum LifecycleError<SessionError>
where
    SessionError: std::error::Error + 'static,
{
    /// Raised when the builder rejects caller input.
    #[error("invalid {operation} request: {source}")]
    InvalidRequest {
        /// Operation being prepared.
        operation: OperationKind,
        /// Validation failure.
        #[source]
        source: RequestError,
    },
    /// Raised when a plan cannot be executed as described.
    #[error("invalid plan: {0}")]
    InvalidPlan(#[source] RequestError),
    /// Raised when the session fails while submitting or tracking a task.
    #[error("{operation} failed while {phase}: {source}")]
    Transport {
        /// Operation in flight.
        operation: OperationKind,
        /// Step that failed.
        phase: Phase,
        /// Session error.
        #[source]
        source: SessionError,
    },
    /// Raised when the datastore cannot be resolved.
    #[error("failed to locate datastore {datastore} in datacenter {datacenter}: {source}")]
    DatastoreLookup {
        /// Datacenter searched.
        datacenter: String,
        /// Datastore name requested.
        datastore: String,
        /// Session error.
        #[source]
        source: SessionError,
    },
    /// Raised when the backend reports the task itself as failed.
    #[error("{operation} task {task} failed: {message}")]
    TaskFailed {
        /// Operation in flight.
        operation: OperationKind,
        /// Failed task.
        task: TaskHandle,
        /// Failure reported by the backend.
        message: String,
    },
    /// Raised when a task does not finish within the configured wait.
    #[error("{operation} task {task} did not finish within {} seconds", .waited.as_secs())]
    Timeout {
        /// Operation in flight.
        operation: OperationKind,
        /// Task being awaited.
        task: TaskHandle,
        /// Time spent waiting.
        waited: Duration,
    },
    /// Raised when a completed task has no usable result.
    #[error("{operation} task returned no usable result: {detail}")]
    EmptyResult {
        /// Operation in flight.
        operation: OperationKind,
        /// What was missing.
        detail: String,
    },
}

impl<SessionError> LifecycleError<SessionError>
where
    SessionError: std::error::Error + 'static,
{
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest { .. } | Self::InvalidPlan(_) => ErrorKind::InvalidRequest,
            Self::Transport { .. }
            | Self::DatastoreLookup { .. }
            | Self::TaskFailed { .. }
            | Self::Timeout { .. } => ErrorKind::Transport,
            Self::EmptyResult { .. } => ErrorKind::EmptyResult,
        }
    }

    /// Returns `true` when a fresh invocation may succeed. Only transport
    /// failures qualify; nothing is ever retried automatically.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }
}
