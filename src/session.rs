//! Session abstraction for the storage-management endpoint.
//!
//! A session submits volume operations as backend tasks and reports on their
//! progress. Authentication, transport, and serialisation all live behind
//! this trait; the lifecycle core only sees handles, task states, and
//! decoded results.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::volume::{
    ClusterMetadata, DatastoreRef, DeleteRequest, QueryFilter, VolumeCreateRequest, VolumeId,
};

/// Opaque reference to a task submitted to the backend.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    /// Wraps a backend task identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Progress of a backend task.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Accepted but not started.
    Queued,
    /// In progress.
    Running,
    /// Finished; a result may be attached.
    Success,
    /// The task itself failed to execute.
    Error,
}

impl TaskState {
    /// Returns `true` once the task will no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Snapshot of a task as reported by the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskInfo {
    /// Task the snapshot describes.
    pub handle: TaskHandle,
    /// Current state.
    pub state: TaskState,
    /// Failure description when `state` is [`TaskState::Error`].
    pub error: Option<String>,
    /// Undecoded result payload, present once the task succeeds.
    pub result: Option<serde_json::Value>,
}

/// Structured fault reported inside an otherwise successful task.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OperationFault {
    /// Backend fault type (for example `CnsAlreadyRegisteredFault`).
    pub kind: String,
    /// Human-readable detail supplied by the backend.
    pub message: String,
}

impl OperationFault {
    /// Creates a fault.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationFault {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.kind, self.message)
    }
}

/// Volume entry returned by a query.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeRecord {
    /// Backend identifier.
    pub volume_id: VolumeId,
    /// Volume name.
    pub name: String,
    /// Capacity in megabytes.
    pub capacity_mb: u64,
    /// Datastore holding the volume, when reported.
    pub datastore_url: Option<String>,
    /// Owning cluster tags, when reported.
    pub cluster: Option<ClusterMetadata>,
}

/// Decoded result of a completed volume task.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TaskResult {
    /// Volume created or affected by the task.
    #[serde(default)]
    pub volume_id: Option<VolumeId>,
    /// Volumes matched by a query task.
    #[serde(default)]
    pub volumes: Vec<VolumeRecord>,
    /// Logical failure reported by the backend.
    #[serde(default)]
    pub fault: Option<OperationFault>,
}

/// Future returned by session operations.
pub type SessionFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Authenticated connection able to run volume tasks.
pub trait Session {
    /// Transport-level error type returned by the session.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resolves a datastore by name inside a datacenter.
    fn find_datastore<'a>(
        &'a self,
        datacenter: &'a str,
        datastore: &'a str,
    ) -> SessionFuture<'a, DatastoreRef, Self::Error>;

    /// Submits a volume creation and returns the task tracking it.
    fn submit_create_volume<'a>(
        &'a self,
        request: &'a VolumeCreateRequest,
    ) -> SessionFuture<'a, TaskHandle, Self::Error>;

    /// Submits a volume query and returns the task tracking it.
    fn submit_query_volume<'a>(
        &'a self,
        filter: &'a QueryFilter,
    ) -> SessionFuture<'a, TaskHandle, Self::Error>;

    /// Submits a volume deletion and returns the task tracking it.
    fn submit_delete_volume<'a>(
        &'a self,
        request: &'a DeleteRequest,
    ) -> SessionFuture<'a, TaskHandle, Self::Error>;

    /// Fetches the current state of a task.
    fn task_info<'a>(&'a self, handle: &'a TaskHandle)
    -> SessionFuture<'a, TaskInfo, Self::Error>;

    /// Decodes the result attached to a task snapshot. `Ok(None)` means the
    /// backend attached no result.
    ///
    /// # Errors
    ///
    /// Returns the session error when the payload cannot be decoded.
    fn task_result(&self, info: &TaskInfo) -> Result<Option<TaskResult>, Self::Error>;
}
