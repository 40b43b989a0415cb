//! Core library for the `cnsvol` volume lifecycle tool.
//!
//! The crate exposes a session abstraction over a cloud-native storage
//! control plane, a builder that validates volume requests before anything is
//! sent, a poller that resolves asynchronous tasks into typed outcomes, and an
//! orchestrator that drives create, query, and delete operations through the
//! `idle → submitting → awaiting task → completed` lifecycle.

pub mod config;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod session;
pub mod task;
pub mod test_support;
pub mod volume;

pub use config::{CnsConfig, ConfigError, ConnectOptions, Credentials};
pub use error::{ErrorKind, LifecycleError, Phase};
pub use http::{HttpSession, HttpSessionError};
pub use orchestrator::{
    Completion, CreateVolumeParams, Operation, OperationKind, OrchestratorConfig, Plan,
    PlanReport, PlanStep, VolumeOrchestrator,
};
pub use session::{
    OperationFault, Session, SessionFuture, TaskHandle, TaskInfo, TaskResult, TaskState,
    VolumeRecord,
};
pub use task::{TaskOutcome, TaskPoller};
pub use volume::{
    ClusterMetadata, DatastoreRef, DeleteRequest, QueryFilter, RequestError, VolumeCreateRequest,
    VolumeCreateRequestBuilder, VolumeId,
};
