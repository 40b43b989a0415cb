//! Test support utilities shared across unit and integration tests.
//!
//! [`InMemorySession`] simulates the storage endpoint well enough to run the
//! whole lifecycle offline: volumes live in a map, every submission becomes a
//! task, and failures can be injected at each step. The CLI also uses it when
//! `CNSVOL_FAKE_SESSION` is set.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::session::{
    OperationFault, Session, SessionFuture, TaskHandle, TaskInfo, TaskResult, TaskState,
    VolumeRecord,
};
use crate::volume::{DatastoreRef, DeleteRequest, QueryFilter, VolumeCreateRequest, VolumeId};

/// Failure points that can be injected into an [`InMemorySession`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionFailure {
    /// Every submission fails at the transport level.
    Submit,
    /// Every task poll fails at the transport level.
    TaskInfo,
    /// Tasks complete without a result.
    EmptyResult,
    /// Create results omit the volume identifier.
    OmitVolumeId,
    /// Tasks end in the backend error state.
    TaskError,
    /// Datastore lookups fail.
    DatastoreLookup,
}

impl SessionFailure {
    const fn flag(self) -> u8 {
        match self {
            Self::Submit => 0b00_0001,
            Self::TaskInfo => 0b00_0010,
            Self::EmptyResult => 0b00_0100,
            Self::OmitVolumeId => 0b00_1000,
            Self::TaskError => 0b01_0000,
            Self::DatastoreLookup => 0b10_0000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Failures(u8);

impl Failures {
    const fn set(&mut self, failure: SessionFailure) {
        self.0 |= failure.flag();
    }

    const fn contains(self, failure: SessionFailure) -> bool {
        self.0 & failure.flag() != 0
    }
}

/// Errors raised by the in-memory session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InMemorySessionError {
    /// Simulated connectivity failure.
    #[error("session unreachable during {0}")]
    Unreachable(&'static str),
    /// A handle that was never issued.
    #[error("unknown task {0}")]
    UnknownTask(String),
    /// Result payload did not match the expected shape.
    #[error("failed to decode task result: {0}")]
    Decode(String),
    /// Simulated lookup failure.
    #[error("datastore {datastore} not found in datacenter {datacenter}")]
    DatastoreNotFound {
        /// Datacenter searched.
        datacenter: String,
        /// Datastore requested.
        datastore: String,
    },
}

#[derive(Debug)]
struct PendingTask {
    remaining_polls: u32,
    state: TaskState,
    error: Option<String>,
    result: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
struct State {
    volumes: BTreeMap<VolumeId, VolumeRecord>,
    tasks: HashMap<String, PendingTask>,
    next_task: u32,
    pending_polls: u32,
    failures: Failures,
    injected_fault: Option<OperationFault>,
    submit_calls: u32,
    task_info_calls: u32,
}

impl State {
    fn enqueue(&mut self, result: Option<TaskResult>) -> TaskHandle {
        self.next_task += 1;
        let id = format!("task-{}", self.next_task);
        let failed = self.failures.contains(SessionFailure::TaskError);
        let result = if failed || self.failures.contains(SessionFailure::EmptyResult) {
            None
        } else {
            result.map(|mut payload| {
                if let Some(fault) = self.injected_fault.clone() {
                    payload.fault = Some(fault);
                }
                serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
            })
        };
        self.tasks.insert(
            id.clone(),
            PendingTask {
                remaining_polls: self.pending_polls,
                state: if failed {
                    TaskState::Error
                } else {
                    TaskState::Success
                },
                error: failed.then(|| String::from("simulated task failure")),
                result,
            },
        );
        TaskHandle::new(id)
    }

    fn begin_submit(&mut self) -> Result<(), InMemorySessionError> {
        self.submit_calls += 1;
        if self.failures.contains(SessionFailure::Submit) {
            return Err(InMemorySessionError::Unreachable("submit"));
        }
        Ok(())
    }
}

/// Simulated session backed by an in-memory volume table.
#[derive(Clone, Debug, Default)]
pub struct InMemorySession {
    state: Arc<Mutex<State>>,
}

impl InMemorySession {
    /// Creates an empty session with no injected failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Injects a failure for all subsequent calls.
    pub fn fail(&self, failure: SessionFailure) {
        self.lock().failures.set(failure);
    }

    /// Attaches `fault` to every subsequent task result.
    pub fn inject_fault(&self, fault: OperationFault) {
        self.lock().injected_fault = Some(fault);
    }

    /// Makes each new task report `running` for `polls` polls before it
    /// completes.
    pub fn set_pending_polls(&self, polls: u32) {
        self.lock().pending_polls = polls;
    }

    /// Registers a completed task carrying `result`.
    pub fn enqueue_result(&self, result: TaskResult) -> TaskHandle {
        self.lock().enqueue(Some(result))
    }

    /// Registers a task that ends in the backend error state.
    pub fn enqueue_task_error(&self, message: impl Into<String>) -> TaskHandle {
        let mut state = self.lock();
        let handle = state.enqueue(None);
        if let Some(task) = state.tasks.get_mut(handle.as_str()) {
            task.state = TaskState::Error;
            task.error = Some(message.into());
        }
        handle
    }

    /// Returns a snapshot of the stored volumes.
    #[must_use]
    pub fn volumes(&self) -> Vec<VolumeRecord> {
        self.lock().volumes.values().cloned().collect()
    }

    /// Returns the number of submissions attempted.
    #[must_use]
    pub fn submit_calls(&self) -> u32 {
        self.lock().submit_calls
    }

    /// Returns the number of task polls attempted.
    #[must_use]
    pub fn task_info_calls(&self) -> u32 {
        self.lock().task_info_calls
    }
}

impl Session for InMemorySession {
    type Error = InMemorySessionError;

    fn find_datastore<'a>(
        &'a self,
        datacenter: &'a str,
        datastore: &'a str,
    ) -> SessionFuture<'a, DatastoreRef, Self::Error> {
        Box::pin(async move {
            if self.lock().failures.contains(SessionFailure::DatastoreLookup) {
                return Err(InMemorySessionError::DatastoreNotFound {
                    datacenter: datacenter.to_owned(),
                    datastore: datastore.to_owned(),
                });
            }
            Ok(DatastoreRef::new(
                format!("datastore-{datastore}"),
                format!("ds:///vmfs/volumes/{datastore}/"),
            ))
        })
    }

    fn submit_create_volume<'a>(
        &'a self,
        request: &'a VolumeCreateRequest,
    ) -> SessionFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.begin_submit()?;

            if state
                .volumes
                .values()
                .any(|record| record.name == request.name)
            {
                let fault = OperationFault::new(
                    "CnsAlreadyRegisteredFault",
                    format!("volume {} already exists", request.name),
                );
                return Ok(state.enqueue(Some(TaskResult {
                    fault: Some(fault),
                    ..TaskResult::default()
                })));
            }

            let volume_id = VolumeId::new(format!("{}-generated", request.name));
            state.volumes.insert(
                volume_id.clone(),
                VolumeRecord {
                    volume_id: volume_id.clone(),
                    name: request.name.clone(),
                    capacity_mb: request.size_mb,
                    datastore_url: request.datastores.first().map(|ds| ds.url.clone()),
                    cluster: Some(request.cluster.clone()),
                },
            );
            let reported = (!state.failures.contains(SessionFailure::OmitVolumeId))
                .then_some(volume_id);
            Ok(state.enqueue(Some(TaskResult {
                volume_id: reported,
                ..TaskResult::default()
            })))
        })
    }

    fn submit_query_volume<'a>(
        &'a self,
        filter: &'a QueryFilter,
    ) -> SessionFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.begin_submit()?;

            let wanted: BTreeSet<&VolumeId> = filter.volume_ids.iter().collect();
            let volumes = state
                .volumes
                .values()
                .filter(|record| wanted.contains(&record.volume_id))
                .cloned()
                .collect();
            Ok(state.enqueue(Some(TaskResult {
                volumes,
                ..TaskResult::default()
            })))
        })
    }

    fn submit_delete_volume<'a>(
        &'a self,
        request: &'a DeleteRequest,
    ) -> SessionFuture<'a, TaskHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.begin_submit()?;

            let missing = request
                .volume_ids
                .iter()
                .find(|id| !state.volumes.contains_key(*id))
                .cloned();
            let result = if let Some(id) = missing {
                TaskResult {
                    fault: Some(OperationFault::new(
                        "CnsFault",
                        format!("volume {id} not found"),
                    )),
                    ..TaskResult::default()
                }
            } else {
                for id in &request.volume_ids {
                    state.volumes.remove(id);
                }
                TaskResult::default()
            };
            Ok(state.enqueue(Some(result)))
        })
    }

    fn task_info<'a>(
        &'a self,
        handle: &'a TaskHandle,
    ) -> SessionFuture<'a, TaskInfo, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.task_info_calls += 1;
            if state.failures.contains(SessionFailure::TaskInfo) {
                return Err(InMemorySessionError::Unreachable("task_info"));
            }

            let task = state
                .tasks
                .get_mut(handle.as_str())
                .ok_or_else(|| InMemorySessionError::UnknownTask(handle.to_string()))?;
            if task.remaining_polls > 0 {
                task.remaining_polls -= 1;
                return Ok(TaskInfo {
                    handle: handle.clone(),
                    state: TaskState::Running,
                    error: None,
                    result: None,
                });
            }
            Ok(TaskInfo {
                handle: handle.clone(),
                state: task.state,
                error: task.error.clone(),
                result: task.result.clone(),
            })
        })
    }

    fn task_result(&self, info: &TaskInfo) -> Result<Option<TaskResult>, Self::Error> {
        info.result
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| InMemorySessionError::Decode(err.to_string()))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
