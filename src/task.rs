//! Task polling and result extraction.
//!
//! A submitted task resolves into one of three shapes: a transport-class
//! [`LifecycleError`], an [`LifecycleError::EmptyResult`] when the backend
//! finished without attaching a result, or a [`TaskOutcome`] that is either a
//! success payload or an [`OperationFault`] carried inside the result.

use std::time::{Duration, Instant};

use log::debug;
use tokio::time::sleep;

use crate::error::{ErrorKind, LifecycleError, Phase};
use crate::orchestrator::OperationKind;
use crate::session::{OperationFault, Session, TaskHandle, TaskInfo, TaskResult, TaskState};

/// Delay between task polls when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Resolution of a task that ran to completion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskOutcome<T> {
    /// The operation succeeded.
    Success(T),
    /// The task ran but the operation failed logically.
    OperationFault(OperationFault),
}

impl<T> TaskOutcome<T> {
    /// Maps the success payload.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskOutcome<U> {
        match self {
            Self::Success(value) => TaskOutcome::Success(f(value)),
            Self::OperationFault(fault) => TaskOutcome::OperationFault(fault),
        }
    }

    /// Returns the error kind for faulted outcomes.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success(_) => None,
            Self::OperationFault(_) => Some(ErrorKind::OperationFault),
        }
    }
}

/// Waits for tasks to finish and extracts their results.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TaskPoller {
    poll_interval: Duration,
    wait_timeout: Option<Duration>,
}

impl Default for TaskPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPoller {
    /// Creates a poller with the default interval and no wait limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: None,
        }
    }

    /// Overrides the delay between polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bounds the total time spent waiting on one task. `None` waits for as
    /// long as the session keeps answering.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Polls a task until it reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Transport`] when a poll fails,
    /// [`LifecycleError::TaskFailed`] when the backend reports the task as
    /// failed, and [`LifecycleError::Timeout`] when the wait limit elapses.
    pub async fn wait_for_completion<S: Session>(
        &self,
        session: &S,
        operation: OperationKind,
        handle: &TaskHandle,
    ) -> Result<TaskInfo, LifecycleError<S::Error>> {
        let started = Instant::now();
        loop {
            let info = session
                .task_info(handle)
                .await
                .map_err(|source| LifecycleError::Transport {
                    operation,
                    phase: Phase::AwaitingTask,
                    source,
                })?;

            match info.state {
                TaskState::Success => return Ok(info),
                TaskState::Error => {
                    return Err(LifecycleError::TaskFailed {
                        operation,
                        task: handle.clone(),
                        message: info
                            .error
                            .unwrap_or_else(|| String::from("no error detail reported")),
                    });
                }
                TaskState::Queued | TaskState::Running => {}
            }

            let waited = started.elapsed();
            let mut delay = self.poll_interval;
            if let Some(limit) = self.wait_timeout {
                if waited >= limit {
                    return Err(LifecycleError::Timeout {
                        operation,
                        task: handle.clone(),
                        waited,
                    });
                }
                // The final poll lands on the deadline.
                delay = delay.min(limit.saturating_sub(waited));
            }

            debug!("{operation} task {handle} is {:?}; polling again", info.state);
            sleep(delay).await;
        }
    }

    /// Consumes a task handle and resolves it into an outcome.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::wait_for_completion`] and
    /// [`extract_outcome`].
    pub async fn resolve<S: Session>(
        &self,
        session: &S,
        operation: OperationKind,
        handle: TaskHandle,
    ) -> Result<TaskOutcome<TaskResult>, LifecycleError<S::Error>> {
        let info = self
            .wait_for_completion(session, operation, &handle)
            .await?;
        extract_outcome(session, operation, &info)
    }
}

/// Extracts the outcome from a completed task.
///
/// # Errors
///
/// Returns [`LifecycleError::Transport`] when the result cannot be fetched or
/// decoded and [`LifecycleError::EmptyResult`] when no result is attached.
pub fn extract_outcome<S: Session>(
    session: &S,
    operation: OperationKind,
    info: &TaskInfo,
) -> Result<TaskOutcome<TaskResult>, LifecycleError<S::Error>> {
    let result = session
        .task_result(info)
        .map_err(|source| LifecycleError::Transport {
            operation,
            phase: Phase::AwaitingTask,
            source,
        })?
        .ok_or_else(|| LifecycleError::EmptyResult {
            operation,
            detail: format!("task {} completed without a result", info.handle),
        })?;

    if let Some(fault) = result.fault {
        return Ok(TaskOutcome::OperationFault(fault));
    }
    Ok(TaskOutcome::Success(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InMemorySession, InMemorySessionError};
    use rstest::{fixture, rstest};

    #[fixture]
    fn session() -> InMemorySession {
        InMemorySession::new()
    }

    fn fast_poller() -> TaskPoller {
        TaskPoller::new().with_poll_interval(Duration::from_millis(1))
    }

    fn completed(result: Option<serde_json::Value>) -> TaskInfo {
        TaskInfo {
            handle: TaskHandle::new("task-1"),
            state: TaskState::Success,
            error: None,
            result,
        }
    }

    #[rstest]
    fn populated_fault_is_operation_fault(session: InMemorySession) {
        let payload = serde_json::json!({
            "volume_id": "vol-1",
            "fault": { "kind": "CnsAlreadyRegisteredFault", "message": "exists" }
        });
        let outcome = extract_outcome(&session, OperationKind::Create, &completed(Some(payload)))
            .expect("extraction succeeds");
        assert_eq!(
            outcome,
            TaskOutcome::OperationFault(OperationFault::new("CnsAlreadyRegisteredFault", "exists"))
        );
        assert_eq!(outcome.error_kind(), Some(ErrorKind::OperationFault));
    }

    #[rstest]
    fn absent_result_is_empty_result(session: InMemorySession) {
        let err = extract_outcome(&session, OperationKind::Delete, &completed(None))
            .expect_err("missing result must fail");
        assert_eq!(err.kind(), ErrorKind::EmptyResult);
    }

    #[rstest]
    fn undecodable_result_is_transport(session: InMemorySession) {
        let payload = serde_json::json!({ "volumes": "not-a-list" });
        let err = extract_outcome(&session, OperationKind::Query, &completed(Some(payload)))
            .expect_err("bad payload must fail");
        assert!(
            matches!(
                err,
                LifecycleError::Transport {
                    phase: Phase::AwaitingTask,
                    source: InMemorySessionError::Decode(_),
                    ..
                }
            ),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn waits_through_pending_polls(session: InMemorySession) {
        session.set_pending_polls(3);
        let handle = session.enqueue_result(crate::session::TaskResult::default());

        let info = fast_poller()
            .wait_for_completion(&session, OperationKind::Query, &handle)
            .await
            .expect("task completes");

        assert_eq!(info.state, TaskState::Success);
        assert_eq!(session.task_info_calls(), 4);
    }

    #[rstest]
    #[tokio::test]
    async fn failed_task_surfaces_message(session: InMemorySession) {
        let handle = session.enqueue_task_error("disk backing unavailable");

        let err = fast_poller()
            .resolve(&session, OperationKind::Create, handle)
            .await
            .expect_err("task failure");

        assert!(
            matches!(
                err,
                LifecycleError::TaskFailed { ref message, .. }
                    if message == "disk backing unavailable"
            ),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn wait_timeout_elapses(session: InMemorySession) {
        session.set_pending_polls(u32::MAX);
        let handle = session.enqueue_result(crate::session::TaskResult::default());

        let err = fast_poller()
            .with_wait_timeout(Some(Duration::from_millis(5)))
            .resolve(&session, OperationKind::Query, handle)
            .await
            .expect_err("timeout");

        assert!(matches!(err, LifecycleError::Timeout { .. }), "{err}");
    }

    #[rstest]
    #[tokio::test]
    async fn wait_timeout_caps_the_poll_delay(session: InMemorySession) {
        session.set_pending_polls(u32::MAX);
        let handle = session.enqueue_result(crate::session::TaskResult::default());
        let poller = TaskPoller::new()
            .with_poll_interval(Duration::from_secs(3600))
            .with_wait_timeout(Some(Duration::from_millis(10)));

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            poller.resolve(&session, OperationKind::Query, handle),
        )
        .await
        .expect("wait ends at the deadline, not after a full interval")
        .expect_err("timeout");

        assert!(matches!(err, LifecycleError::Timeout { .. }), "{err}");
        assert_eq!(session.task_info_calls(), 2);
    }
}
