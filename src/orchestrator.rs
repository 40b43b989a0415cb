//! Sequences volume operations against a session.
//!
//! Each operation walks `idle → submitting → awaiting task → completed`
//! exactly once. Builder rejections leave the run idle, submission failures
//! skip straight to an error, and nothing is retried. A [`Plan`] chains
//! several operations so a freshly created volume can be queried and deleted
//! in the same invocation.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use log::{debug, info};

use crate::error::{LifecycleError, Phase};
use crate::session::{OperationFault, Session, TaskHandle, VolumeRecord};
use crate::task::{DEFAULT_POLL_INTERVAL, TaskOutcome, TaskPoller};
use crate::volume::{
    ClusterMetadata, DatastoreRef, DeleteRequest, QueryFilter, RequestError, VolumeCreateRequest,
    VolumeId,
};

/// The three supported volume operations.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum OperationKind {
    /// Create a block volume.
    Create,
    /// Query volumes by identifier.
    Query,
    /// Delete volumes by identifier.
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Create => "create",
            Self::Query => "query",
            Self::Delete => "delete",
        })
    }
}

/// Caller-supplied inputs for a create operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateVolumeParams {
    /// Volume name.
    pub name: String,
    /// Requested size in megabytes; validated by the builder.
    pub size_mb: i64,
    /// Target datastores.
    pub datastores: Vec<DatastoreRef>,
}

/// A single operation selected by the caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Create a volume.
    Create(CreateVolumeParams),
    /// Query the given volumes.
    Query(Vec<VolumeId>),
    /// Delete the given volumes.
    Delete {
        /// Volumes to delete.
        volume_ids: Vec<VolumeId>,
        /// Whether the backing disk is removed too.
        delete_disk: bool,
    },
}

impl Operation {
    /// Returns the operation kind.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Create(_) => OperationKind::Create,
            Self::Query(_) => OperationKind::Query,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }
}

/// Terminal report of a completed operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Completion {
    /// A volume was created.
    Created(VolumeId),
    /// The query matched these volumes.
    Queried(Vec<VolumeRecord>),
    /// These volumes were deleted.
    Deleted(Vec<VolumeId>),
    /// The backend ran the task but the operation failed.
    Faulted {
        /// Operation that faulted.
        operation: OperationKind,
        /// Fault reported by the backend.
        fault: OperationFault,
    },
}

/// Settings passed to [`VolumeOrchestrator::new`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrchestratorConfig {
    /// Cluster tags applied to created volumes.
    pub cluster: ClusterMetadata,
    /// Delay between task polls.
    pub poll_interval: Duration,
    /// Optional limit on the time spent waiting for one task.
    pub wait_timeout: Option<Duration>,
}

impl OrchestratorConfig {
    /// Creates a configuration with default polling for the given cluster.
    #[must_use]
    pub const fn new(cluster: ClusterMetadata) -> Self {
        Self {
            cluster,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: None,
        }
    }
}

enum Prepared {
    Create(VolumeCreateRequest),
    Query(QueryFilter),
    Delete(DeleteRequest),
}

/// Runs volume operations one at a time against a session.
#[derive(Debug)]
pub struct VolumeOrchestrator<S> {
    session: S,
    cluster: ClusterMetadata,
    poller: TaskPoller,
}

impl<S: Session> VolumeOrchestrator<S> {
    /// Creates a new orchestrator that owns the session.
    #[must_use]
    pub fn new(session: S, config: OrchestratorConfig) -> Self {
        Self {
            session,
            cluster: config.cluster,
            poller: TaskPoller::new()
                .with_poll_interval(config.poll_interval)
                .with_wait_timeout(config.wait_timeout),
        }
    }

    /// Returns the underlying session.
    #[must_use]
    pub const fn session(&self) -> &S {
        &self.session
    }

    /// Resolves a datastore through the session.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::DatastoreLookup`] when the session fails.
    pub async fn locate_datastore(
        &self,
        datacenter: &str,
        datastore: &str,
    ) -> Result<DatastoreRef, LifecycleError<S::Error>> {
        self.session
            .find_datastore(datacenter, datastore)
            .await
            .map_err(|source| LifecycleError::DatastoreLookup {
                datacenter: datacenter.to_owned(),
                datastore: datastore.to_owned(),
                source,
            })
    }

    /// Runs one operation to completion.
    ///
    /// Operation faults are reported as [`Completion::Faulted`], not as
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidRequest`] when the builder rejects
    /// the input (the session is not contacted), transport-class errors when
    /// submission or polling fails, and [`LifecycleError::EmptyResult`] when
    /// the task finishes without a usable result.
    pub async fn execute(
        &self,
        operation: &Operation,
    ) -> Result<Completion, LifecycleError<S::Error>> {
        let kind = operation.kind();
        let mut phase = Phase::Idle;

        let prepared = self
            .prepare(operation)
            .map_err(|source| LifecycleError::InvalidRequest {
                operation: kind,
                source,
            })?;

        phase = advance(kind, phase, Phase::Submitting);
        let handle = self
            .submit(&prepared)
            .await
            .map_err(|source| LifecycleError::Transport {
                operation: kind,
                phase,
                source,
            })?;

        phase = advance(kind, phase, Phase::AwaitingTask);
        let outcome = self.poller.resolve(&self.session, kind, handle).await?;
        let completion = complete(kind, prepared, outcome)?;
        advance(kind, phase, Phase::Completed);

        Ok(completion)
    }

    /// Runs every operation of a plan in create, query, delete order.
    ///
    /// The volume created by the plan, if any, is the target of the later
    /// steps. A create fault halts the plan; query and delete faults are
    /// recorded and the plan carries on.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidPlan`] when the plan is incomplete
    /// and otherwise the first error raised by [`Self::execute`].
    pub async fn execute_plan(&self, plan: &Plan) -> Result<PlanReport, LifecycleError<S::Error>> {
        plan.validate().map_err(LifecycleError::InvalidPlan)?;

        let mut volume_id = plan.volume_id.clone();
        let mut report = PlanReport::default();
        let mut halted = false;

        for kind in plan.kinds() {
            if halted {
                report.skipped.push(kind);
                continue;
            }

            let operation = plan.operation_for(kind, volume_id.as_ref())?;
            let completion = self.execute(&operation).await?;
            match &completion {
                Completion::Created(id) => volume_id = Some(id.clone()),
                Completion::Faulted {
                    operation: OperationKind::Create,
                    ..
                } => halted = true,
                _ => {}
            }
            report.steps.push(PlanStep {
                operation: kind,
                completion,
            });
        }

        Ok(report)
    }

    fn prepare(&self, operation: &Operation) -> Result<Prepared, RequestError> {
        match operation {
            Operation::Create(params) => VolumeCreateRequest::builder()
                .name(&params.name)
                .size_mb(params.size_mb)
                .datastores(params.datastores.iter().cloned())
                .cluster(self.cluster.clone())
                .build()
                .map(Prepared::Create),
            Operation::Query(volume_ids) => {
                QueryFilter::by_ids(volume_ids.iter().cloned()).map(Prepared::Query)
            }
            Operation::Delete {
                volume_ids,
                delete_disk,
            } => DeleteRequest::new(volume_ids.iter().cloned(), *delete_disk).map(Prepared::Delete),
        }
    }

    async fn submit(&self, prepared: &Prepared) -> Result<TaskHandle, S::Error> {
        match prepared {
            Prepared::Create(request) => {
                info!(
                    "creating volume {} ({} MB) on {}",
                    request.name,
                    request.size_mb,
                    join(request.datastores.iter().map(|ds| ds.url.as_str()))
                );
                debug!("create request: {request:#?}");
                self.session.submit_create_volume(request).await
            }
            Prepared::Query(filter) => {
                info!(
                    "querying volumes {}",
                    join(filter.volume_ids.iter().map(VolumeId::as_str))
                );
                self.session.submit_query_volume(filter).await
            }
            Prepared::Delete(request) => {
                info!(
                    "deleting volumes {} (delete disk: {})",
                    join(request.volume_ids.iter().map(VolumeId::as_str)),
                    request.delete_disk
                );
                self.session.submit_delete_volume(request).await
            }
        }
    }
}

fn advance(operation: OperationKind, from: Phase, to: Phase) -> Phase {
    debug!("{operation}: {from} -> {to}");
    to
}

fn complete<E>(
    operation: OperationKind,
    prepared: Prepared,
    outcome: TaskOutcome<crate::session::TaskResult>,
) -> Result<Completion, LifecycleError<E>>
where
    E: std::error::Error + 'static,
{
    let result = match outcome {
        TaskOutcome::OperationFault(fault) => {
            return Ok(Completion::Faulted { operation, fault });
        }
        TaskOutcome::Success(result) => result,
    };

    match prepared {
        Prepared::Create(_) => result
            .volume_id
            .map(Completion::Created)
            .ok_or_else(|| LifecycleError::EmptyResult {
                operation,
                detail: String::from("create result carried no volume id"),
            }),
        Prepared::Query(_) => Ok(Completion::Queried(result.volumes)),
        Prepared::Delete(request) => Ok(Completion::Deleted(request.volume_ids)),
    }
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(", ")
}

/// An ordered selection of operations against one volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Plan {
    kinds: BTreeSet<OperationKind>,
    create: Option<CreateVolumeParams>,
    volume_id: Option<VolumeId>,
    delete_disk: bool,
}

impl Plan {
    /// Selects the operations to run. Duplicates collapse and the order is
    /// always create, query, delete.
    #[must_use]
    pub fn new(kinds: impl IntoIterator<Item = OperationKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            create: None,
            volume_id: None,
            delete_disk: true,
        }
    }

    /// Supplies the create parameters.
    #[must_use]
    pub fn with_create(mut self, params: CreateVolumeParams) -> Self {
        self.create = Some(params);
        self
    }

    /// Targets an existing volume when the plan does not create one.
    #[must_use]
    pub fn with_volume_id(mut self, volume_id: Option<VolumeId>) -> Self {
        self.volume_id = volume_id;
        self
    }

    /// Chooses whether deletion removes the backing disk.
    #[must_use]
    pub const fn with_delete_disk(mut self, delete_disk: bool) -> Self {
        self.delete_disk = delete_disk;
        self
    }

    /// Returns the selected operations in execution order.
    #[must_use]
    pub fn kinds(&self) -> impl Iterator<Item = OperationKind> + '_ {
        self.kinds.iter().copied()
    }

    /// Checks that the plan can run.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::EmptyPlan`] when nothing is selected,
    /// [`RequestError::MissingField`] when create parameters are missing, and
    /// [`RequestError::NoVolumeIds`] when query or delete has no target.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.kinds.is_empty() {
            return Err(RequestError::EmptyPlan);
        }
        let creates = self.kinds.contains(&OperationKind::Create);
        if creates && self.create.is_none() {
            return Err(RequestError::MissingField("create parameters"));
        }
        if !creates && self.volume_id.is_none() {
            return Err(RequestError::NoVolumeIds);
        }
        Ok(())
    }

    fn operation_for<E>(
        &self,
        kind: OperationKind,
        volume_id: Option<&VolumeId>,
    ) -> Result<Operation, LifecycleError<E>>
    where
        E: std::error::Error + 'static,
    {
        let target = || {
            volume_id
                .cloned()
                .ok_or_else(|| LifecycleError::InvalidPlan(RequestError::NoVolumeIds))
        };
        match kind {
            OperationKind::Create => self
                .create
                .clone()
                .map(Operation::Create)
                .ok_or_else(|| {
                    LifecycleError::InvalidPlan(RequestError::MissingField("create parameters"))
                }),
            OperationKind::Query => Ok(Operation::Query(vec![target()?])),
            OperationKind::Delete => Ok(Operation::Delete {
                volume_ids: vec![target()?],
                delete_disk: self.delete_disk,
            }),
        }
    }
}

/// One executed step of a plan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlanStep {
    /// Operation that ran.
    pub operation: OperationKind,
    /// Its terminal report.
    pub completion: Completion,
}

/// Result of running a plan.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PlanReport {
    /// Steps that ran, in order.
    pub steps: Vec<PlanStep>,
    /// Steps skipped after a create fault.
    pub skipped: Vec<OperationKind>,
}

impl PlanReport {
    /// Returns the volume created by the plan, if any.
    #[must_use]
    pub fn created_volume(&self) -> Option<&VolumeId> {
        self.steps.iter().find_map(|step| match &step.completion {
            Completion::Created(id) => Some(id),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{InMemorySession, SessionFailure};
    use rstest::{fixture, rstest};

    fn datastore() -> DatastoreRef {
        DatastoreRef::new("datastore-1", "ds:///vmfs/volumes/abc/")
    }

    fn params(name: &str, size_mb: i64) -> CreateVolumeParams {
        CreateVolumeParams {
            name: name.to_owned(),
            size_mb,
            datastores: vec![datastore()],
        }
    }

    #[fixture]
    fn orchestrator() -> VolumeOrchestrator<InMemorySession> {
        let config = OrchestratorConfig {
            poll_interval: Duration::from_millis(1),
            ..OrchestratorConfig::new(ClusterMetadata::for_owner("administrator"))
        };
        VolumeOrchestrator::new(InMemorySession::new(), config)
    }

    #[rstest]
    #[tokio::test]
    async fn create_echoes_generated_identifier(orchestrator: VolumeOrchestrator<InMemorySession>) {
        let completion = orchestrator
            .execute(&Operation::Create(params("vol-1", 5120)))
            .await
            .expect("create completes");

        assert_eq!(completion, Completion::Created(VolumeId::new("vol-1-generated")));
        let stored = orchestrator.session().volumes();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.first().map(|record| record.capacity_mb), Some(5120));
    }

    #[rstest]
    #[case(0, Vec::new())]
    #[case(-10, vec![datastore()])]
    #[case(100, Vec::new())]
    #[tokio::test]
    async fn invalid_create_never_reaches_session(
        orchestrator: VolumeOrchestrator<InMemorySession>,
        #[case] size_mb: i64,
        #[case] datastores: Vec<DatastoreRef>,
    ) {
        let operation = Operation::Create(CreateVolumeParams {
            name: String::from("vol"),
            size_mb,
            datastores,
        });

        let err = orchestrator
            .execute(&operation)
            .await
            .expect_err("invalid input");

        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(orchestrator.session().submit_calls(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn submission_failure_is_transport(orchestrator: VolumeOrchestrator<InMemorySession>) {
        orchestrator.session().fail(SessionFailure::Submit);

        let err = orchestrator
            .execute(&Operation::Query(vec![VolumeId::new("vol-1")]))
            .await
            .expect_err("submission fails");

        assert!(
            matches!(
                err,
                LifecycleError::Transport {
                    phase: Phase::Submitting,
                    ..
                }
            ),
            "unexpected error: {err}"
        );
        assert_eq!(orchestrator.session().task_info_calls(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_create_reports_fault(orchestrator: VolumeOrchestrator<InMemorySession>) {
        let operation = Operation::Create(params("vol-1", 10));
        orchestrator.execute(&operation).await.expect("first create");

        let completion = orchestrator
            .execute(&operation)
            .await
            .expect("second create completes");

        assert!(
            matches!(
                completion,
                Completion::Faulted {
                    operation: OperationKind::Create,
                    ref fault,
                } if fault.kind == "CnsAlreadyRegisteredFault"
            ),
            "unexpected completion: {completion:?}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn create_without_volume_id_is_empty_result(
        orchestrator: VolumeOrchestrator<InMemorySession>,
    ) {
        orchestrator.session().fail(SessionFailure::OmitVolumeId);

        let err = orchestrator
            .execute(&Operation::Create(params("vol-1", 10)))
            .await
            .expect_err("malformed result");

        assert_eq!(err.kind(), ErrorKind::EmptyResult);
    }

    #[rstest]
    #[tokio::test]
    async fn plan_runs_in_canonical_order(orchestrator: VolumeOrchestrator<InMemorySession>) {
        let plan = Plan::new([
            OperationKind::Delete,
            OperationKind::Create,
            OperationKind::Query,
        ])
        .with_create(params("vol-1", 10));

        let report = orchestrator.execute_plan(&plan).await.expect("plan runs");

        let order: Vec<_> = report.steps.iter().map(|step| step.operation).collect();
        assert_eq!(
            order,
            vec![OperationKind::Create, OperationKind::Query, OperationKind::Delete]
        );
        assert_eq!(report.created_volume(), Some(&VolumeId::new("vol-1-generated")));
        assert!(orchestrator.session().volumes().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn create_fault_skips_remaining_steps(
        orchestrator: VolumeOrchestrator<InMemorySession>,
    ) {
        orchestrator
            .execute(&Operation::Create(params("vol-1", 10)))
            .await
            .expect("seed volume");
        let plan = Plan::new([OperationKind::Create, OperationKind::Delete])
            .with_create(params("vol-1", 10));

        let report = orchestrator.execute_plan(&plan).await.expect("plan runs");

        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.skipped, vec![OperationKind::Delete]);
        assert_eq!(orchestrator.session().volumes().len(), 1);
    }

    #[rstest]
    #[case(Plan::new(Vec::new()), RequestError::EmptyPlan)]
    #[case(Plan::new([OperationKind::Query]), RequestError::NoVolumeIds)]
    #[case(
        Plan::new([OperationKind::Create]),
        RequestError::MissingField("create parameters")
    )]
    fn incomplete_plans_are_rejected(#[case] plan: Plan, #[case] expected: RequestError) {
        assert_eq!(plan.validate(), Err(expected));
    }
}
