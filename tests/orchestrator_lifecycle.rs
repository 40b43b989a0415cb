//! Lifecycle properties of the orchestrator against the in-memory session.

use std::time::Duration;

use cnsvol::test_support::{InMemorySession, SessionFailure};
use cnsvol::{
    ClusterMetadata, Completion, CreateVolumeParams, DatastoreRef, ErrorKind, LifecycleError,
    Operation, OperationFault, OperationKind, OrchestratorConfig, Plan, VolumeId,
    VolumeOrchestrator,
};
use rstest::{fixture, rstest};

const DATASTORE_URL: &str = "ds:///vmfs/volumes/abc/";

#[fixture]
fn orchestrator() -> VolumeOrchestrator<InMemorySession> {
    let config = OrchestratorConfig {
        poll_interval: Duration::from_millis(1),
        ..OrchestratorConfig::new(ClusterMetadata::for_owner("administrator@vsphere.local"))
    };
    VolumeOrchestrator::new(InMemorySession::new(), config)
}

fn create(name: &str) -> Operation {
    Operation::Create(CreateVolumeParams {
        name: name.to_owned(),
        size_mb: 5120,
        datastores: vec![DatastoreRef::new("datastore-12", DATASTORE_URL)],
    })
}

#[rstest]
#[tokio::test]
async fn create_then_query_returns_one_record(orchestrator: VolumeOrchestrator<InMemorySession>) {
    let created = orchestrator.execute(&create("vol-1")).await.expect("create");
    assert_eq!(created, Completion::Created(VolumeId::new("vol-1-generated")));

    let queried = orchestrator
        .execute(&Operation::Query(vec![VolumeId::new("vol-1-generated")]))
        .await
        .expect("query");

    let Completion::Queried(records) = queried else {
        panic!("expected query records, got {queried:?}");
    };
    assert_eq!(records.len(), 1);
    let record = records.first().expect("one record");
    assert_eq!(record.volume_id, VolumeId::new("vol-1-generated"));
    assert_eq!(record.capacity_mb, 5120);
    assert_eq!(record.datastore_url.as_deref(), Some(DATASTORE_URL));
    assert_eq!(
        record.cluster.as_ref().map(|cluster| cluster.owner_principal.as_str()),
        Some("administrator@vsphere.local")
    );
}

#[rstest]
#[tokio::test]
async fn delete_then_query_is_empty(orchestrator: VolumeOrchestrator<InMemorySession>) {
    orchestrator.execute(&create("vol-1")).await.expect("create");
    let target = vec![VolumeId::new("vol-1-generated")];

    let deleted = orchestrator
        .execute(&Operation::Delete {
            volume_ids: target.clone(),
            delete_disk: true,
        })
        .await
        .expect("delete");
    let queried = orchestrator
        .execute(&Operation::Query(target.clone()))
        .await
        .expect("query");

    assert_eq!(deleted, Completion::Deleted(target));
    assert_eq!(queried, Completion::Queried(Vec::new()));
}

#[rstest]
#[tokio::test]
async fn populated_fault_is_never_success(orchestrator: VolumeOrchestrator<InMemorySession>) {
    let fault = OperationFault::new("CnsFault", "datastore full");
    orchestrator.session().inject_fault(fault.clone());

    let completion = orchestrator.execute(&create("vol-1")).await.expect("completes");

    assert_eq!(
        completion,
        Completion::Faulted {
            operation: OperationKind::Create,
            fault,
        }
    );
}

#[rstest]
#[tokio::test]
async fn absent_result_is_empty_result(orchestrator: VolumeOrchestrator<InMemorySession>) {
    orchestrator.session().fail(SessionFailure::EmptyResult);

    let err = orchestrator
        .execute(&Operation::Query(vec![VolumeId::new("vol-1")]))
        .await
        .expect_err("no result");

    assert_eq!(err.kind(), ErrorKind::EmptyResult);
    assert!(!err.is_retryable());
}

#[rstest]
#[tokio::test]
async fn failed_task_is_retryable(orchestrator: VolumeOrchestrator<InMemorySession>) {
    orchestrator.session().fail(SessionFailure::TaskError);

    let err = orchestrator
        .execute(&create("vol-1"))
        .await
        .expect_err("task fails");

    assert!(
        matches!(err, LifecycleError::TaskFailed { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retryable());
}

#[rstest]
#[tokio::test]
async fn slow_tasks_are_polled_until_done(orchestrator: VolumeOrchestrator<InMemorySession>) {
    orchestrator.session().set_pending_polls(3);

    orchestrator.execute(&create("vol-1")).await.expect("create");

    assert_eq!(orchestrator.session().task_info_calls(), 4);
}

#[rstest]
#[tokio::test]
async fn wait_timeout_stops_polling() {
    let config = OrchestratorConfig {
        poll_interval: Duration::from_millis(5),
        wait_timeout: Some(Duration::from_millis(20)),
        ..OrchestratorConfig::new(ClusterMetadata::for_owner("administrator"))
    };
    let orchestrator = VolumeOrchestrator::new(InMemorySession::new(), config);
    orchestrator.session().set_pending_polls(u32::MAX);

    let err = orchestrator
        .execute(&create("vol-1"))
        .await
        .expect_err("times out");

    assert!(
        matches!(err, LifecycleError::Timeout { .. }),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn datastore_lookup_failure_is_transport(orchestrator: VolumeOrchestrator<InMemorySession>) {
    orchestrator.session().fail(SessionFailure::DatastoreLookup);

    let err = orchestrator
        .locate_datastore("dc-1", "missing")
        .await
        .expect_err("lookup fails");

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("missing"), "error: {err}");
}

#[rstest]
#[tokio::test]
async fn plan_targets_existing_volume(orchestrator: VolumeOrchestrator<InMemorySession>) {
    orchestrator.execute(&create("vol-1")).await.expect("create");
    let plan = Plan::new([OperationKind::Query, OperationKind::Delete])
        .with_volume_id(Some(VolumeId::new("vol-1-generated")))
        .with_delete_disk(false);

    let report = orchestrator.execute_plan(&plan).await.expect("plan runs");

    assert_eq!(report.steps.len(), 2);
    assert!(report.skipped.is_empty());
    assert!(report.created_volume().is_none());
    assert!(orchestrator.session().volumes().is_empty());
}

#[rstest]
#[tokio::test]
async fn delete_fault_does_not_abort_plan(orchestrator: VolumeOrchestrator<InMemorySession>) {
    let plan = Plan::new([OperationKind::Delete, OperationKind::Query])
        .with_volume_id(Some(VolumeId::new("ghost")));

    let report = orchestrator.execute_plan(&plan).await.expect("plan runs");

    let completions: Vec<_> = report.steps.iter().map(|step| &step.completion).collect();
    assert_eq!(completions.len(), 2);
    assert_eq!(
        completions.first(),
        Some(&&Completion::Queried(Vec::new()))
    );
    assert!(matches!(
        completions.get(1),
        Some(Completion::Faulted {
            operation: OperationKind::Delete,
            ..
        })
    ));
}
