//! End-to-end reconcile tests
//!
//! A task is driven through every phase by repeated reconcile cycles against
//! the mock cluster, the way the background loop drives it.

use osd_remove_controller::db::TaskRepository;
use osd_remove_controller::models::{TaskPhase, TaskSpec};
use osd_remove_controller::services::Reconciler;

use crate::common::{
    complete_cleanup_spec, settings, single_host_cluster, test_config, MockBackends, MockError,
    ROOK_NAMESPACE,
};

const MAX_CYCLES: usize = 30;

async fn setup() -> (MockBackends, Reconciler, TaskRepository) {
    let mocks = MockBackends::new();
    single_host_cluster(&mocks);
    let pool = osd_remove_controller::db::init_pool(&test_config().database)
        .await
        .unwrap();
    let repo = TaskRepository::new(pool);
    let reconciler = Reconciler::new(repo.clone(), mocks.backends(), settings());
    (mocks, reconciler, repo)
}

/// Run cycles until the task reaches one of `phases`
async fn drive_until(
    reconciler: &Reconciler,
    repo: &TaskRepository,
    name: &str,
    phases: &[TaskPhase],
) -> TaskPhase {
    for _ in 0..MAX_CYCLES {
        reconciler.run_reconcile_cycle().await.unwrap();
        let phase = repo.get(name).await.unwrap().unwrap().phase();
        if let Some(phase) = phase.filter(|p| phases.contains(p)) {
            return phase;
        }
    }
    panic!(
        "task '{}' did not reach {:?}, stuck in {:?}",
        name,
        phases,
        repo.get(name).await.unwrap().unwrap().phase()
    );
}

#[tokio::test]
async fn test_node_removal_waits_for_approve_then_completes() {
    let (mocks, reconciler, repo) = setup().await;
    repo.create("remove-node-1", &complete_cleanup_spec(false))
        .await
        .unwrap();

    drive_until(&reconciler, &repo, "remove-node-1", &[TaskPhase::ApproveWaiting]).await;
    assert!(!mocks.ceph.was_called("ceph osd crush reweight osd.20 0.0"));

    let mut task = repo.get("remove-node-1").await.unwrap().unwrap();
    task.spec.approve = true;
    repo.update_spec("remove-node-1", &task.spec).await.unwrap();

    let phase = drive_until(
        &reconciler,
        &repo,
        "remove-node-1",
        &[
            TaskPhase::Completed,
            TaskPhase::CompletedWithWarnings,
            TaskPhase::Failed,
        ],
    )
    .await;
    assert_ne!(phase, TaskPhase::Failed);

    assert!(mocks.ceph.was_called("ceph osd crush reweight osd.20 0.0"));
    assert!(mocks
        .ceph
        .was_called("ceph osd purge 20 --force --yes-i-really-mean-it"));
    assert!(mocks.ceph.was_called("ceph auth del osd.20"));
    assert!(mocks.ceph.was_called("ceph osd crush remove node-1"));
    assert!(mocks
        .cluster
        .deployment(ROOK_NAMESPACE, "rook-ceph-osd-20")
        .is_none());

    let task = repo.get("remove-node-1").await.unwrap().unwrap();
    assert!(!task.is_active());
    let info = task.status.unwrap().remove_info.unwrap();
    assert!(info.issues.is_empty(), "{:?}", info.issues);
}

#[tokio::test]
async fn test_preapproved_task_skips_approve_waiting() {
    let (_mocks, reconciler, repo) = setup().await;
    repo.create("remove-node-1", &complete_cleanup_spec(true))
        .await
        .unwrap();

    drive_until(&reconciler, &repo, "remove-node-1", &[TaskPhase::Processing]).await;

    let task = repo.get("remove-node-1").await.unwrap().unwrap();
    let phases: Vec<_> = task
        .status
        .unwrap()
        .conditions
        .iter()
        .map(|c| c.phase)
        .collect();
    assert!(!phases.contains(&TaskPhase::ApproveWaiting));
}

#[tokio::test]
async fn test_running_operator_holds_processing() {
    let (mocks, reconciler, repo) = setup().await;
    mocks.cluster.set_deployment(
        ROOK_NAMESPACE,
        "rook-ceph-operator",
        osd_remove_controller::models::DeploymentState {
            replicas: 1,
            ready_replicas: 1,
            available_replicas: 1,
        },
    );
    repo.create("remove-node-1", &complete_cleanup_spec(true))
        .await
        .unwrap();

    drive_until(&reconciler, &repo, "remove-node-1", &[TaskPhase::WaitingOperator]).await;
    for _ in 0..3 {
        reconciler.run_reconcile_cycle().await.unwrap();
    }
    let task = repo.get("remove-node-1").await.unwrap().unwrap();
    assert_eq!(task.phase(), Some(TaskPhase::WaitingOperator));
    assert!(!mocks.ceph.was_called("ceph osd crush reweight osd.20 0.0"));
}

#[tokio::test]
async fn test_ceph_unavailable_fails_validation() {
    let (mocks, reconciler, repo) = setup().await;
    mocks.ceph.set_error_mode(MockError::ConnectionRefused);
    repo.create("remove-node-1", &complete_cleanup_spec(false))
        .await
        .unwrap();

    drive_until(&reconciler, &repo, "remove-node-1", &[TaskPhase::ValidationFailed]).await;
    let status = repo
        .get("remove-node-1")
        .await
        .unwrap()
        .unwrap()
        .status
        .unwrap();
    let issues = status.remove_info.unwrap().issues;
    assert_eq!(
        issues,
        vec!["failed to get ceph cluster nodes list: connection refused"]
    );
}

#[tokio::test]
async fn test_unknown_node_completes_with_nothing_to_remove() {
    let (mocks, reconciler, repo) = setup().await;
    let spec = TaskSpec {
        nodes: std::collections::BTreeMap::from([("node-9".to_string(), Default::default())]),
        ..Default::default()
    };
    repo.create("remove-node-9", &spec).await.unwrap();

    let phase = drive_until(
        &reconciler,
        &repo,
        "remove-node-9",
        &[
            TaskPhase::ValidationFailed,
            TaskPhase::Completed,
            TaskPhase::ApproveWaiting,
        ],
    )
    .await;
    assert_eq!(phase, TaskPhase::Completed);

    let status = repo.get("remove-node-9").await.unwrap().unwrap().status.unwrap();
    assert_eq!(status.phase_info, "validation completed, nothing to remove");
    assert_eq!(
        status.remove_info.unwrap().warnings,
        vec!["[node 'node-9'] node is not present in Ceph cluster crush map, skipping"]
    );
    assert!(!mocks.ceph.was_called("ceph osd ok-to-stop 20"));
}
