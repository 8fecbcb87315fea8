//! API integration tests
//!
//! Tests for the task and health endpoints against an in-memory task store.

use axum::http::StatusCode;
use serde_json::json;

use osd_remove_controller::models::{RemovalTask, TaskPhase, TaskSpec, TaskStatus};

use crate::common::TestApp;

/// Whether the reconciler was woken since the last check
async fn woken(app: &TestApp) -> bool {
    tokio::time::timeout(
        std::time::Duration::from_millis(100),
        app.state.reconcile_wake.notified(),
    )
    .await
    .is_ok()
}

async fn create(app: &TestApp, name: &str) {
    app.post_json(
        "/api/v1/tasks",
        json!({"name": name, "spec": {"nodes": {"node-1": {"completeCleanup": true}}}}),
    )
    .await
    .assert_created();
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new().await;

    let response = app.get("/api/v1/health").await;
    response.assert_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");

    app.get("/api/v1/health/live").await.assert_ok();

    create(&app, "remove-node-1").await;
    let response = app.get("/api/v1/health/ready").await;
    response.assert_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["active_tasks"], 1);
}

#[tokio::test]
async fn test_create_task() {
    let app = TestApp::new().await;

    let response = app
        .post_json(
            "/api/v1/tasks",
            json!({"name": "remove-node-1", "spec": {"nodes": {"node-1": {"completeCleanup": true}}}}),
        )
        .await;
    response.assert_created();

    let task: RemovalTask = response.json();
    assert_eq!(task.name, "remove-node-1");
    assert!(task.spec.nodes["node-1"].complete_cleanup);
    assert!(!task.spec.approve);
    assert!(task.status.is_none());
}

#[tokio::test]
async fn test_create_task_without_spec_uses_discovery_mode() {
    let app = TestApp::new().await;

    let response = app
        .post_json("/api/v1/tasks", json!({"name": "cleanup-strays"}))
        .await;
    response.assert_created();
    let task: RemovalTask = response.json();
    assert!(task.spec.nodes.is_empty());
}

#[tokio::test]
async fn test_create_duplicate_task_conflicts() {
    let app = TestApp::new().await;
    create(&app, "remove-node-1").await;

    let response = app
        .post_json("/api/v1/tasks", json!({"name": "remove-node-1"}))
        .await;
    response.assert_conflict();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn test_create_task_invalid_names() {
    let app = TestApp::new().await;

    app.post_json("/api/v1/tasks", json!({"name": "Remove_Node"}))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    app.post_json(
        "/api/v1/tasks",
        json!({"name": "remove-1", "spec": {"nodes": {"Node_1": {}}}}),
    )
    .await
    .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    app.post_json(
        "/api/v1/tasks",
        json!({"name": "remove-1", "spec": {"nodes": {"node-1": {"cleanupByDevice": [{"device": "/dev/../etc"}]}}}}),
    )
    .await
    .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    assert!(app.repository().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_and_list_tasks() {
    let app = TestApp::new().await;
    create(&app, "first").await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    create(&app, "second").await;

    let task: RemovalTask = app.get("/api/v1/tasks/first").await.json();
    assert_eq!(task.name, "first");

    let response = app.get("/api/v1/tasks").await;
    response.assert_ok();
    let tasks: Vec<RemovalTask> = response.json();
    let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);

    app.get("/api/v1/tasks/missing").await.assert_not_found();
}

#[tokio::test]
async fn test_approve_task() {
    let app = TestApp::new().await;
    create(&app, "remove-node-1").await;

    let response = app.post("/api/v1/tasks/remove-node-1/approve").await;
    response.assert_ok();
    let task: RemovalTask = response.json();
    assert!(task.spec.approve);

    // approving twice is a no-op
    app.post("/api/v1/tasks/remove-node-1/approve").await.assert_ok();
    app.post("/api/v1/tasks/missing/approve").await.assert_not_found();
}

#[tokio::test]
async fn test_approve_finished_task_conflicts() {
    let app = TestApp::new().await;
    create(&app, "remove-node-1").await;
    let status = TaskStatus::initial(&TaskSpec::default()).aborted("stopped");
    app.repository()
        .update_status("remove-node-1", &status)
        .await
        .unwrap();

    app.post("/api/v1/tasks/remove-node-1/approve")
        .await
        .assert_conflict();
}

#[tokio::test]
async fn test_update_nodes() {
    let app = TestApp::new().await;
    create(&app, "remove-node-1").await;

    let response = app
        .put_json(
            "/api/v1/tasks/remove-node-1/nodes",
            json!({"nodes": {"node-2": {"dropFromCrush": true}}}),
        )
        .await;
    response.assert_ok();
    let task: RemovalTask = response.json();
    assert!(!task.spec.nodes.contains_key("node-1"));
    assert!(task.spec.nodes["node-2"].drop_from_crush);

    app.put_json("/api/v1/tasks/missing/nodes", json!({"nodes": {}}))
        .await
        .assert_not_found();
}

#[tokio::test]
async fn test_resolve_only_failed_tasks() {
    let app = TestApp::new().await;
    create(&app, "remove-node-1").await;

    app.post("/api/v1/tasks/remove-node-1/resolve")
        .await
        .assert_conflict();

    let mut status = TaskStatus::initial(&TaskSpec::default());
    status.phase = TaskPhase::Failed;
    app.repository()
        .update_status("remove-node-1", &status)
        .await
        .unwrap();

    let response = app.post("/api/v1/tasks/remove-node-1/resolve").await;
    response.assert_ok();
    let task: RemovalTask = response.json();
    assert!(task.spec.resolved);
}

#[tokio::test]
async fn test_delete_task() {
    let app = TestApp::new().await;
    create(&app, "remove-node-1").await;

    app.delete("/api/v1/tasks/remove-node-1")
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.get("/api/v1/tasks/remove-node-1").await.assert_not_found();
    app.delete("/api/v1/tasks/remove-node-1").await.assert_not_found();
}

#[tokio::test]
async fn test_task_changes_wake_reconciler() {
    let app = TestApp::new().await;
    create(&app, "remove-node-1").await;
    assert!(woken(&app).await);
    assert!(!woken(&app).await);

    let mut status = TaskStatus::initial(&TaskSpec::default());
    status.phase = TaskPhase::Failed;
    app.repository()
        .update_status("remove-node-1", &status)
        .await
        .unwrap();
    app.post("/api/v1/tasks/remove-node-1/resolve").await.assert_ok();
    assert!(woken(&app).await);

    app.delete("/api/v1/tasks/remove-node-1")
        .await
        .assert_status(StatusCode::NO_CONTENT);
    assert!(woken(&app).await);
}
