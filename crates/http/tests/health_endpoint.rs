use std::fs;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use ordinal_db::{adapter_for, ConnectionManager, DatabasePoolConfig, MigrationConfig, MigrationError, MigrationRunner};
use ordinal_http::{build_router, Bootstrap, HealthState, InitGuard};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

async fn runner(dir: &TempDir) -> (Arc<MigrationRunner>, Arc<ConnectionManager>) {
    let manager = Arc::new(
        ConnectionManager::connect("sqlite::memory:", DatabasePoolConfig::default())
            .await
            .unwrap(),
    );
    let config = MigrationConfig {
        migrations_dir: dir.path().to_path_buf(),
        migrations_table: "schema_migrations".to_string(),
    };
    let runner = MigrationRunner::new(adapter_for(manager.clone()), config).unwrap();
    (Arc::new(runner), manager)
}

async fn get_health(router: axum::Router, path: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_initializing_then_healthy() {
    static GUARD: InitGuard = InitGuard::new();

    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("001-init.sql"), "CREATE TABLE orders (id INTEGER PRIMARY KEY);").unwrap();
    let (runner, manager) = runner(&dir).await;

    let bootstrap = Bootstrap::with_guard(runner, &GUARD);
    let state = HealthState::new(bootstrap.state()).with_manager(manager);

    let (status, body) = get_health(build_router(state.clone()), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "initializing");
    assert_eq!(body["state"], "init");

    let result = bootstrap.spawn().unwrap().await.unwrap().unwrap();
    assert_eq!(result.applied, vec![1]);

    let (status, body) = get_health(build_router(state), "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["state"], "done");
    assert_eq!(body["database"]["dialect"], "sqlite");
    assert_eq!(body["database"]["max_connections"], 1);
}

#[tokio::test]
async fn test_failed_run_reports_unhealthy() {
    static GUARD: InitGuard = InitGuard::new();

    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("1-broken.sql"), "CREATE TABLE (;").unwrap();
    let (runner, _) = runner(&dir).await;

    let bootstrap = Bootstrap::with_guard(runner, &GUARD);
    let state = HealthState::new(bootstrap.state());

    let err = bootstrap.spawn().unwrap().await.unwrap().unwrap_err();
    assert!(matches!(err, MigrationError::Failed { version: 1, .. }));

    let (status, body) = get_health(build_router(state), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert!(body["error"].as_str().unwrap().contains("1-broken.sql"));
}

#[tokio::test]
async fn test_second_bootstrap_is_rejected() {
    static GUARD: InitGuard = InitGuard::new();

    let dir = TempDir::new().unwrap();
    let (runner, _) = runner(&dir).await;

    let first = Bootstrap::with_guard(runner.clone(), &GUARD);
    let second = Bootstrap::with_guard(runner, &GUARD);

    first.spawn().unwrap().await.unwrap().unwrap();
    assert!(matches!(second.spawn(), Err(MigrationError::AlreadyStarted)));
    assert!(matches!(second.run().await, Err(MigrationError::AlreadyStarted)));
}
