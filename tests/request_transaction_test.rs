//! Integration tests for request-scoped transactions driven through the router.

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::extract::Path;
use axum::{Extension, Json, Router};
use db_transact::config::DatabaseConfig;
use db_transact::db::{DbConnection, DbPool, Registry};
use db_transact::error::DbError;
use db_transact::models::QueryParam;
use db_transact::plugin::{self, register_with};
use db_transact::server::{Host, HostHandle, RequestScope, RouteOptions};
use db_transact::testing::{RecordingConnection, RecordingDriver, RecordingPool};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tower::ServiceExt;

type Scope = RequestScope<RecordingConnection>;

fn request(method: &str, path: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn recording_host(driver: &RecordingDriver, names: &[Option<&str>]) -> Host<RecordingPool> {
    let mut host = Host::new();
    for name in names {
        let mut config = DatabaseConfig::new("recording://app");
        if let Some(name) = name {
            config = config.named(*name);
        }
        register_with(&mut host, driver, config).unwrap();
    }
    host
}

#[tokio::test]
async fn test_marked_route_gets_client_unmarked_does_not() {
    let driver = RecordingDriver::new();
    let mut host = recording_host(&driver, &[None]);
    host.route(
        "/a",
        get(|scope: Scope| async move {
            if scope.client().is_some() { "bound" } else { "empty" }
        }),
        RouteOptions::new().transact(),
    );
    host.route(
        "/b",
        get(|scope: Scope| async move {
            if scope.is_empty() { "empty" } else { "bound" }
        }),
        RouteOptions::new(),
    );
    let (router, _handle) = host.into_router();

    let response = router.clone().oneshot(request("GET", "/a")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "bound");
    assert_eq!(driver.statements(), vec!["BEGIN", "COMMIT"]);

    driver.clear_statements();
    let response = router.oneshot(request("GET", "/b")).await.unwrap();
    assert_eq!(body_text(response).await, "empty");
    assert!(driver.statements().is_empty());
    assert_eq!(driver.acquired(), 1);
    assert_eq!(driver.outstanding(), 0);
}

#[tokio::test]
async fn test_named_marker_binds_only_its_registration() {
    let driver = RecordingDriver::new();
    let mut host = recording_host(&driver, &[None, Some("users"), Some("audit")]);
    host.route(
        "/users",
        get(|scope: Scope| async move {
            Json(json!({
                "default": scope.client().is_some(),
                "users": scope.named("users").is_some(),
                "audit": scope.named("audit").is_some(),
            }))
        }),
        RouteOptions::new().transact_on("users"),
    );
    let (router, _handle) = host.into_router();

    let response = router.oneshot(request("GET", "/users")).await.unwrap();
    assert_eq!(
        body_json(response).await,
        json!({ "default": false, "users": true, "audit": false })
    );
    assert_eq!(driver.acquired(), 1);
    assert_eq!(driver.statements(), vec!["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn test_handler_failure_rolls_back() {
    let driver = RecordingDriver::new();
    let mut host = recording_host(&driver, &[None]);
    host.route(
        "/fail",
        post(|scope: Scope| async move {
            let client = scope.client().ok_or(DbError::unknown_named_client(None))?;
            client.execute("INSERT INTO items VALUES (1)").await?;
            Err::<(), _>(DbError::invalid_input("rejected"))
        }),
        RouteOptions::new().transact(),
    );
    let (router, _handle) = host.into_router();

    let response = router.oneshot(request("POST", "/fail")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        driver.statements(),
        vec!["BEGIN", "INSERT INTO items VALUES (1)", "ROLLBACK"]
    );
    assert_eq!(driver.outstanding(), 0);
}

#[tokio::test]
async fn test_commit_failure_replaces_response() {
    let driver = RecordingDriver::new();
    driver.fail_statement("COMMIT");
    let mut host = recording_host(&driver, &[None]);
    host.route("/ok", get(|| async { "ok" }), RouteOptions::new().transact());
    let (router, _handle) = host.into_router();

    let response = router.oneshot(request("GET", "/ok")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("COMMIT"));
    assert_eq!(driver.outstanding(), 0);
}

#[tokio::test]
async fn test_begin_failure_skips_handler() {
    let driver = RecordingDriver::new();
    driver.fail_statement("BEGIN");
    let ran = Arc::new(AtomicBool::new(false));
    let mut host = recording_host(&driver, &[None]);
    let flag = Arc::clone(&ran);
    host.route(
        "/never",
        get(move || async move {
            flag.store(true, Ordering::SeqCst);
            "ran"
        }),
        RouteOptions::new().transact(),
    );
    let (router, _handle) = host.into_router();

    let response = router.oneshot(request("GET", "/never")).await.unwrap();
    assert!(response.status().is_server_error());
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!driver.statements().contains(&"COMMIT".to_string()));
    assert_eq!(driver.outstanding(), 0);
}

#[tokio::test]
async fn test_acquire_failure_is_service_unavailable() {
    let driver = RecordingDriver::new();
    let mut host = recording_host(&driver, &[None]);
    host.route("/a", get(|| async { "a" }), RouteOptions::new().transact());
    let (router, _handle) = host.into_router();

    driver.fail_connect(true);
    let response = router.oneshot(request("GET", "/a")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn test_unknown_name_reported_at_request_time() {
    let driver = RecordingDriver::new();
    let mut host = recording_host(&driver, &[None]);
    host.route("/x", get(|| async { "x" }), RouteOptions::new().transact_on("missing"));
    let (router, _handle) = host.into_router();

    let response = router.oneshot(request("GET", "/x")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("missing"));
    assert_eq!(driver.acquired(), 0);
}

#[tokio::test]
async fn test_host_close_closes_pools() {
    let driver = RecordingDriver::new();
    let host = recording_host(&driver, &[None, Some("audit")]);
    let (_router, handle): (Router, HostHandle<RecordingPool>) = host.into_router();

    handle.close().await;
    assert!(driver.is_closed());
}

async fn sqlite_router() -> (Router, HostHandle<DbPool>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let mut host = Host::new();
    let db = plugin::register(
        &mut host,
        DatabaseConfig::new(format!("sqlite:{}", file.path().display())),
    )
    .unwrap();
    db.query("CREATE TABLE items (name TEXT NOT NULL)", &[])
        .await
        .unwrap();

    host.route(
        "/items/{name}",
        post(
            |scope: RequestScope<DbConnection>, Path(name): Path<String>| async move {
                let client = scope.client().ok_or(DbError::unknown_named_client(None))?;
                client
                    .query("INSERT INTO items (name) VALUES (?)", &[QueryParam::from(name.as_str())])
                    .await?;
                if name == "boom" {
                    return Err(DbError::work("boom"));
                }
                Ok::<_, DbError>(name)
            },
        ),
        RouteOptions::new().transact(),
    );
    host.route(
        "/items",
        get(|Extension(registry): Extension<Arc<Registry<DbPool>>>| async move {
            let db = registry.lookup(None)?;
            let result = db.query("SELECT name FROM items ORDER BY name", &[]).await?;
            Ok::<_, DbError>(Json(result.rows))
        }),
        RouteOptions::new(),
    );
    let (router, handle) = host.into_router();
    (router, handle, file)
}

#[tokio::test]
async fn test_sqlite_ok_commits_and_boom_rolls_back() {
    let (router, handle, _file) = sqlite_router().await;

    let response = router.clone().oneshot(request("POST", "/items/ok")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router.clone().oneshot(request("POST", "/items/boom")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = router.oneshot(request("GET", "/items")).await.unwrap();
    assert_eq!(body_json(response).await, json!([{ "name": "ok" }]));

    handle.close().await;
}

#[tokio::test]
async fn test_abandoned_request_rolls_back() {
    let driver = RecordingDriver::new();
    let mut host = recording_host(&driver, &[None]);
    host.route(
        "/hang",
        post(|scope: Scope| async move {
            let client = scope.client().ok_or(DbError::unknown_named_client(None))?;
            client.execute("INSERT INTO t VALUES (1)").await?;
            std::future::pending::<Result<&'static str, DbError>>().await
        }),
        RouteOptions::new().transact(),
    );
    let (router, _handle) = host.into_router();

    let result = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        router.oneshot(request("POST", "/hang")),
    )
    .await;
    assert!(result.is_err());

    driver.wait_until_idle().await;
    assert_eq!(
        driver.statements(),
        vec!["BEGIN", "INSERT INTO t VALUES (1)", "ROLLBACK"]
    );
    assert_eq!(driver.acquired(), 1);
    assert_eq!(driver.released(), 1);
}

#[tokio::test]
async fn test_abandoned_sqlite_request_leaves_no_open_transaction() {
    let file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}", file.path().display());
    let mut host = Host::<DbPool>::new();
    let mut config = DatabaseConfig::new(url);
    config.pool_options.max_connections = Some(1);
    let db = plugin::register(&mut host, config).unwrap();
    db.query("CREATE TABLE items (name TEXT NOT NULL)", &[])
        .await
        .unwrap();

    host.route(
        "/hang",
        post(|scope: RequestScope<DbConnection>| async move {
            let client = scope.client().ok_or(DbError::unknown_named_client(None))?;
            client
                .query("INSERT INTO items (name) VALUES (?)", &[QueryParam::from("lost")])
                .await?;
            std::future::pending::<Result<&'static str, DbError>>().await
        }),
        RouteOptions::new().transact(),
    );
    let (router, _handle) = host.into_router();

    let result = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        router.oneshot(request("POST", "/hang")),
    )
    .await;
    assert!(result.is_err());

    // The single pooled connection must come back outside any transaction.
    let value = db
        .transact(|client| async move {
            client
                .query("INSERT INTO items (name) VALUES (?)", &[QueryParam::from("kept")])
                .await?;
            client.query("SELECT name FROM items", &[]).await
        })
        .await
        .unwrap();
    assert_eq!(value.row_count(), 1);
    assert_eq!(value.scalar("name").unwrap(), "kept");
}
