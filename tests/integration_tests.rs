use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tracker_bridge::{
    models::{IssueState, NewIssue},
    ApiError, RequestThrottle, ThrottleConfig, ToolError, ToolRegistry, TrackerClient,
};

#[derive(Clone, Default)]
struct MockTracker {
    hits: Arc<AtomicUsize>,
    auth: Arc<Mutex<Vec<String>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    created: Arc<Mutex<Vec<Value>>>,
}

impl MockTracker {
    fn record(&self, headers: &HeaderMap) {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            self.auth.lock().unwrap().push(value.to_string());
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn issue_json(key: &str, state: &str) -> Value {
    json!({
        "key": key,
        "title": format!("Issue {}", key),
        "description": "Details",
        "state": state,
        "assignee": {"id": "u1", "name": "Ada"},
        "labels": ["bug"],
        "created_at": "2024-05-01T12:00:00Z",
        "updated_at": "2024-05-02T08:00:00Z"
    })
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "Issue not found"})),
    )
        .into_response()
}

async fn get_issue(
    State(mock): State<MockTracker>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    mock.record(&headers);
    if key.ends_with("-404") {
        return not_found();
    }
    Json(issue_json(&key, "open")).into_response()
}

async fn patch_issue(
    State(mock): State<MockTracker>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record(&headers);
    let state = body["state"].as_str().unwrap_or("open").to_string();
    Json(issue_json(&key, &state)).into_response()
}

async fn search_issues(
    State(mock): State<MockTracker>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    mock.record(&headers);
    mock.queries.lock().unwrap().push(params);
    Json(json!({
        "issues": [issue_json("CORE-1", "open"), issue_json("CORE-2", "done")],
        "total": 2
    }))
    .into_response()
}

async fn create_issue(
    State(mock): State<MockTracker>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record(&headers);
    mock.created.lock().unwrap().push(body.clone());
    let key = format!("{}-100", body["project"].as_str().unwrap_or("X"));
    (StatusCode::CREATED, Json(issue_json(&key, "open"))).into_response()
}

async fn list_comments(
    State(mock): State<MockTracker>,
    Path(_key): Path<String>,
    headers: HeaderMap,
) -> Response {
    mock.record(&headers);
    Json(json!({
        "comments": [{
            "id": "c1",
            "author": {"id": "u2", "name": "Grace"},
            "body": "Reproduced on main",
            "created_at": "2024-05-03T09:00:00Z"
        }]
    }))
    .into_response()
}

async fn add_comment(
    State(mock): State<MockTracker>,
    Path(_key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record(&headers);
    Json(json!({
        "id": "c2",
        "author": {"id": "u1", "name": "Ada"},
        "body": body["body"],
        "created_at": "2024-05-03T10:00:00Z"
    }))
    .into_response()
}

async fn spawn_tracker() -> (String, MockTracker) {
    let mock = MockTracker::default();
    let app = Router::new()
        .route("/issues", get(search_issues).post(create_issue))
        .route("/issues/:key", get(get_issue).patch(patch_issue))
        .route("/issues/:key/comments", get(list_comments).post(add_comment))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), mock)
}

async fn client_for(base_url: &str, requests_per_hour: u32) -> TrackerClient {
    let throttle = RequestThrottle::new(ThrottleConfig::new(requests_per_hour)).unwrap();
    TrackerClient::new(base_url, "test-token", throttle, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_get_issue_goes_through_throttle() {
    let (url, mock) = spawn_tracker().await;
    let client = client_for(&url, 3600).await;

    let issue = assert_ok!(client.get_issue("CORE-7").await);
    assert_eq!(issue.key, "CORE-7");
    assert_eq!(issue.state, IssueState::Open);

    assert_eq!(mock.hits(), 1);
    assert_eq!(mock.auth.lock().unwrap()[0], "Bearer test-token");

    let metrics = client.throttle_metrics();
    assert_eq!(metrics.requests_in_last_hour, 1);
    assert_eq!(metrics.remaining_requests, 3599);
    assert!(metrics.last_request_time.is_some());
}

#[tokio::test]
async fn test_http_errors_are_returned_and_counted() {
    let (url, _mock) = spawn_tracker().await;
    let client = client_for(&url, 3600).await;

    let err = assert_err!(client.get_issue("CORE-404").await);
    match err {
        ApiError::Http { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Issue not found");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // a failed call still used provider capacity
    assert_eq!(client.throttle_metrics().requests_in_last_hour, 1);

    // and the next call is unaffected
    assert_ok!(client.get_issue("CORE-1").await);
    assert_eq!(client.throttle_metrics().requests_in_last_hour, 2);
}

#[tokio::test]
async fn test_search_and_create() {
    let (url, mock) = spawn_tracker().await;
    let client = client_for(&url, 3600).await;

    let page = assert_ok!(client.search_issues("state:open crash", 10).await);
    assert_eq!(page.total, 2);
    assert_eq!(page.issues.len(), 2);
    {
        let queries = mock.queries.lock().unwrap();
        assert_eq!(queries[0]["q"], "state:open crash");
        assert_eq!(queries[0]["limit"], "10");
    }

    let created = assert_ok!(
        client
            .create_issue(&NewIssue {
                project: "CORE".to_string(),
                title: "Export to CSV".to_string(),
                description: None,
                labels: vec!["feature".to_string()],
            })
            .await
    );
    assert_eq!(created.key, "CORE-100");
    assert_eq!(
        mock.created.lock().unwrap()[0],
        json!({"project": "CORE", "title": "Export to CSV", "labels": ["feature"]})
    );
    assert_eq!(client.throttle_metrics().requests_in_last_hour, 2);
}

#[tokio::test]
async fn test_get_issues_batch_keeps_order() {
    let (url, mock) = spawn_tracker().await;
    let client = client_for(&url, 3600).await;

    let keys: Vec<String> = ["CORE-1", "CORE-404", "CORE-3", "CORE-4", "CORE-5"]
        .iter()
        .map(|k| k.to_string())
        .collect();
    let results = client.get_issues(keys, 2).await;

    assert_eq!(results.len(), 5);
    assert_eq!(results[0].as_ref().unwrap().key, "CORE-1");
    assert!(results[1].as_ref().unwrap_err().is_not_found());
    assert_eq!(results[4].as_ref().unwrap().key, "CORE-5");
    assert_eq!(mock.hits(), 5);
    assert_eq!(client.throttle_metrics().requests_in_last_hour, 5);
}

#[tokio::test]
async fn test_tools_render_text() {
    let (url, _mock) = spawn_tracker().await;
    let registry = ToolRegistry::new(client_for(&url, 3600).await);

    let text = assert_ok!(registry.call("get_issue", json!({"key": "core-9"})).await);
    assert!(text.starts_with("CORE-9: Issue CORE-9"));
    assert!(text.contains("Assignee: Ada"));

    let text = assert_ok!(
        registry
            .call("update_issue_state", json!({"key": "CORE-9", "state": "done"}))
            .await
    );
    assert_eq!(text, "CORE-9 is now done");

    let text = assert_ok!(registry.call("list_comments", json!({"key": "CORE-9"})).await);
    assert!(text.contains("Grace"));

    let text = assert_ok!(
        registry
            .call("add_comment", json!({"key": "CORE-9", "body": "Fixed"}))
            .await
    );
    assert_eq!(text, "Comment c2 added to CORE-9 by Ada");

    let text = assert_ok!(
        registry
            .call("get_issues", json!({"keys": ["CORE-1", "CORE-404"], "batch_size": 2}))
            .await
    );
    assert!(text.contains("- CORE-1 [open] Issue CORE-1"));
    assert!(text.contains("- CORE-404: error: Tracker API error 404: Issue not found"));

    let text = assert_ok!(registry.call("rate_limit_status", Value::Null).await);
    assert!(text.contains("Requests in last hour: 6 / 3600"));
    assert!(text.contains("Queue length: 0"));
}

#[tokio::test]
async fn test_invalid_tool_calls_never_reach_the_tracker() {
    let (url, mock) = spawn_tracker().await;
    let registry = ToolRegistry::new(client_for(&url, 3600).await);

    let err = assert_err!(registry.call("get_issue", json!({"key": "not a key"})).await);
    assert!(matches!(err, ToolError::InvalidArguments(_)));

    let err = assert_err!(registry.call("search_issues", json!({"limit": 5})).await);
    assert!(matches!(err, ToolError::InvalidArguments(_)));

    let err = assert_err!(registry.call("delete_everything", json!({})).await);
    assert!(matches!(err, ToolError::UnknownTool(_)));

    assert_eq!(mock.hits(), 0);
    assert_eq!(registry.client().throttle_metrics().requests_in_last_hour, 0);
}

#[tokio::test]
async fn test_concurrent_tool_calls_share_one_budget() {
    let (url, mock) = spawn_tracker().await;
    let registry = ToolRegistry::new(client_for(&url, 3600).await);

    let handles: Vec<_> = (1..=12)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .call("get_issue", json!({"key": format!("CORE-{}", i)}))
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert_eq!(mock.hits(), 12);
    assert_eq!(
        registry.client().throttle_metrics().requests_in_last_hour,
        12
    );
}

mod write_config {
    use serde_json::{json, Value};
    use std::fs;
    use tempfile::tempdir;
    use tracker_bridge::error::IntegrationError;
    use tracker_bridge::integrations::{write_config, ClientKind, ServerEntry};

    fn read(path: &std::path::Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_creates_file_and_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/claude_desktop_config.json");
        let entry = ServerEntry::new(ClientKind::ClaudeDesktop, "/opt/tracker-bridge", vec![])
            .with_env("TRACKER_API_URL", "https://tracker.example.com/v1");

        write_config(ClientKind::ClaudeDesktop, &path, "issue-tracker", &entry).unwrap();

        assert_eq!(
            read(&path),
            json!({
                "mcpServers": {
                    "issue-tracker": {
                        "command": "/opt/tracker-bridge",
                        "args": [],
                        "env": {"TRACKER_API_URL": "https://tracker.example.com/v1"}
                    }
                }
            })
        );
    }

    #[test]
    fn test_rewrites_only_its_own_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        fs::write(
            &path,
            r#"{"mcpServers": {"other": {"command": "other"}, "issue-tracker": {"command": "old"}}}"#,
        )
        .unwrap();

        let entry = ServerEntry::new(ClientKind::Cursor, "new", vec!["--log-level".into(), "warn".into()]);
        write_config(ClientKind::Cursor, &path, "issue-tracker", &entry).unwrap();
        // idempotent
        write_config(ClientKind::Cursor, &path, "issue-tracker", &entry).unwrap();

        let doc = read(&path);
        assert_eq!(doc["mcpServers"]["other"]["command"], "other");
        assert_eq!(doc["mcpServers"]["issue-tracker"]["command"], "new");
        assert_eq!(
            doc["mcpServers"]["issue-tracker"]["args"],
            json!(["--log-level", "warn"])
        );
    }

    #[test]
    fn test_empty_file_is_treated_as_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        fs::write(&path, "  \n").unwrap();

        let entry = ServerEntry::new(ClientKind::Vscode, "tracker-bridge", vec![]);
        write_config(ClientKind::Vscode, &path, "tracker", &entry).unwrap();

        assert_eq!(read(&path)["servers"]["tracker"]["type"], "stdio");
    }

    #[test]
    fn test_invalid_file_is_left_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        fs::write(&path, "{ not json").unwrap();

        let entry = ServerEntry::new(ClientKind::Windsurf, "tracker-bridge", vec![]);
        let err = write_config(ClientKind::Windsurf, &path, "tracker", &entry).unwrap_err();

        assert!(matches!(err, IntegrationError::InvalidFile { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
