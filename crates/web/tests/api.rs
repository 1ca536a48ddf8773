//! HTTP surface tests, driving the router in-process.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use gwg_core::dispatch::Dispatcher;
use gwg_core::errors::GitError;
use gwg_core::git::{CloneRequest, Vcs, WorkingCopy};
use gwg_core::hook::sign;
use gwg_core::live::{LiveConfig, LiveConfigHandle};
use gwg_core::models::{RefSelector, RepoMapping};
use gwg_core::routing::RoutingTable;
use gwg_core::sync_engine::SyncEngine;
use gwg_web::{router, AppState, MAX_BODY_BYTES};

const SECRET: &str = "s3cret";

/// Backend that fails every operation; accepted runs end quickly.
struct NullVcs;

impl Vcs for NullVcs {
    fn open(&self, directory: &Path) -> Result<Box<dyn WorkingCopy>, GitError> {
        Err(GitError::RepositoryNotFound(directory.display().to_string()))
    }

    fn clone_repo(&self, req: &CloneRequest) -> Result<String, GitError> {
        Err(GitError::RefNotFound(req.selector.remote_ref()))
    }
}
const URL: &str = "git@github.com:org/app.git";

fn app(tmp: &Path) -> Router {
    let mut mapping = RepoMapping::new(
        URL,
        "/hooks/app",
        tmp.join("work"),
        RefSelector::branch("main"),
    );
    mapping.secret = Some(SECRET.into());
    let open = RepoMapping::new(
        "https://github.com/org/site.git",
        "/hooks/site",
        tmp.join("site"),
        RefSelector::branch("master"),
    );

    let (routes, _) = RoutingTable::build(vec![mapping, open]);
    let live = LiveConfigHandle::new(LiveConfig::default().with_routes(routes));
    let engine = SyncEngine::new(Arc::new(NullVcs));
    router(Arc::new(AppState {
        dispatcher: Dispatcher::new(live, engine),
        started_at: chrono::Utc::now(),
    }))
}

fn push_body(url: &str, git_ref: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "ref": git_ref,
        "repository": { "ssh_url": url },
    }))
    .unwrap()
}

fn signed_post(path: &str, event: &str, body: Vec<u8>) -> Request<Body> {
    let signature = sign(SECRET, &body).unwrap();
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-hub-signature-256", signature)
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let resp = app(tmp.path())
        .oneshot(
            Request::builder()
                .uri("/api/status/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["ok"], true);
}

#[tokio::test]
async fn test_status_lists_repositories() {
    let tmp = TempDir::new().unwrap();
    let resp = app(tmp.path())
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    let repos = body["repos"].as_array().unwrap();
    assert_eq!(repos.len(), 2);
    assert_eq!(repos[0]["name"], "org/app");
    assert_eq!(repos[0]["path"], "/hooks/app");
    assert_eq!(repos[0]["running"], false);
    assert!(repos[0]["last_outcome"].is_null());
}

#[tokio::test]
async fn test_matching_push_is_accepted() {
    let tmp = TempDir::new().unwrap();
    let resp = app(tmp.path())
        .oneshot(signed_post(
            "/hooks/app",
            "push",
            push_body(URL, "refs/heads/main"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body = json_body(resp).await;
    assert!(body["message"].as_str().unwrap().contains("org/app"));
}

#[tokio::test]
async fn test_trailing_slash_reaches_same_repository() {
    let tmp = TempDir::new().unwrap();
    let resp = app(tmp.path())
        .oneshot(signed_post(
            "/hooks/app/",
            "push",
            push_body(URL, "refs/heads/develop"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("refs/heads/develop"));
}

#[tokio::test]
async fn test_ping_is_acknowledged() {
    let tmp = TempDir::new().unwrap();
    let resp = app(tmp.path())
        .oneshot(signed_post("/hooks/app", "ping", b"{}".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let tmp = TempDir::new().unwrap();
    let resp = app(tmp.path())
        .oneshot(signed_post(
            "/hooks/nope",
            "push",
            push_body(URL, "refs/heads/main"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_signature_is_401() {
    let tmp = TempDir::new().unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/hooks/app")
        .header("x-github-event", "push")
        .header("x-hub-signature-256", "sha256=00ff")
        .body(Body::from(push_body(URL, "refs/heads/main")))
        .unwrap();
    let resp = app(tmp.path()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unsigned_push_without_secret_is_accepted() {
    let tmp = TempDir::new().unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/hooks/site")
        .header("x-gitea-event", "push")
        .body(Body::from(push_body(
            "https://github.com/org/site",
            "refs/heads/master",
        )))
        .unwrap();
    let resp = app(tmp.path()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_invalid_payload_is_400() {
    let tmp = TempDir::new().unwrap();
    let resp = app(tmp.path())
        .oneshot(signed_post("/hooks/app", "push", b"not json".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_on_webhook_path_is_405() {
    let tmp = TempDir::new().unwrap();
    let resp = app(tmp.path())
        .oneshot(
            Request::builder()
                .uri("/hooks/app")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_oversized_body_is_refused() {
    let tmp = TempDir::new().unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/hooks/site")
        .body(Body::from(vec![b' '; MAX_BODY_BYTES + 1]))
        .unwrap();
    let resp = app(tmp.path()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
