use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use simflow_core::{JobDescriptor, JobHandle, PollResult, SettingsGrid, SettingsMap};
use simflow_infra::config::{Credentials, RemoteConfig};
use simflow_infra::remote::{HttpRemoteService, RemoteError, RemoteService};

const BASIC_QUANT_SECRET: &str = "Basic cXVhbnQ6c2VjcmV0";
const SESSION_COOKIE: &str = "session=granted";

#[derive(Default)]
struct FakeService {
    submissions: Vec<Value>,
    polls: HashMap<String, u32>,
}

type Shared = Arc<Mutex<FakeService>>;

fn has_session(headers: &HeaderMap) -> bool {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|c| c.contains(SESSION_COOKIE))
}

async fn authenticate(headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(BASIC_QUANT_SECRET);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    (
        StatusCode::CREATED,
        [(header::SET_COOKIE, format!("{SESSION_COOKIE}; Path=/"))],
    )
        .into_response()
}

async fn submit(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !has_session(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut state = state.lock().unwrap();
    state.submissions.push(body.clone());
    if body["regular"] == "no-location" {
        return StatusCode::CREATED.into_response();
    }
    let id = match body["regular"].as_str() {
        Some("broken") => "err".to_string(),
        _ => state.submissions.len().to_string(),
    };
    (
        StatusCode::CREATED,
        [(header::LOCATION, format!("/simulations/{id}"))],
    )
        .into_response()
}

async fn progress(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !has_session(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut state = state.lock().unwrap();
    let polls = state.polls.entry(id.clone()).or_default();
    *polls += 1;

    if id == "err" {
        return Json(json!({"id": "sim-err", "status": "ERROR"})).into_response();
    }
    if *polls == 1 {
        return ([(header::RETRY_AFTER, "1.5")], "").into_response();
    }
    Json(json!({"id": format!("sim-{id}"), "status": "COMPLETE", "alpha": format!("A{id}")}))
        .into_response()
}

async fn alpha(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !has_session(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"id": id, "is": {"sharpe": 1.25, "fitness": 0.9}, "grade": null})).into_response()
}

struct TestServer {
    base_url: String,
    state: Shared,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let state = Shared::default();
        let app = Router::new()
            .route("/authentication", post(authenticate))
            .route("/simulations", post(submit))
            .route("/simulations/:id", get(progress))
            .route("/alphas/:id", get(alpha))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            state,
            handle,
        }
    }

    fn client(&self, username: &str, password: &str) -> HttpRemoteService {
        let config = RemoteConfig::new(&self.base_url, Credentials::new(username, password))
            .with_request_timeout(Duration::from_secs(5));
        HttpRemoteService::new(&config).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn job(payload: &str) -> JobDescriptor {
    let mut jobs = SettingsGrid::fast_expression_defaults()
        .axis("decay", [4i64])
        .expand([payload]);
    jobs.remove(0)
}

#[tokio::test]
async fn session_submit_poll_and_fetch_result() {
    let srv = TestServer::spawn().await;
    let remote = srv.client("quant", "secret");

    remote.authenticate().await.unwrap();
    let handle = remote.submit(&job("rank(close)")).await.unwrap();
    assert_eq!(handle.as_str(), format!("{}/simulations/1", srv.base_url));

    assert_eq!(
        remote.poll(&handle).await.unwrap(),
        PollResult::StillRunning {
            retry_after: Some(Duration::from_millis(1500))
        }
    );

    let PollResult::Completed(fields) = remote.poll(&handle).await.unwrap() else {
        panic!("expected a completed result");
    };
    assert_eq!(fields["id"], "A1");
    assert_eq!(fields["is"]["sharpe"], 1.25);

    assert_eq!(remote.fetch_remote_id(&handle).await.unwrap().as_str(), "sim-1");

    let submitted = srv.state.lock().unwrap().submissions[0].clone();
    assert_eq!(submitted["type"], "REGULAR");
    assert_eq!(submitted["regular"], "rank(close)");
    assert_eq!(submitted["settings"]["decay"], 4);
    assert_eq!(submitted["settings"]["universe"], "TOP3000");
}

#[tokio::test]
async fn error_status_is_a_run_failure() {
    let srv = TestServer::spawn().await;
    let remote = srv.client("quant", "secret");
    remote.authenticate().await.unwrap();

    let handle = remote.submit(&job("broken")).await.unwrap();
    let result = remote.poll(&handle).await.unwrap();

    let PollResult::RunFailed(remote_id) = result else {
        panic!("expected a run failure, got {result:?}");
    };
    assert_eq!(remote_id.as_str(), "sim-err");
}

#[tokio::test]
async fn wrong_credentials_are_rejected() {
    let srv = TestServer::spawn().await;
    let remote = srv.client("quant", "guess");

    let err = remote.authenticate().await.unwrap_err();
    assert!(matches!(err, RemoteError::Status { status: 401, .. }));
}

#[tokio::test]
async fn calls_without_a_session_fail() {
    let srv = TestServer::spawn().await;
    let remote = srv.client("quant", "secret");

    let err = remote
        .submit(&JobDescriptor::new("REGULAR", SettingsMap::new(), "rank(open)"))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Status { status: 401, .. }));
}

#[tokio::test]
async fn accepted_submission_without_location_is_a_failure() {
    let srv = TestServer::spawn().await;
    let remote = srv.client("quant", "secret");
    remote.authenticate().await.unwrap();

    let err = remote.submit(&job("no-location")).await.unwrap_err();
    assert_eq!(err, RemoteError::MissingHandle);
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    let srv = TestServer::spawn().await;
    let base_url = srv.base_url.clone();
    drop(srv);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let config = RemoteConfig::new(base_url, Credentials::new("quant", "secret"))
        .with_request_timeout(Duration::from_secs(2));
    let remote = HttpRemoteService::new(&config).unwrap();
    let handle = JobHandle::new("/simulations/1").unwrap();

    assert!(matches!(
        remote.poll(&handle).await,
        Err(RemoteError::Transport(_))
    ));
}
