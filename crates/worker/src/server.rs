//! Server-side route handlers and bind/serve helpers for the Worker Protocol
//! (spec §4.J): the six endpoints a worker exchanges with the scheduler,
//! backed by whatever [`wfl_engine::persistence::Store`] the scheduler
//! itself uses.
//!
//! Grounded on the shape of the teacher's `crates/mcp/src/server/http.rs`
//! (`axum::Router`, `tokio::net::TcpListener::bind`, `axum::serve` with
//! graceful shutdown) rather than inventing a bespoke routing layer — the
//! teacher already reaches for `axum` (see `crates/mcp/Cargo.toml`) for its
//! own local HTTP server, so the Worker Protocol's server side follows suit.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use tower_http::trace::TraceLayer;
use wfl_engine::persistence::Store;
use wfl_types::{
    Ack, Envelope, EnvelopeStatus, ErrorBody, HeartbeatRequest, RegisterRequest, RegisterResponse, RuntimeCapabilities, TaskCompleteRequest,
    TaskState, TaskStatusUpdate, WorkAssignment, Worker,
};

const WORKER_KEY_HEADER: &str = "x-worker-key";

/// Shared state behind every handler: the store the Scheduler's Worker
/// executor also reads from, plus an optional shared secret (spec §4.J
/// "Authentication").
#[derive(Clone)]
pub struct WorkerServerState {
    pub store: Arc<dyn Store>,
    pub worker_key: Option<String>,
}

pub fn router(state: WorkerServerState) -> Router {
    Router::new()
        .route("/workers", post(register))
        .route("/workers/{id}/heartbeat", put(heartbeat))
        .route("/workers/{id}/work", get(checkout_work))
        .route("/workers/{id}/tasks/{tid}/status", put(report_status))
        .route("/workers/{id}/tasks/{tid}/complete", put(complete_task))
        .route("/workers/{id}", delete(deregister))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves the Worker Protocol router until `shutdown`
/// resolves.
pub async fn serve(addr: SocketAddr, state: WorkerServerState, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "worker protocol server listening");
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

fn envelope_meta() -> (String, String) {
    (uuid::Uuid::new_v4().to_string(), Utc::now().to_rfc3339())
}

fn ok<T>(data: T) -> Envelope<T> {
    let (request_id, timestamp) = envelope_meta();
    Envelope { status: EnvelopeStatus::Ok, data: Some(data), error: None, request_id, timestamp, pagination: None }
}

fn err<T>(kind: &str, message: impl Into<String>) -> Envelope<T> {
    let (request_id, timestamp) = envelope_meta();
    Envelope { status: EnvelopeStatus::Error, data: None, error: Some(ErrorBody { kind: kind.to_string(), message: message.into() }), request_id, timestamp, pagination: None }
}

fn authorized(state: &WorkerServerState, headers: &HeaderMap) -> bool {
    match &state.worker_key {
        None => true,
        Some(expected) => headers.get(WORKER_KEY_HEADER).and_then(|v| v.to_str().ok()).map(|got| got == expected).unwrap_or(false),
    }
}

fn unauthorized_response() -> Response {
    (StatusCode::UNAUTHORIZED, Json(err::<()>("protocol", "missing or invalid worker key"))).into_response()
}

async fn register(State(state): State<WorkerServerState>, headers: HeaderMap, Json(body): Json<RegisterRequest>) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized_response();
    }
    let worker_id = uuid::Uuid::new_v4().to_string();
    let worker = Worker { id: worker_id.clone(), name: body.name, capabilities: body.capabilities, current_task: None, last_heartbeat: Utc::now().to_rfc3339() };
    match state.store.register_worker(worker).await {
        Ok(()) => (StatusCode::CREATED, Json(ok(RegisterResponse { worker_id }))).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(err::<RegisterResponse>("internal", e.to_string()))).into_response(),
    }
}

async fn heartbeat(State(state): State<WorkerServerState>, headers: HeaderMap, AxumPath(id): AxumPath<String>, Json(body): Json<HeartbeatRequest>) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized_response();
    }
    let timestamp = Utc::now().to_rfc3339();
    match state.store.touch_worker_heartbeat(&id, &timestamp, body.capabilities).await {
        Ok(()) => (StatusCode::OK, Json(ok(Ack { ok: true }))).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(err::<Ack>("protocol", e.to_string()))).into_response(),
    }
}

/// `GET /workers/{id}/work` — atomic checkout (spec §4.J "Checkout
/// semantics"). A `204 No Content` (no envelope body) signals nothing is
/// available, matching the spec table's "204 if none".
async fn checkout_work(State(state): State<WorkerServerState>, headers: HeaderMap, AxumPath(id): AxumPath<String>) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized_response();
    }
    let Some(worker) = state.store.get_worker(&id).await.ok().flatten() else {
        return (StatusCode::NOT_FOUND, Json(err::<WorkAssignment>("protocol", format!("no such worker: {id}")))).into_response();
    };
    match state.store.checkout_task(&id, &worker.capabilities).await {
        Ok(Some(task)) => (StatusCode::OK, Json(ok(WorkAssignment { task }))).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(err::<WorkAssignment>("internal", e.to_string()))).into_response(),
    }
}

async fn report_status(
    State(state): State<WorkerServerState>,
    headers: HeaderMap,
    AxumPath((worker_id, task_id)): AxumPath<(String, String)>,
    Json(update): Json<TaskStatusUpdate>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized_response();
    }
    let _ = worker_id;
    let Some(mut task) = state.store.get_task(&task_id).await.ok().flatten() else {
        return (StatusCode::NOT_FOUND, Json(err::<Ack>("protocol", format!("no such task: {task_id}")))).into_response();
    };
    if let Err(e) = task.transition(update.state) {
        return (StatusCode::CONFLICT, Json(err::<Ack>("protocol", e))).into_response();
    }
    if let Some(message) = update.message {
        task.error = Some(message);
    }
    match state.store.update_task(task).await {
        Ok(()) => (StatusCode::OK, Json(ok(Ack { ok: true }))).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(err::<Ack>("internal", e.to_string()))).into_response(),
    }
}

/// `PUT /workers/{id}/tasks/{tid}/complete` — the worker's final report.
/// `result.error.is_some()` maps to `Failed`, otherwise `Success` (spec §4.J
/// only names the wire shape; this mapping is the one the scheduler's
/// `wait_for_worker_completion` loop expects, documented in DESIGN.md).
async fn complete_task(
    State(state): State<WorkerServerState>,
    headers: HeaderMap,
    AxumPath((worker_id, task_id)): AxumPath<(String, String)>,
    Json(result): Json<TaskCompleteRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized_response();
    }
    let Some(mut task) = state.store.get_task(&task_id).await.ok().flatten() else {
        return (StatusCode::NOT_FOUND, Json(err::<Ack>("protocol", format!("no such task: {task_id}")))).into_response();
    };

    task.exit_code = Some(result.exit_code);
    task.outputs = result.outputs;
    task.error = result.error.clone();
    let target = if result.error.is_some() { TaskState::Failed } else { TaskState::Success };
    if let Err(e) = task.transition(target) {
        return (StatusCode::CONFLICT, Json(err::<Ack>("protocol", e))).into_response();
    }

    if let Err(e) = state.store.update_task(task).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(err::<Ack>("internal", e.to_string()))).into_response();
    }

    if let Ok(Some(mut worker)) = state.store.get_worker(&worker_id).await {
        worker.current_task = None;
        let _ = state.store.register_worker(worker).await;
    }

    (StatusCode::OK, Json(ok(Ack { ok: true }))).into_response()
}

async fn deregister(State(state): State<WorkerServerState>, headers: HeaderMap, AxumPath(id): AxumPath<String>) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized_response();
    }
    match state.store.deregister_worker(&id).await {
        Ok(()) => (StatusCode::OK, Json(ok(Ack { ok: true }))).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(err::<Ack>("internal", e.to_string()))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use wfl_engine::persistence::InMemoryStore;
    use wfl_types::{RuntimeCapabilities, Task, TaskState};

    fn state() -> WorkerServerState {
        WorkerServerState { store: InMemoryStore::new(), worker_key: None }
    }

    #[tokio::test]
    async fn register_then_checkout_returns_204_when_nothing_queued() {
        let app = router(state());
        let register_req = Request::builder()
            .method("POST")
            .uri("/workers")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&RegisterRequest { name: "w1".into(), capabilities: RuntimeCapabilities::default() }).unwrap()))
            .unwrap();
        let response = app.clone().oneshot(register_req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let envelope: Envelope<RegisterResponse> = serde_json::from_slice(&body).unwrap();
        let worker_id = envelope.data.unwrap().worker_id;

        let work_req = Request::builder().method("GET").uri(format!("/workers/{worker_id}/work")).body(Body::empty()).unwrap();
        let response = app.oneshot(work_req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unauthorized_request_is_rejected_when_worker_key_configured() {
        let state = WorkerServerState { store: InMemoryStore::new(), worker_key: Some("secret".to_string()) };
        let app = router(state);
        let req = Request::builder().method("GET").uri("/workers/w1/work").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn complete_with_error_marks_task_failed() {
        let store = InMemoryStore::new();
        let mut task = Task::new("t1", "sub1", "step", "worker");
        task.transition(TaskState::Scheduled).unwrap();
        task.transition(TaskState::Queued).unwrap();
        task.transition(TaskState::Running).unwrap();
        store.create_task(task).await.unwrap();

        let app = router(WorkerServerState { store: store.clone(), worker_key: None });
        let body = TaskCompleteRequest { exit_code: 1, outputs: indexmap::IndexMap::new(), error: Some("boom".to_string()) };
        let req = Request::builder()
            .method("PUT")
            .uri("/workers/w1/tasks/t1/complete")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stored = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Failed);
    }
}
