use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use planstore_core::functions::FunctionDescriptor;
use planstore_core::stream::{self, Opening};
use planstore_core::{DispatchError, Dispatcher, ErrorBody, FunctionRegistry, Invocation};
use planstore_db::Store;

/// Version of the function protocol advertised during negotiation.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            body: err.body(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.body }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct FunctionsResponse {
    pub functions: Vec<FunctionDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    pub protocol_version: &'static str,
    pub server: ServerInfo,
    pub capabilities: FunctionsResponse,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub heartbeat: Duration,
    /// Cancelled on shutdown; every open stream watches it.
    pub cancel: CancellationToken,
}

impl AppState {
    pub fn new(store: Store, heartbeat: Duration, cancel: CancellationToken) -> Self {
        let registry = Arc::new(FunctionRegistry::builtin());
        Self {
            dispatcher: Arc::new(Dispatcher::new(registry, store)),
            heartbeat,
            cancel,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/functions", get(list_functions))
        .route("/functions/invoke", post(invoke))
        .route("/capabilities", get(capabilities))
        .route("/sse", get(sse_listen).post(sse_invoke))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(store: Store, addr: &str, heartbeat: Duration) -> Result<()> {
    let cancel = CancellationToken::new();
    let app = build_router(AppState::new(store, heartbeat, cancel.clone()));
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid listen address {addr:?}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(heartbeat_secs = heartbeat.as_secs(), "planstore serve listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .context("server error")?;
    info!("planstore serve shut down");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C; shutting down");
    }
    info!("shutdown requested, closing streams");
    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Response {
    let kv = state.dispatcher.store().kv();
    match kv.ping().await {
        Ok(()) => Json(json!({ "status": "ok", "backend": kv.backend() })).into_response(),
        Err(e) => {
            warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn list_functions(State(state): State<AppState>) -> Json<FunctionsResponse> {
    Json(FunctionsResponse {
        functions: state.dispatcher.registry().catalog(),
    })
}

async fn capabilities(State(state): State<AppState>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        protocol_version: PROTOCOL_VERSION,
        server: ServerInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        },
        capabilities: FunctionsResponse {
            functions: state.dispatcher.registry().catalog(),
        },
    })
}

async fn invoke(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let call: Invocation =
        serde_json::from_slice(&body).map_err(|e| DispatchError::Decode(e.to_string()))?;
    let result = state.dispatcher.invoke(&call.name, call.parameters).await?;
    Ok(Json(json!({ "result": result })).into_response())
}

async fn sse_listen(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    sse_response(state, Opening::Listen)
}

async fn sse_invoke(
    State(state): State<AppState>,
    body: Bytes,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    sse_response(state, Opening::from_body(&body))
}

/// Each event becomes its own `data: <json>` frame.
fn sse_response(
    state: AppState,
    opening: Opening,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = stream::session(
        state.dispatcher.clone(),
        opening,
        state.heartbeat,
        state.cancel.child_token(),
    )
    .map(|event| Event::default().json_data(event));
    Sse::new(events)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use serde_json::{Value, json};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use planstore_db::kv::MemoryStore;
    use planstore_test_utils::test_store;

    use super::{AppState, build_router};

    const TICK: Duration = Duration::from_millis(20);

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    fn test_state() -> (AppState, MemoryStore, CancellationToken) {
        let (store, backend) = test_store();
        let cancel = CancellationToken::new();
        (AppState::new(store, TICK, cancel.clone()), backend, cancel)
    }

    async fn send_request(
        state: AppState,
        method: &str,
        uri: &str,
        body: Body,
    ) -> axum::response::Response {
        let app = build_router(state);
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn get(state: AppState, uri: &str) -> axum::response::Response {
        send_request(state, "GET", uri, Body::empty()).await
    }

    async fn post_json(state: AppState, uri: &str, payload: Value) -> axum::response::Response {
        send_request(state, "POST", uri, Body::from(payload.to_string())).await
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Read SSE frames until `n` events have been decoded.
    async fn sse_events(response: axum::response::Response, n: usize) -> Vec<Value> {
        let mut body = response.into_body().into_data_stream();
        let mut buf = String::new();
        let mut events = Vec::new();
        while events.len() < n {
            let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
                .await
                .expect("event should arrive in time")
                .expect("stream should still be open")
                .unwrap();
            buf.push_str(std::str::from_utf8(&chunk).unwrap());
            while let Some(end) = buf.find("\n\n") {
                let frame: String = buf.drain(..end + 2).collect();
                let data = frame
                    .lines()
                    .find_map(|l| l.strip_prefix("data: "))
                    .expect("frame should carry data");
                events.push(serde_json::from_str(data).unwrap());
            }
        }
        events
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_health_ok() {
        let (state, _, _) = test_state();
        let resp = get(state, "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_health_reports_store_outage() {
        let (state, backend, _) = test_state();
        backend.set_offline(true);
        let resp = get(state, "/health").await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_functions_and_capabilities_share_catalog() {
        let (state, _, _) = test_state();
        let listed = body_json(get(state.clone(), "/functions").await).await;
        let caps = body_json(get(state, "/capabilities").await).await;

        assert_eq!(listed["functions"].as_array().unwrap().len(), 16);
        assert_eq!(caps["capabilities"]["functions"], listed["functions"]);
        assert_eq!(caps["server"]["name"], "planstore-cli");
        assert!(caps["protocol_version"].is_string());

        let first = &listed["functions"][0];
        assert_eq!(first["name"], "create_plan");
        assert_eq!(first["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn test_invoke_returns_result_envelope() {
        let (state, _, _) = test_state();
        let resp = post_json(
            state.clone(),
            "/functions/invoke",
            json!({ "name": "create_plan", "parameters": { "application_id": "a", "name": "p" } }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["result"]["status"], "new");

        let resp = post_json(
            state,
            "/functions/invoke",
            json!({ "name": "list_plans" }),
        )
        .await;
        assert_eq!(body_json(resp).await["result"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_error_envelopes() {
        let (state, _, _) = test_state();

        let resp = post_json(state.clone(), "/functions/invoke", json!({ "name": "nope" })).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["type"], "not_found");
        assert_eq!(json["error"]["code"], 404);

        let resp = post_json(
            state.clone(),
            "/functions/invoke",
            json!({ "name": "get_task", "parameters": {} }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["type"], "validation_error");

        let resp = post_json(
            state.clone(),
            "/functions/invoke",
            json!({ "name": "get_plan", "parameters": { "id": "ghost" } }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let message = body_json(resp).await["error"]["message"].clone();
        assert!(message.as_str().unwrap().contains("plan not found"));

        let resp = send_request(state, "POST", "/functions/invoke", Body::from("{broken")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["type"], "transport_error");
    }

    #[tokio::test]
    async fn test_invoke_store_outage_is_503() {
        let (state, backend, _) = test_state();
        backend.set_offline(true);
        let resp = post_json(state, "/functions/invoke", json!({ "name": "list_plans" })).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(resp).await["error"]["type"], "transport_error");
    }

    #[tokio::test]
    async fn test_sse_listen_handshake_then_heartbeats() {
        let (state, _, cancel) = test_state();
        let resp = get(state, "/sse").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()["content-type"].to_str().unwrap().to_owned();
        assert!(content_type.contains("text/event-stream"), "got {content_type}");

        let events = sse_events(resp, 3).await;
        assert_eq!(events[0]["type"], "connection_established");
        assert_eq!(events[1]["type"], "heartbeat");
        assert_eq!(events[1]["count"], 1);
        assert_eq!(events[2]["count"], 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_sse_invoke_emits_result() {
        let (state, _, cancel) = test_state();
        let resp = post_json(
            state,
            "/sse",
            json!({ "name": "list_plans_by_status", "parameters": { "status": "new" } }),
        )
        .await;
        let events = sse_events(resp, 3).await;
        assert_eq!(events[0]["type"], "connection_established");
        assert_eq!(events[1]["type"], "result");
        assert_eq!(events[1]["function"], "list_plans_by_status");
        assert_eq!(events[1]["result"], json!([]));
        assert!(events[1]["request_id"].is_string());
        assert_eq!(events[2]["type"], "heartbeat");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_sse_invoke_error_event() {
        let (state, _, cancel) = test_state();
        let resp = post_json(
            state,
            "/sse",
            json!({ "name": "reorder_task", "parameters": { "id": "ghost", "new_order": 0 } }),
        )
        .await;
        let events = sse_events(resp, 2).await;
        assert_eq!(events[1]["type"], "error");
        assert_eq!(events[1]["error"]["type"], "not_found");
        assert!(
            events[1]["error"]["message"]
                .as_str()
                .unwrap()
                .contains("task not found")
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_sse_stream_ends_on_shutdown() {
        let (store, _) = test_store();
        let cancel = CancellationToken::new();
        let state = AppState::new(store, Duration::from_secs(3600), cancel.clone());
        let resp = get(state, "/sse").await;
        let mut body = resp.into_body().into_data_stream();
        body.next().await.expect("handshake frame").unwrap();

        cancel.cancel();
        let end = tokio::time::timeout(Duration::from_millis(500), body.next())
            .await
            .expect("stream should end promptly on shutdown");
        assert!(end.is_none());
    }
}
