//! HTTP surface over one [`WorkspaceSession`].

use aura_core::{
    BlobStore, ChatMessage, ScoredWidget, SelectOptions, Size, TurnResult, WidgetManifest,
    WindowPatch, WorkspaceSession, WorkspaceState,
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub struct AppState {
    pub session: Arc<WorkspaceSession>,
    pub blobs: Arc<dyn BlobStore>,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn found(ok: bool) -> StatusCode {
    if ok {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpawnRequest {
    widget_type: String,
    #[serde(default)]
    props: Value,
    #[serde(default)]
    instance_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    min_priority: Option<u8>,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Deserialize)]
struct ViewportRequest {
    width: f64,
    height: f64,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/workspace", get(get_workspace))
        .route("/api/v1/workspace/spawn", post(spawn_window))
        .route("/api/v1/workspace/viewport", put(set_viewport))
        .route("/api/v1/windows/:id", axum::routing::patch(update_window))
        .route("/api/v1/windows/:id/focus", post(focus_window))
        .route("/api/v1/windows/:id/minimize", post(minimize_window))
        .route("/api/v1/windows/:id/close", post(close_window))
        .route("/api/v1/windows/:id/render", get(render_window))
        .route("/api/v1/widgets", get(list_widgets))
        .route("/api/v1/widgets/select", post(select_widgets))
        .route("/api/v1/chat", get(chat_history).post(send_chat))
        .route("/api/v1/chat/attachments/:id/pop-out", post(pop_out))
        .route(
            "/api/v1/blobs/:key",
            put(put_blob).get(get_blob).delete(delete_blob),
        )
        .with_state(state)
        .layer(axum::middleware::from_fn(log_request))
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    tracing::debug!(method = %method, path = %path, status = response.status().as_u16(), "request");
    response
}

async fn health() -> &'static str {
    "OK"
}

async fn get_workspace(State(state): State<Arc<AppState>>) -> Json<WorkspaceState> {
    Json(state.session.controller().serialize())
}

/// Spawns through the bus like chat does; the reply is the workspace after the spawn.
async fn spawn_window(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SpawnRequest>,
) -> ApiResult<Json<WorkspaceState>> {
    if !state.session.registry().contains(&body.widget_type) {
        return Err((
            StatusCode::NOT_FOUND,
            format!("unknown widget type: {}", body.widget_type),
        ));
    }
    state
        .session
        .request_spawn(&body.widget_type, body.props, body.instance_id.as_deref());
    Ok(Json(state.session.controller().serialize()))
}

async fn set_viewport(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ViewportRequest>,
) -> ApiResult<StatusCode> {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    if !valid(body.width) || !valid(body.height) {
        return Err((StatusCode::BAD_REQUEST, "viewport must be positive".to_string()));
    }
    state
        .session
        .controller()
        .set_viewport(Size::new(body.width, body.height));
    Ok(StatusCode::NO_CONTENT)
}

async fn update_window(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<WindowPatch>,
) -> StatusCode {
    found(state.session.controller().update(&id, patch))
}

async fn focus_window(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    found(state.session.controller().focus(&id))
}

async fn minimize_window(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    found(state.session.controller().minimize(&id))
}

async fn close_window(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    found(state.session.controller().close(&id))
}

async fn render_window(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .session
        .controller()
        .render(&id)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("no window {id}")))
}

async fn list_widgets(State(state): State<Arc<AppState>>) -> Json<Vec<WidgetManifest>> {
    let manifests = state
        .session
        .registry()
        .get_all()
        .iter()
        .map(|m| m.as_ref().clone())
        .collect();
    Json(manifests)
}

async fn select_widgets(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SelectRequest>,
) -> Json<Vec<ScoredWidget>> {
    let mut options = SelectOptions {
        category: body.category,
        min_priority: body.min_priority,
        ..Default::default()
    };
    if let Some(limit) = body.limit {
        options.limit = limit;
    }
    Json(state.session.selection().select(&body.query, options))
}

async fn chat_history(State(state): State<Arc<AppState>>) -> Json<Vec<ChatMessage>> {
    Json(state.session.chat_history())
}

async fn send_chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatRequest>,
) -> ApiResult<Json<TurnResult>> {
    let text = body.message.trim();
    if text.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is empty".to_string()));
    }
    Ok(Json(state.session.send_message(text).await))
}

async fn pop_out(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    match state.session.pop_out(&id) {
        Some(window_id) => Ok(Json(json!({ "id": window_id }))),
        None => Err((StatusCode::NOT_FOUND, format!("no attachment {id}"))),
    }
}

async fn put_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let url = state.blobs.put(&key, body.to_vec()).await.map_err(internal)?;
    Ok(Json(json!({ "url": url })))
}

async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    match state.blobs.get(&key).await.map_err(internal)? {
        Some(bytes) => Ok(bytes.into_response()),
        None => Err((StatusCode::NOT_FOUND, format!("no blob {key}"))),
    }
}

async fn delete_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    state.blobs.delete(&key).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}
