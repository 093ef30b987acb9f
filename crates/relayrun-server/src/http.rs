//! HTTP API.
//!
//! - `POST /tasks` starts a run and streams its events (`data: <json>\n\n`)
//! - `GET /health` health check
//! - `GET /` service banner

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use relayrun_core::{ConversationId, SseData, ERROR_SENTINEL};
use relayrun_supervisor::{EnvironmentTarget, InMemoryUploadService, RemoteEndpoint, TaskContext};
use relayrun_worker_sdk::{ExecutionPolicy, LlmConfig};

use crate::state::AppState;

/// Environment id used when a request names an endpoint but no id.
const DEFAULT_BROWSER_ID: &str = "id";

/// One chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Request body for `POST /tasks`.
///
/// Either a chat transcript (`messages`, the first `user` message is the
/// query) or an explicit `query`, plus optional overrides of the server
/// defaults.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub llm_config: Option<LlmConfig>,
    #[serde(default)]
    pub policy: Option<ExecutionPolicy>,
    /// Remote environment base URL. An empty string forces a local browser.
    #[serde(default)]
    pub browser_session_endpoint: Option<String>,
    #[serde(default)]
    pub browser_id: Option<String>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl RunRequest {
    /// The user's request.
    pub fn query(&self) -> Option<&str> {
        self.query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .or_else(|| {
                self.messages
                    .iter()
                    .find(|m| m.role == "user")
                    .map(|m| m.content.as_str())
            })
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A request the server refuses before any run starts.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/tasks", post(create_task))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "relayrun",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "pending_cleanups": state.supervisor.pending_cleanups(),
    }))
}

/// Build the run context for a request, falling back to server defaults.
fn build_context(state: &AppState, req: RunRequest) -> Result<TaskContext, ApiError> {
    let query = req
        .query()
        .ok_or_else(|| ApiError::bad_request("Request carries no user message"))?
        .to_string();

    let target = match req.browser_session_endpoint.as_deref() {
        Some("") => EnvironmentTarget::Local,
        Some(endpoint) => EnvironmentTarget::Remote(RemoteEndpoint::new(
            endpoint,
            req.browser_id.as_deref().unwrap_or(DEFAULT_BROWSER_ID),
        )),
        None => state
            .config
            .browser_endpoint
            .clone()
            .map(EnvironmentTarget::Remote)
            .unwrap_or_default(),
    };

    let config = &state.config;
    let mut ctx = TaskContext::new(query.clone(), config.worker.build(&query))
        .with_conversation_id(ConversationId::new(
            req.conversation_id.unwrap_or_default(),
        ))
        .with_llm(req.llm_config.unwrap_or_else(|| config.llm.clone()))
        .with_policy(req.policy.unwrap_or_else(|| config.policy.clone()))
        .with_target(target)
        .with_step_budget(req.max_steps.unwrap_or(config.step_budget));
    if let Some(prompt) = req.system_prompt {
        ctx = ctx.with_system_prompt(prompt);
    }
    // Each run gets its own store; it is dropped with the run's teardown.
    if let Some(base_url) = &config.artifact_base_url {
        ctx = ctx.with_upload(Arc::new(InMemoryUploadService::new(base_url.as_str())));
    }
    Ok(ctx)
}

fn to_sse_event(event: &SseData) -> Result<Event, Infallible> {
    match serde_json::to_string(event) {
        Ok(json) => Ok(Event::default().data(json)),
        Err(e) => {
            error!(task_id = %event.stream_id, error = %e, "Failed to encode event");
            Ok(Event::default().data(ERROR_SENTINEL))
        }
    }
}

/// Start a run and stream its events.
async fn create_task(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected run request");
            return ApiError::bad_request(rejection.body_text()).into_response();
        }
    };
    let ctx = match build_context(&state, req) {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!(error = %e.message, "Rejected run request");
            return e.into_response();
        }
    };

    info!(
        task_id = %ctx.task_id,
        conversation_id = %ctx.conversation_id,
        query = %ctx.query,
        "Run requested"
    );

    let events = state
        .supervisor
        .start(ctx)
        .map(|event| to_sse_event(&event));
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}
