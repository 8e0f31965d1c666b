//! HTTP server.
//!
//! Serves the analysis stream and its companion endpoints to the browser UI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/analyze?project_id=..` | Server-sent event stream of one analysis run |
//! | `GET`  | `/api/projects` | Projects the configured identity can see |
//! | `POST` | `/api/generate_action_plan` | Markdown action plan for one recommendation |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Analysis stream
//!
//! Every request starts its own pipeline on a fresh task with freshly built
//! collaborators. Events are forwarded in emission order with SSE event names
//! `update`, `checkpoint`, `error` and `complete`; the stream ends after the
//! terminal event. When the client disconnects the response stream is
//! dropped, which closes the event channel and cancels the run at its next
//! checkpoint.
//!
//! # Error Contract
//!
//! Non-stream errors share one body shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Missing 'project_id' query parameter." } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500), `agent_error` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the UI can be served
//! from a different origin.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::action_plan::generate_action_plan;
use crate::backend::{CloudBackend, GcpBackend};
use crate::config::Config;
use crate::error::AnalyzerError;
use crate::models::{ActionPlanRequest, ActionPlanResponse, ProjectSummary};
use crate::pipeline::AnalysisPipeline;
use crate::progress::{ProgressEmitter, ProgressEvent};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    /// Builds per-request query clients and agents.
    backend: Arc<dyn CloudBackend>,
}

/// Starts the HTTP server against Google Cloud.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let config = Arc::new(config.clone());
    let backend = Arc::new(GcpBackend::new(config.clone())?);
    run_server_with_backend(config, backend).await
}

/// Like [`run_server`], with a caller-supplied [`CloudBackend`].
pub async fn run_server_with_backend(
    config: Arc<Config>,
    backend: Arc<dyn CloudBackend>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = build_router(config, backend);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// The application router with CORS applied.
pub fn build_router(config: Arc<Config>, backend: Arc<dyn CloudBackend>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/analyze", get(handle_analyze))
        .route("/api/projects", get(handle_projects))
        .route("/api/generate_action_plan", post(handle_action_plan))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { config, backend })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn agent_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "agent_error".to_string(),
        message: message.into(),
    }
}

impl From<AnalyzerError> for AppError {
    fn from(err: AnalyzerError) -> Self {
        match err {
            AnalyzerError::Agent { .. }
            | AnalyzerError::EmptyAgentResponse { .. }
            | AnalyzerError::MalformedAgentOutput { .. } => agent_error(err.to_string()),
            AnalyzerError::InvalidIdentifier(_) => bad_request(err.to_string()),
            _ => internal(err.to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/analyze ============

#[derive(Deserialize)]
struct AnalyzeParams {
    project_id: Option<String>,
}

fn sse_event(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.kind())
        .data(event.payload().to_string())
}

/// Handler for `GET /api/analyze`.
///
/// Returns `400` when `project_id` is missing; every other failure is
/// reported inside the stream as an `error` event.
async fn handle_analyze(
    State(state): State<AppState>,
    Query(params): Query<AnalyzeParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let project_id = params
        .project_id
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| bad_request("Missing 'project_id' query parameter."))?;

    let (emitter, rx) = ProgressEmitter::channel(state.config.server.event_buffer);
    let pipeline = AnalysisPipeline::new(
        state.backend.clone(),
        state.config.discovery.clone(),
        project_id,
    );
    info!(run_id = %pipeline.run_id(), "analysis requested");

    tokio::spawn(async move {
        pipeline.run(&emitter).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============ GET /api/projects ============

async fn handle_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProjectSummary>>, AppError> {
    let projects = state.backend.list_projects().await.map_err(|e| {
        warn!(error = %e, "project listing failed");
        internal(format!("Failed to list GCP projects: {:#}", e))
    })?;
    Ok(Json(projects))
}

// ============ POST /api/generate_action_plan ============

async fn handle_action_plan(
    State(state): State<AppState>,
    Json(request): Json<ActionPlanRequest>,
) -> Result<Json<ActionPlanResponse>, AppError> {
    let credentials = state.backend.credentials()?;
    // the planner role never queries the catalog, so no project scope
    let agent = state.backend.reasoning_agent("", &credentials)?;
    let action_plan = generate_action_plan(agent.as_ref(), &request).await?;
    Ok(Json(ActionPlanResponse { action_plan }))
}
