//! JSON HTTP API over the pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/classify` | Classify raw input text |
//! | `POST` | `/suggest` | Debounced suggestions (last call per client wins) |
//! | `POST` | `/contexts` | Create a context |
//! | `POST` | `/contexts/similar` | Embed text and search contexts |
//! | `POST` | `/contexts/{id}/links` | Link a context to a message |
//! | `GET`  | `/messages/{id}/contexts` | Contexts linked to a message |
//! | `POST` | `/jobs` | Queue an embedding job |
//! | `GET`  | `/jobs/{id}` | Job status |
//! | `POST` | `/jobs/{id}/status` | Advance a job |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "unknown context: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `upstream_error` (502), `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use chat_context_core::models::{
    Classification, ContentType, Context, ContextKind, DisplayContext, EmbeddingJob, JobStatus,
    JobStatusReport, Reference,
};
use chat_context_core::trigger::classify;
use chat_context_core::PipelineError;

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::similarity::SimilarityOptions;
use crate::suggest::SuggestionResult;

/// Start the server on `[server].bind`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let bind_addr = config.server.bind.clone();

    let app = router(pipeline);

    tracing::info!(%bind_addr, "HTTP server listening");
    println!("Listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router. Exposed so tests can drive it without a socket.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/classify", post(handle_classify))
        .route("/suggest", post(handle_suggest))
        .route("/contexts", post(handle_create_context))
        .route("/contexts/similar", post(handle_similar))
        .route("/contexts/{id}/links", post(handle_link))
        .route("/messages/{id}/contexts", get(handle_message_contexts))
        .route("/jobs", post(handle_queue_job))
        .route("/jobs/{id}", get(handle_job_status))
        .route("/jobs/{id}/status", post(handle_advance_job))
        .layer(cors)
        .with_state(pipeline)
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

/// Map typed pipeline failures to status codes; anything else is a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        let (status, code) = match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::UnknownJob(_)) | Some(PipelineError::UnknownContext(_)) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            Some(PipelineError::InvalidTransition { .. }) => (StatusCode::CONFLICT, "conflict"),
            Some(PipelineError::Transport(_)) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            Some(PipelineError::CacheWrite { .. }) | None => {
                if err.chain().any(|cause| cause.is::<serde_json::Error>()) {
                    (StatusCode::BAD_REQUEST, "bad_request")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                }
            }
        };
        AppError {
            status,
            code,
            message,
        }
    }
}

fn parse_kinds(raw: &[String]) -> Result<Vec<ContextKind>, AppError> {
    raw.iter()
        .map(|k| ContextKind::from_str(k).map_err(|e| bad_request(e.to_string())))
        .collect()
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

// ============ POST /classify ============

#[derive(Deserialize)]
struct ClassifyRequest {
    text: String,
}

async fn handle_classify(Json(req): Json<ClassifyRequest>) -> Json<Classification> {
    Json(classify(&req.text))
}

// ============ POST /suggest ============

#[derive(Deserialize)]
struct SuggestRequest {
    text: String,
    /// Debounce scope. Falls back to `chat_id`; requests with neither share
    /// one anonymous scope.
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    kinds: Vec<String>,
    #[serde(default)]
    limit: Option<usize>,
    /// Overrides `[suggestions].debounce_ms` for this call.
    #[serde(default)]
    debounce_ms: Option<u64>,
}

#[derive(Serialize)]
struct SuggestResponse {
    /// True when a newer request replaced this one before it finished.
    superseded: bool,
    #[serde(flatten)]
    result: Option<SuggestionResult>,
}

async fn handle_suggest(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<SuggestRequest>,
) -> Result<Json<SuggestResponse>, AppError> {
    let consumer = req
        .client_id
        .as_deref()
        .or(req.chat_id.as_deref())
        .unwrap_or_default()
        .to_string();
    let mut options = pipeline.suggestion_options();
    options.kinds = parse_kinds(&req.kinds)?;
    options.chat_id = req.chat_id;
    if let Some(limit) = req.limit {
        options.limit = limit;
    }
    if let Some(ms) = req.debounce_ms {
        options.debounce = Duration::from_millis(ms);
    }

    let result = pipeline
        .orchestrator_for(&consumer)
        .get_suggestions(&req.text, &options)
        .await;
    Ok(Json(SuggestResponse {
        superseded: result.is_none(),
        result,
    }))
}

// ============ POST /contexts ============

#[derive(Deserialize)]
struct CreateContextRequest {
    content: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    chat_id: Option<String>,
}

async fn handle_create_context(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<CreateContextRequest>,
) -> Result<(StatusCode, Json<Context>), AppError> {
    let kind = ContextKind::from_str(&req.kind).map_err(|e| bad_request(e.to_string()))?;
    let context = pipeline
        .contexts
        .create_context(&req.content, kind, req.metadata, req.chat_id)
        .await?;
    Ok((StatusCode::CREATED, Json(context)))
}

// ============ POST /contexts/similar ============

#[derive(Deserialize)]
struct SimilarRequest {
    text: String,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    kinds: Vec<String>,
    #[serde(default)]
    chat_id: Option<String>,
}

#[derive(Serialize)]
struct ReferencesResponse {
    references: Vec<Reference>,
}

async fn handle_similar(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<SimilarRequest>,
) -> Result<Json<ReferencesResponse>, AppError> {
    let defaults = SimilarityOptions::default();
    let options = SimilarityOptions {
        threshold: req.threshold.unwrap_or(defaults.threshold),
        limit: req.limit.unwrap_or(defaults.limit),
        kinds: parse_kinds(&req.kinds)?,
        chat_id: req.chat_id,
    };
    let references = pipeline
        .contexts
        .find_similar_contexts(&req.text, &options)
        .await?;
    Ok(Json(ReferencesResponse { references }))
}

// ============ POST /contexts/{id}/links ============

#[derive(Deserialize)]
struct LinkRequest {
    message_id: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Serialize)]
struct LinkResponse {
    created: bool,
}

async fn handle_link(
    State(pipeline): State<Arc<Pipeline>>,
    Path(context_id): Path<String>,
    Json(req): Json<LinkRequest>,
) -> Result<Json<LinkResponse>, AppError> {
    let created = pipeline
        .contexts
        .link_context_to_message(&context_id, &req.message_id, req.metadata)
        .await?;
    Ok(Json(LinkResponse { created }))
}

// ============ GET /messages/{id}/contexts ============

#[derive(Serialize)]
struct MessageContextsResponse {
    contexts: Vec<DisplayContext>,
}

async fn handle_message_contexts(
    State(pipeline): State<Arc<Pipeline>>,
    Path(message_id): Path<String>,
) -> Result<Json<MessageContextsResponse>, AppError> {
    let contexts = pipeline.contexts.get_message_contexts(&message_id).await?;
    Ok(Json(MessageContextsResponse { contexts }))
}

// ============ Jobs ============

#[derive(Deserialize)]
struct QueueJobRequest {
    content_id: String,
    content_type: String,
}

#[derive(Serialize)]
struct QueueJobResponse {
    job_id: String,
}

async fn handle_queue_job(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<QueueJobRequest>,
) -> Result<(StatusCode, Json<QueueJobResponse>), AppError> {
    let content_type =
        ContentType::from_str(&req.content_type).map_err(|e| bad_request(e.to_string()))?;
    let job_id = pipeline
        .jobs
        .queue_for_embedding(&req.content_id, content_type)
        .await?;
    Ok((StatusCode::CREATED, Json(QueueJobResponse { job_id })))
}

async fn handle_job_status(
    State(pipeline): State<Arc<Pipeline>>,
    Path(job_id): Path<String>,
) -> Json<JobStatusReport> {
    Json(pipeline.jobs.check_embedding_status(&job_id).await)
}

#[derive(Deserialize)]
struct AdvanceJobRequest {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

async fn handle_advance_job(
    State(pipeline): State<Arc<Pipeline>>,
    Path(job_id): Path<String>,
    Json(req): Json<AdvanceJobRequest>,
) -> Result<Json<EmbeddingJob>, AppError> {
    let status = JobStatus::from_str(&req.status).map_err(|e| bad_request(e.to_string()))?;
    let job = pipeline
        .jobs
        .advance(&job_id, status, req.error.as_deref())
        .await?;
    Ok(Json(job))
}
