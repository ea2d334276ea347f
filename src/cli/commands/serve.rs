//! HTTP API server for integration with other systems.
//!
//! Provides REST endpoints for submitting, inspecting and cancelling jobs.

use crate::cli::{parse_job_id, start_scheduler, Output};
use crate::config::Settings;
use crate::error::TubeflowError;
use crate::pipeline::{JobId, JobSnapshot};
use crate::scheduler::{Scheduler, SchedulerCounts};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Shared application state.
struct AppState {
    scheduler: Scheduler,
}

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let (scheduler, resumed) = start_scheduler(&settings, true)?;
    if !resumed.is_empty() {
        info!("Resumed {} unfinished job(s)", resumed.len());
    }

    let app = router(scheduler);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("tubeflow API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    if !resumed.is_empty() {
        Output::info(&format!("Resumed {} unfinished job(s)", resumed.len()));
    }
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Submit", "POST /jobs");
    Output::kv("List Jobs", "GET  /jobs");
    Output::kv("Get Job", "GET  /jobs/:job_id");
    Output::kv("Cancel Job", "POST /jobs/:job_id/cancel");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(scheduler: Scheduler) -> Router {
    let state = Arc::new(AppState { scheduler });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
        .layer(cors)
        .with_state(state)
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct SubmitRequest {
    /// YouTube URL or video id
    source: String,
}

#[derive(Serialize, Deserialize)]
struct SubmitResponse {
    job_id: JobId,
}

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<JobSnapshot>,
    total: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    counts: SchedulerCounts,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

/// Error wrapper that picks the status code from the error kind.
struct ApiError(TubeflowError);

impl From<TubeflowError> for ApiError {
    fn from(e: TubeflowError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TubeflowError::NotFound(_) => StatusCode::NOT_FOUND,
            TubeflowError::InvalidInput(_) | TubeflowError::VideoSource(_) => {
                StatusCode::BAD_REQUEST
            }
            TubeflowError::CapacityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: self.0.code(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let counts = state.scheduler.counts()?;
    Ok(Json(HealthResponse {
        status: "ok",
        counts,
    }))
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let job_id = state.scheduler.submit(&req.source)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> Result<Json<JobListResponse>, ApiError> {
    let jobs = state.scheduler.list()?;
    Ok(Json(JobListResponse {
        total: jobs.len(),
        jobs,
    }))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let job_id = lookup_id(&job_id)?;
    Ok(Json(state.scheduler.status(job_id)?))
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let job_id = lookup_id(&job_id)?;
    Ok(Json(state.scheduler.cancel(job_id)?))
}

/// A malformed id can never name a job, so it is reported as not found.
fn lookup_id(raw: &str) -> Result<JobId, ApiError> {
    parse_job_id(raw).map_err(|_| ApiError(TubeflowError::NotFound(raw.to_string())))
}
