//! HTTP/JSON surface for block-builder workers and operators.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{Result, SchedulerError};
use crate::metrics;
use crate::partition::InMemoryLog;
use crate::scheduler::{BlockScheduler, Job, JobKey, JobSpec};

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<BlockScheduler>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignJobRequest {
    pub worker_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignJobResponse {
    pub key: JobKey,
    pub spec: JobSpec,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateJobRequest {
    pub key: JobKey,
    pub worker_id: String,
    #[serde(default)]
    pub complete: bool,
    pub spec: JobSpec,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateJobResponse {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct JobResponse {
    id: String,
    epoch: u64,
    assignee: Option<String>,
    lease_expiry: Option<DateTime<Utc>>,
    fail_count: u32,
    partition: i32,
    start_offset: i64,
    end_offset: i64,
    commit_rec_ts: DateTime<Utc>,
    last_seen_offset: i64,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let lease_expiry = job.assignee.as_ref().map(|_| job.lease_expiry);
        Self {
            id: job.key.id,
            epoch: job.key.epoch,
            assignee: job.assignee,
            lease_expiry,
            fail_count: job.fail_count,
            partition: job.spec.partition,
            start_offset: job.spec.start_offset,
            end_offset: job.spec.end_offset,
            commit_rec_ts: job.spec.commit_rec_ts,
            last_seen_offset: job.spec.last_seen_offset,
        }
    }
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = match &self {
            SchedulerError::NoJobAvailable => return StatusCode::NO_CONTENT.into_response(),
            SchedulerError::JobNotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::JobNotAssigned { .. } => StatusCode::CONFLICT,
            SchedulerError::InvalidWorker | SchedulerError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            SchedulerError::PartitionSource(_) => StatusCode::SERVICE_UNAVAILABLE,
            SchedulerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(UpdateJobResponse {
                success: false,
                error: Some(self.to_string()),
            }),
        )
            .into_response()
    }
}

/// Routes served to workers and operators.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/assign", post(assign_job_handler))
        .route("/api/jobs/update", post(update_job_handler))
        .route("/api/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `app` on `addr` until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, app: Router, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting scheduler API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn assign_job_handler(
    State(state): State<ApiState>,
    Json(payload): Json<AssignJobRequest>,
) -> std::result::Result<Json<AssignJobResponse>, SchedulerError> {
    let (key, spec) = state.scheduler.assign_job(&payload.worker_id).await?;
    Ok(Json(AssignJobResponse { key, spec }))
}

async fn update_job_handler(
    State(state): State<ApiState>,
    Json(payload): Json<UpdateJobRequest>,
) -> std::result::Result<Json<UpdateJobResponse>, SchedulerError> {
    state
        .scheduler
        .update_job(
            &payload.key,
            &payload.worker_id,
            payload.complete,
            &payload.spec,
        )
        .await?;
    Ok(Json(UpdateJobResponse {
        success: true,
        error: None,
    }))
}

async fn list_jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let jobs: Vec<JobResponse> = state
        .scheduler
        .jobs()
        .await
        .into_iter()
        .map(JobResponse::from)
        .collect();
    Json(jobs)
}

async fn status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.scheduler.status().await)
}

async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let stats = state.scheduler.stats().await;
    let gauges = state.scheduler.gauges();
    let body = metrics::render(&*gauges.read().await, stats);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

// ---------------------------------------------------------------------------
// Development log admin
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ProduceRequest {
    pub partition: i32,
    /// Defaults to now.
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default = "one")]
    pub count: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProduceResponse {
    pub last_offset: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitRequest {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Clone)]
struct LogAdminState {
    log: Arc<InMemoryLog>,
    topic: String,
    consumer_group: String,
}

/// Routes that feed the in-memory log, for running the scheduler locally.
pub fn log_admin_router(
    log: Arc<InMemoryLog>,
    topic: impl Into<String>,
    consumer_group: impl Into<String>,
) -> Router {
    Router::new()
        .route("/api/log/produce", post(produce_handler))
        .route("/api/log/commit", post(commit_handler))
        .with_state(LogAdminState {
            log,
            topic: topic.into(),
            consumer_group: consumer_group.into(),
        })
}

async fn produce_handler(
    State(state): State<LogAdminState>,
    Json(payload): Json<ProduceRequest>,
) -> std::result::Result<Json<ProduceResponse>, SchedulerError> {
    let timestamp = payload.timestamp.unwrap_or_else(Utc::now);
    let mut last_offset = -1;
    for _ in 0..payload.count {
        last_offset = state
            .log
            .produce(&state.topic, payload.partition, timestamp)
            .await?;
    }
    Ok(Json(ProduceResponse { last_offset }))
}

async fn commit_handler(
    State(state): State<LogAdminState>,
    Json(payload): Json<CommitRequest>,
) -> std::result::Result<StatusCode, SchedulerError> {
    state
        .log
        .commit(
            &state.consumer_group,
            &state.topic,
            payload.partition,
            payload.offset,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
