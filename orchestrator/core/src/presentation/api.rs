// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API
//!
//! REST surface for job intake, lock inspection and telemetry ingest, plus a
//! Server-Sent Events stream of domain events. Handlers translate requests
//! into service calls and map `DispatchError` onto status codes.

use crate::application::dispatch::{CreateJobRequest, DispatchService};
use crate::application::path_lock_manager::{LockError, PathLockManager};
use crate::application::telemetry_ingest::TelemetryIngestService;
use crate::domain::channel::ChannelKey;
use crate::domain::errors::DispatchError;
use crate::domain::repository::RepositoryError;
use crate::domain::task_job::{JobQuery, JobSortKey, SortDirection, TaskJobId, TaskJobStatus};
use crate::domain::telemetry::{AgvFaultReport, AgvStatusReport, TaskProgressReport};
use crate::infrastructure::event_bus::{DomainEvent, EventBus};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct AppState {
    pub dispatch: Arc<dyn DispatchService>,
    pub locks: Arc<PathLockManager>,
    pub telemetry: Arc<TelemetryIngestService>,
    pub event_bus: Arc<EventBus>,
    pub start_time: Instant,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/jobs", post(create_job_handler).get(list_jobs_handler))
        .route("/api/jobs/{id}", get(get_job_handler))
        .route("/api/jobs/{id}/cancel", post(cancel_job_handler))
        .route("/api/jobs/{id}/recommendations", get(recommendations_handler))
        .route("/api/locks", get(list_locks_handler))
        .route("/api/channels", get(list_channels_handler))
        .route("/api/channels/{key}", get(channel_detail_handler))
        .route("/api/channels/{key}/release", post(release_channel_handler))
        .route("/api/telemetry/status", post(status_report_handler))
        .route("/api/telemetry/progress", post(progress_report_handler))
        .route("/api/telemetry/fault", post(fault_report_handler))
        .route("/api/events", get(stream_events_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error body returned by every failing handler: `{ "error": "..." }`
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Dispatch(DispatchError),
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError::Dispatch(err)
    }
}

impl From<LockError> for ApiError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::UnknownChannel(key) => ApiError::NotFound(format!("channel {key} not found")),
            other => ApiError::Dispatch(other.into()),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Dispatch(err) => match err {
                DispatchError::JobNotFound(_)
                | DispatchError::AgvNotFound(_)
                | DispatchError::Repository(RepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
                DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                DispatchError::InvalidTransition(_)
                | DispatchError::ConcurrentModification(_)
                | DispatchError::Repository(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
                DispatchError::Misconfiguration(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::NotFound(message) => message.clone(),
            ApiError::Dispatch(err) => err.to_string(),
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), "Request failed: {}", message);
        } else {
            debug!(status = status.as_u16(), "Request rejected: {}", message);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn create_job_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let job = state.dispatch.create_job(request).await?;
    Ok((StatusCode::CREATED, Json(json!(job))))
}

/// Query string for job listings. `status` takes a comma separated list.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    pub agv: Option<String>,
    pub sort: Option<JobSortKey>,
    pub direction: Option<SortDirection>,
    pub limit: Option<usize>,
}

impl ListJobsParams {
    fn into_query(self) -> Result<JobQuery, DispatchError> {
        let statuses = match self.status.as_deref() {
            Some(csv) => csv
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<TaskJobStatus>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(DispatchError::InvalidRequest)?,
            None => Vec::new(),
        };
        Ok(JobQuery {
            statuses,
            agv_code: self.agv,
            sort: self.sort.unwrap_or_default(),
            direction: self.direction.unwrap_or_default(),
            limit: self.limit,
        })
    }
}

async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> ApiResult<serde_json::Value> {
    let query = params.into_query()?;
    let jobs = state.dispatch.list_jobs(&query).await?;
    Ok(Json(json!(jobs)))
}

async fn get_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    let job = state.dispatch.get_job_status(TaskJobId(id)).await?;
    Ok(Json(json!(job)))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelJobBody {
    #[serde(default)]
    pub reason: Option<String>,
}

async fn cancel_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelJobBody>>,
) -> ApiResult<serde_json::Value> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "cancelled by operator".to_string());
    let job = state.dispatch.cancel_job(TaskJobId(id), &reason).await?;
    Ok(Json(json!(job)))
}

async fn recommendations_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    let ranked = state.dispatch.recommendations(TaskJobId(id)).await?;
    Ok(Json(json!(ranked)))
}

async fn list_locks_handler(State(state): State<Arc<AppState>>) -> ApiResult<serde_json::Value> {
    let locks = state.locks.list_active_locks().await?;
    Ok(Json(json!(locks)))
}

async fn list_channels_handler(State(state): State<Arc<AppState>>) -> ApiResult<serde_json::Value> {
    let channels = state.locks.active_channels().await?;
    Ok(Json(json!(channels)))
}

async fn channel_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<serde_json::Value> {
    let detail = state.locks.channel_detail(&ChannelKey::new(key)).await?;
    Ok(Json(json!(detail)))
}

async fn release_channel_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<serde_json::Value> {
    let key = ChannelKey::new(key);
    let released = state.locks.release_channel(&key).await?;
    Ok(Json(json!({ "channel": key, "released": released })))
}

async fn status_report_handler(
    State(state): State<Arc<AppState>>,
    Json(report): Json<AgvStatusReport>,
) -> ApiResult<serde_json::Value> {
    let agv = state.telemetry.ingest_status(report).await?;
    Ok(Json(json!(agv)))
}

async fn progress_report_handler(
    State(state): State<Arc<AppState>>,
    Json(report): Json<TaskProgressReport>,
) -> ApiResult<serde_json::Value> {
    let job = state.telemetry.ingest_progress(report).await?;
    Ok(Json(json!(job)))
}

async fn fault_report_handler(
    State(state): State<Arc<AppState>>,
    Json(report): Json<AgvFaultReport>,
) -> ApiResult<serde_json::Value> {
    let failed = state.telemetry.ingest_fault(report).await?;
    Ok(Json(json!({ "failed_job": failed })))
}

#[derive(Debug, Default, Deserialize)]
pub struct EventStreamParams {
    pub task_id: Option<Uuid>,
}

fn event_name(event: &DomainEvent) -> &'static str {
    match event {
        DomainEvent::Task(_) => "task",
        DomainEvent::Lock(_) => "lock",
        DomainEvent::Agv(_) => "agv",
    }
}

async fn stream_events_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventStreamParams>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let filter = params.task_id.map(TaskJobId);
    let stream = BroadcastStream::new(state.event_bus.subscribe_raw()).filter_map(move |received| {
        // Lagged receivers skip what they missed.
        let event = received.ok()?;
        if filter.is_some() && event.task_id() != filter {
            return None;
        }
        Some(Event::default().event(event_name(&event)).json_data(&event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
