//! JSON HTTP API in front of the controller.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{BoquitaError, Result};
use crate::scheduler::job::{JobDetail, JobManifest, JobSummary};
use crate::scheduler::Controller;
use crate::worker::{ObserverInfo, ObserverRegistry};

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<Controller>,
    pub observers: Arc<ObserverRegistry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Error rendered as `{"error": "..."}` with a status derived from its kind.
#[derive(Debug)]
pub struct ApiError(BoquitaError);

impl From<BoquitaError> for ApiError {
    fn from(e: BoquitaError) -> Self {
        ApiError(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(BoquitaError::Validation(rejection.body_text()))
    }
}

pub fn status_for(error: &BoquitaError) -> StatusCode {
    match error {
        BoquitaError::NotFound { .. } => StatusCode::NOT_FOUND,
        BoquitaError::Validation(_) | BoquitaError::Manifest(_) => StatusCode::BAD_REQUEST,
        BoquitaError::QueueCancelled | BoquitaError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v0/jobs", get(list_jobs_handler).post(create_job_handler))
        .route("/v0/jobs/{id}", get(get_job_handler))
        .route("/v0/jobs/{id}/trigger", delete(remove_trigger_handler))
        .route("/v0/observers", get(list_observers_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "Starting API server");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("API server stopped");
    Ok(())
}

fn parse_id(raw: &str) -> std::result::Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|e| ApiError(BoquitaError::Validation(format!("invalid job id {:?}: {}", raw, e))))
}

async fn list_jobs_handler(
    State(state): State<ApiState>,
) -> std::result::Result<Json<Vec<JobSummary>>, ApiError> {
    Ok(Json(state.controller.list_jobs().await?))
}

async fn get_job_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<JobDetail>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.controller.get_by_id(&id).await?))
}

async fn create_job_handler(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<JobManifest>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let Json(manifest) = payload?;
    let job_id = state.controller.create_job(manifest).await?;
    Ok((StatusCode::CREATED, Json(CreateJobResponse { job_id })))
}

async fn remove_trigger_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.controller.remove_trigger(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_observers_handler(State(state): State<ApiState>) -> Json<Vec<ObserverInfo>> {
    Json(state.observers.list())
}
