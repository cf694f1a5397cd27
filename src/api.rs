//! HTTP job API.
//!
//! `POST /api/analyze` submits a job and answers `202` right away; clients
//! poll `GET /api/analyze/:id` for status, progress and the final report.

use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

use crate::analysis::JobService;
use crate::error::OverwatchError;
use crate::job::{Job, JobStatus, StageSummary};

/// Error returned by handlers; maps the library error onto a status code.
#[derive(Debug)]
pub struct ApiError(OverwatchError);

impl From<OverwatchError> for ApiError {
    fn from(err: OverwatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            OverwatchError::JobNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            OverwatchError::JobNotTerminal(_) => (StatusCode::CONFLICT, "CONFLICT"),
            OverwatchError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.0.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub video_url: String,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub job_id: Uuid,
}

/// Public view of a job. `report` only appears once completed, `error` only
/// once failed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub source: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-stage outcome of a completed job.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub stages: BTreeMap<String, StageSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        let report = job.report.filter(|_| job.status == JobStatus::Completed);
        let error = job.error.filter(|_| job.status == JobStatus::Failed);
        Self {
            job_id: job.id,
            source: job.source,
            status: job.status,
            progress: job.progress,
            message: job.message,
            report,
            error,
            stages: job.stages,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// POST /api/analyze
pub async fn submit(
    State(service): State<JobService>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<(StatusCode, Json<AnalyzeResponse>)> {
    let job_id = service.submit(&request.video_url, request.output_dir).await?;
    info!(%job_id, source = %request.video_url, "job accepted");
    Ok((StatusCode::ACCEPTED, Json(AnalyzeResponse { job_id })))
}

/// GET /api/analyze/:id
pub async fn status(
    State(service): State<JobService>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    Ok(Json(service.status(id).await?.into()))
}

/// POST /api/analyze/:id/cancel
pub async fn cancel(
    State(service): State<JobService>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobStatusResponse>)> {
    let job = service.cancel(id).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// DELETE /api/analyze/:id
pub async fn evict(
    State(service): State<JobService>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    Ok(Json(service.evict(id).await?.into()))
}

/// GET /api/jobs
pub async fn list(State(service): State<JobService>) -> Json<Vec<JobStatusResponse>> {
    let jobs = service.list().await;
    Json(jobs.into_iter().map(JobStatusResponse::from).collect())
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "module": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn router(service: JobService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(submit))
        .route("/api/analyze/:id", get(status).delete(evict))
        .route("/api/analyze/:id/cancel", post(cancel))
        .route("/api/jobs", get(list))
        .with_state(service)
}

/// Serves the API until `shutdown` resolves, then cancels running jobs.
pub async fn serve(
    service: JobService,
    bind: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::error::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "job API listening");
    axum::serve(listener, router(service.clone()))
        .with_graceful_shutdown(shutdown)
        .await?;
    service.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::config::OverwatchConfig;

    fn service() -> JobService {
        JobService::from_config(OverwatchConfig::default()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = router(service())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let uri = format!("/api/analyze/{}", Uuid::new_v4());
        let response = router(service())
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn empty_source_is_rejected() {
        let request = Request::post("/api/analyze")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"videoUrl": "  "}"#))
            .unwrap();
        let response = router(service()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn report_and_error_are_gated_by_status() {
        let mut job = Job::new("session.mp4".into(), None);
        job.report = Some("partial".into());
        job.error = Some("stale".into());
        job.status = JobStatus::Running;

        let view = serde_json::to_value(JobStatusResponse::from(job.clone())).unwrap();
        assert!(view.get("report").is_none());
        assert!(view.get("error").is_none());
        assert_eq!(view["status"], "running");
        assert!(view.get("jobId").is_some());

        job.status = JobStatus::Completed;
        let view = serde_json::to_value(JobStatusResponse::from(job)).unwrap();
        assert_eq!(view["report"], "partial");
        assert!(view.get("error").is_none());
    }
}
