use crate::AppState;
use crate::api::error::AppError;
use crate::models::JobStage;
use crate::services::gateway::JobStatus;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Done,
    Error,
    Processing,
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct StatusResponse {
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<JobStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
}

impl StatusResponse {
    fn bare(status: StatusKind) -> Self {
        Self {
            status,
            download: None,
            message: None,
            stage: None,
            percent: None,
        }
    }
}

impl From<JobStatus> for StatusResponse {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Done { download } => StatusResponse {
                download: Some(download),
                percent: Some(100),
                ..Self::bare(StatusKind::Done)
            },
            JobStatus::Error { message } => StatusResponse {
                message: Some(message),
                ..Self::bare(StatusKind::Error)
            },
            JobStatus::Processing { stage, percent } => StatusResponse {
                stage: Some(stage),
                percent: Some(percent),
                ..Self::bare(StatusKind::Processing)
            },
            JobStatus::Unknown => Self::bare(StatusKind::Unknown),
        }
    }
}

#[utoipa::path(
    get,
    path = "/status/{uid}",
    params(
        ("uid" = String, Path, description = "Job id")
    ),
    responses(
        (status = 200, description = "Job is done, processing or unknown", body = StatusResponse),
        (status = 500, description = "Job failed; the error is reported once", body = StatusResponse)
    ),
    tag = "jobs"
)]
pub async fn job_status(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<(StatusCode, Json<StatusResponse>), AppError> {
    let status = state.gateway.status(&uid).await?;
    let code = match status {
        JobStatus::Error { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    Ok((code, Json(status.into())))
}
