use crate::AppState;
use crate::api::error::AppError;
use crate::services::gateway::DownloadOutcome;
use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_util::io::ReaderStream;

/// `attachment` disposition with an ASCII fallback and the RFC 5987 form.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(filename, NON_ALPHANUMERIC)
    )
}

#[utoipa::path(
    get,
    path = "/download/{uid}",
    params(
        ("uid" = String, Path, description = "Job id")
    ),
    responses(
        (status = 200, description = "The summary document as application/pdf"),
        (status = 404, description = "Document not ready"),
        (status = 500, description = "Job failed")
    ),
    tag = "jobs"
)]
pub async fn download_summary(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Response, AppError> {
    match state.gateway.download(&uid).await? {
        DownloadOutcome::Ready { file, size } => {
            tracing::info!(job_id = %uid, size, "📄 Serving summary document");
            let body = Body::from_stream(ReaderStream::new(file));
            Ok((
                [
                    (header::CONTENT_TYPE, mime::APPLICATION_PDF.to_string()),
                    (header::CONTENT_LENGTH, size.to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        content_disposition(&state.config.download_filename),
                    ),
                ],
                body,
            )
                .into_response())
        }
        DownloadOutcome::Failed { message } => Err(AppError::JobFailed(message)),
        DownloadOutcome::NotReady => Err(AppError::NotFound("File is not ready yet".to_string())),
    }
}
