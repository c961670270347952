use crate::AppState;
use crate::api::error::AppError;
use crate::services::ingress::{ChunkDisposition, ChunkRequest};
use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChunkResponse {
    pub uid: String,
    pub status: ChunkDisposition,
}

/// Multipart form accepted by the upload endpoint (documentation only).
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ChunkForm {
    /// Job id; generated when omitted.
    uid: Option<String>,
    /// Expected total size in bytes; 0 or absent when unknown.
    total: Option<u64>,
    /// The chunk. Its filename supplies the staging extension.
    #[schema(value_type = String, format = Binary)]
    audio: Vec<u8>,
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = ChunkForm, content_type = "multipart/form-data", description = "One chunk of an audio/video upload"),
    responses(
        (status = 202, description = "Upload complete, processing started", body = ChunkResponse),
        (status = 206, description = "Chunk stored, more expected", body = ChunkResponse),
        (status = 400, description = "Malformed chunk request"),
        (status = 413, description = "Upload exceeds the size limit"),
        (status = 503, description = "Processing queue is full")
    ),
    tag = "upload"
)]
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ChunkResponse>), AppError> {
    let mut request = ChunkRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "audio" => {
                request.filename = field
                    .file_name()
                    .filter(|f| !f.is_empty())
                    .map(str::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                request.chunk = Some(data.to_vec());
            }
            "uid" => {
                let text = field.text().await.map_err(multipart_error)?;
                request.job_id = Some(text);
            }
            "total" => {
                let text = field.text().await.map_err(multipart_error)?;
                let text = text.trim();
                if !text.is_empty() {
                    request.declared_total = text.parse().map_err(|_| {
                        AppError::BadRequest(format!("Invalid total size: {}", text))
                    })?;
                }
            }
            _ => {}
        }
    }

    let receipt = state.ingress.handle_chunk(request).await?;
    let status = match receipt.disposition {
        ChunkDisposition::Accepted => StatusCode::ACCEPTED,
        ChunkDisposition::Continue => StatusCode::PARTIAL_CONTENT,
    };

    Ok((
        status,
        Json(ChunkResponse {
            uid: receipt.job_id,
            status: receipt.disposition,
        }),
    ))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    let err_msg = e.to_string();
    if err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}
