use crate::services::assembler::{UploadAssembler, UploadError};
use crate::services::job_store::JobStore;
use crate::services::pipeline::{PipelineHandle, PipelineJob, SubmitError};
use crate::services::storage::StorageLayout;
use crate::utils::validation::{chunk_extension, validate_job_id};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// One chunk-upload request, as parsed from the wire.
#[derive(Debug, Default)]
pub struct ChunkRequest {
    pub job_id: Option<String>,
    pub filename: Option<String>,
    pub chunk: Option<Vec<u8>>,
    pub declared_total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChunkDisposition {
    /// More chunks are expected.
    Continue,
    /// Upload complete, processing started.
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub job_id: String,
    pub disposition: ChunkDisposition,
    pub received: u64,
}

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("{0}")]
    Busy(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct IngressService {
    store: Arc<dyn JobStore>,
    assembler: Arc<UploadAssembler>,
    pipeline: PipelineHandle,
    layout: StorageLayout,
    allowed_extensions: Vec<String>,
}

impl IngressService {
    pub fn new(
        store: Arc<dyn JobStore>,
        assembler: Arc<UploadAssembler>,
        pipeline: PipelineHandle,
        layout: StorageLayout,
        allowed_extensions: Vec<String>,
    ) -> Self {
        Self {
            store,
            assembler,
            pipeline,
            layout,
            allowed_extensions,
        }
    }

    pub async fn handle_chunk(&self, request: ChunkRequest) -> Result<ChunkReceipt, IngressError> {
        let chunk = request
            .chunk
            .ok_or_else(|| IngressError::Invalid("No file chunk received".to_string()))?;

        let job_id = match request.job_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                let id = id.trim().to_string();
                validate_job_id(&id).map_err(|e| IngressError::Invalid(e.to_string()))?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let extension = chunk_extension(request.filename.as_deref(), &self.allowed_extensions)
            .map_err(|e| IngressError::Invalid(e.to_string()))?;

        self.store.mark_receiving(&job_id).await?;
        let outcome = self
            .assembler
            .append_chunk(&job_id, &extension, &chunk, request.declared_total)
            .await?;

        if !outcome.complete {
            return Ok(ChunkReceipt {
                job_id,
                disposition: ChunkDisposition::Continue,
                received: outcome.received,
            });
        }

        let claimed = if self.store.try_queue(&job_id).await? {
            true
        } else if is_complete_on_disk(&outcome.staging_path, request.declared_total).await
            && self.store.try_requeue(&job_id).await?
        {
            tracing::info!(job_id = %job_id, "🔁 New upload for a finished job, processing again");
            true
        } else {
            false
        };

        if claimed {
            let job = PipelineJob {
                job_id: job_id.clone(),
                staging_path: outcome.staging_path,
            };
            if let Err(e) = self.pipeline.submit(job) {
                return Err(self.reject(&job_id, e).await);
            }
            tracing::info!(
                job_id = %job_id,
                size = outcome.received,
                "📦 Upload complete, job queued"
            );
        } else {
            tracing::debug!(job_id = %job_id, "Upload already handed to the pipeline");
        }

        Ok(ChunkReceipt {
            job_id,
            disposition: ChunkDisposition::Accepted,
            received: outcome.received,
        })
    }

    /// Turns a refused submission into a terminal failure so the client's
    /// next poll sees it, and frees the staging file.
    async fn reject(&self, job_id: &str, error: SubmitError) -> IngressError {
        let message = error.to_string();
        tracing::warn!(job_id = %job_id, "Refusing job: {}", message);

        let (SubmitError::QueueFull(job) | SubmitError::Closed(job)) = error;
        if let Err(e) = self.store.set_failed(job_id, &message).await {
            tracing::error!(job_id = %job_id, "Failed to record refusal: {:#}", e);
        }
        if let Err(e) = self.layout.delete_file(&job.staging_path).await {
            tracing::warn!(job_id = %job_id, "Failed to remove staging file: {:#}", e);
        }

        IngressError::Busy(message)
    }
}

/// The pipeline deletes a job's staging file before recording its outcome,
/// so a complete staging file seen after that outcome is a new upload.
async fn is_complete_on_disk(path: &std::path::Path, declared_total: u64) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.len() >= declared_total)
}
