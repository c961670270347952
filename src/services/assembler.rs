use crate::services::storage::StorageLayout;
use crate::utils::keyed_mutex::KeyedMutex;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Chunk is empty")]
    EmptyChunk,

    #[error("Declared size of {declared} bytes exceeds the {limit} byte upload limit")]
    DeclaredTooLarge { declared: u64, limit: u64 },

    #[error("Upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("Failed to write chunk: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub staging_path: PathBuf,
    /// Size of the staging file after this chunk.
    pub received: u64,
    /// `declared_total > 0` and the staging file reached it.
    pub complete: bool,
}

/// Appends chunks to per-job staging files.
///
/// Chunks are written in the order calls acquire the job's lock; there is no
/// offset bookkeeping, the client is expected to send chunks in sequence.
pub struct UploadAssembler {
    layout: StorageLayout,
    locks: KeyedMutex,
    max_upload_size: u64,
}

impl UploadAssembler {
    pub fn new(layout: StorageLayout, max_upload_size: u64) -> Self {
        Self {
            layout,
            locks: KeyedMutex::new(),
            max_upload_size,
        }
    }

    /// The per-job append locks; the retention sweeper prunes idle entries.
    pub fn locks(&self) -> &KeyedMutex {
        &self.locks
    }

    pub async fn append_chunk(
        &self,
        job_id: &str,
        extension: &str,
        chunk: &[u8],
        declared_total: u64,
    ) -> Result<AppendOutcome, UploadError> {
        if chunk.is_empty() {
            return Err(UploadError::EmptyChunk);
        }
        if declared_total > self.max_upload_size {
            return Err(UploadError::DeclaredTooLarge {
                declared: declared_total,
                limit: self.max_upload_size,
            });
        }

        let staging_path = self.layout.staging_path(job_id, extension);
        let _guard = self.locks.lock(job_id).await;

        let existing = match tokio::fs::metadata(&staging_path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let received = existing + chunk.len() as u64;
        if received > self.max_upload_size {
            return Err(UploadError::TooLarge {
                limit: self.max_upload_size,
            });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&staging_path)
            .await?;
        file.write_all(chunk).await?;
        file.flush().await?;

        let complete = declared_total > 0 && received >= declared_total;
        tracing::debug!(
            job_id = %job_id,
            received,
            declared_total,
            complete,
            "Appended chunk of {} bytes",
            chunk.len()
        );

        Ok(AppendOutcome {
            staging_path,
            received,
            complete,
        })
    }
}
