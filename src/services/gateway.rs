use crate::models::JobStage;
use crate::services::job_store::JobStore;
use crate::services::storage::StorageLayout;
use crate::utils::validation::validate_job_id;
use anyhow::Result;
use std::io::ErrorKind;
use std::sync::Arc;

/// Client-visible view of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Done { download: String },
    Error { message: String },
    Processing { stage: JobStage, percent: u8 },
    Unknown,
}

#[derive(Debug)]
pub enum DownloadOutcome {
    /// Opened handle to the finished document, so the sweeper cannot pull it
    /// away between the existence check and the read.
    Ready { file: tokio::fs::File, size: u64 },
    Failed { message: String },
    NotReady,
}

/// Read side of the service. Error records are consumed on first read.
pub struct StatusGateway {
    store: Arc<dyn JobStore>,
    layout: StorageLayout,
}

impl StatusGateway {
    pub fn new(store: Arc<dyn JobStore>, layout: StorageLayout) -> Self {
        Self { store, layout }
    }

    pub fn download_link(job_id: &str) -> String {
        format!("/download/{}", job_id)
    }

    /// Ids that could not have been issued by the upload side never reach
    /// the filesystem.
    fn is_addressable(job_id: &str) -> bool {
        validate_job_id(job_id).is_ok()
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatus> {
        if !Self::is_addressable(job_id) {
            return Ok(JobStatus::Unknown);
        }

        if self
            .layout
            .file_exists(&self.layout.result_path(job_id))
            .await?
        {
            return Ok(JobStatus::Done {
                download: Self::download_link(job_id),
            });
        }

        if let Some(message) = self.store.take_error(job_id).await? {
            tracing::info!(job_id = %job_id, "Reported failure to client");
            return Ok(JobStatus::Error { message });
        }

        let state = self.store.get(job_id).await?;
        Ok(match state.stage {
            // Terminal without an outcome file: the outcome was swept or consumed.
            JobStage::Unknown | JobStage::Done | JobStage::Failed => JobStatus::Unknown,
            stage => JobStatus::Processing {
                stage,
                percent: state.percent,
            },
        })
    }

    pub async fn download(&self, job_id: &str) -> Result<DownloadOutcome> {
        if !Self::is_addressable(job_id) {
            return Ok(DownloadOutcome::NotReady);
        }

        match tokio::fs::File::open(self.layout.result_path(job_id)).await {
            Ok(file) => {
                let size = file.metadata().await?.len();
                return Ok(DownloadOutcome::Ready { file, size });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(message) = self.store.take_error(job_id).await? {
            return Ok(DownloadOutcome::Failed { message });
        }

        Ok(DownloadOutcome::NotReady)
    }
}
