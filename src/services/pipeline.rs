use crate::models::{ArtifactRef, JobStage};
use crate::services::collaborators::Collaborators;
use crate::services::job_store::JobStore;
use crate::services::storage::{FileKind, StorageLayout};
use anyhow::anyhow;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

/// A completed upload handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineJob {
    pub job_id: String,
    pub staging_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Transcription,
    Summarization,
    Rendering,
    Bookkeeping,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStage::Transcription => "Transcription",
            PipelineStage::Summarization => "Summarization",
            PipelineStage::Rendering => "Rendering",
            PipelineStage::Bookkeeping => "Saving the result",
        })
    }
}

#[derive(Debug, Error)]
#[error("{stage} failed: {source:#}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    #[source]
    pub source: anyhow::Error,
}

impl PipelineError {
    /// What the client is told: the collaborator's own message, without the
    /// stage prefix.
    pub fn client_message(&self) -> String {
        format!("{:#}", self.source)
    }
}

fn at(stage: PipelineStage) -> impl FnOnce(anyhow::Error) -> PipelineError {
    move |source| PipelineError { stage, source }
}

/// Reported for jobs that were in the pipeline when the process stopped.
pub const INTERRUPTED_MESSAGE: &str = "Processing was interrupted by a restart, please upload again";

/// Runs transcription, summarization and rendering for one job.
pub struct PipelineRunner {
    store: Arc<dyn JobStore>,
    layout: StorageLayout,
    collaborators: Collaborators,
}

impl PipelineRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        layout: StorageLayout,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            store,
            layout,
            collaborators,
        }
    }

    /// Processes a job to a terminal state. The staging file is removed
    /// whatever the outcome, before the outcome is recorded.
    pub async fn run(&self, job: &PipelineJob) -> Result<ArtifactRef, PipelineError> {
        let job_id = job.job_id.as_str();
        tracing::info!(job_id = %job_id, "▶️ Pipeline started");

        let rendered = self.execute(job).await;

        // A staging file next to a finished job always belongs to a new upload.
        if let Err(e) = self.layout.delete_file(&job.staging_path).await {
            tracing::warn!(job_id = %job_id, "Failed to remove staging file: {:#}", e);
        }

        let outcome = match rendered {
            Ok(artifact) => self.finish(job_id, artifact).await,
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(artifact) => {
                tracing::info!(job_id = %job_id, size = artifact.size, "✅ Pipeline finished");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, stage = %e.stage, "❌ Pipeline failed: {}", e);
                if let Err(store_err) = self.store.set_failed(job_id, &e.client_message()).await {
                    tracing::error!(job_id = %job_id, "Failed to record job failure: {:#}", store_err);
                }
            }
        }

        outcome
    }

    /// Collaborator calls up to the written artifact.
    async fn execute(&self, job: &PipelineJob) -> Result<ArtifactRef, PipelineError> {
        let job_id = job.job_id.as_str();

        self.progress(job_id, JobStage::Transcribing, 10).await?;
        let transcript = self
            .collaborators
            .transcriber
            .transcribe(&job.staging_path)
            .await
            .map_err(at(PipelineStage::Transcription))?;

        self.progress(job_id, JobStage::Summarizing, 50).await?;
        let markdown = self
            .collaborators
            .summarizer
            .summarize(&transcript)
            .await
            .map_err(at(PipelineStage::Summarization))?;

        self.progress(job_id, JobStage::Rendering, 80).await?;
        let document = self
            .collaborators
            .renderer
            .render(&markdown)
            .await
            .map_err(at(PipelineStage::Rendering))?;
        if document.is_empty() {
            return Err(at(PipelineStage::Rendering)(anyhow!(
                "Renderer produced an empty document"
            )));
        }

        let path = self.layout.result_path(job_id);
        self.layout
            .write_atomic(&path, &document)
            .await
            .map_err(at(PipelineStage::Bookkeeping))?;
        Ok(ArtifactRef {
            path,
            size: document.len() as u64,
        })
    }

    /// Records `Done`. A job that cannot be marked done must not leave its
    /// document behind, or it would read as done next to its error record.
    async fn finish(&self, job_id: &str, artifact: ArtifactRef) -> Result<ArtifactRef, PipelineError> {
        if let Err(e) = self.store.set_done(job_id, artifact.clone()).await {
            if let Err(delete_err) = self.layout.delete_file(&artifact.path).await {
                tracing::warn!(job_id = %job_id, "Failed to remove orphaned document: {:#}", delete_err);
            }
            return Err(at(PipelineStage::Bookkeeping)(e));
        }
        Ok(artifact)
    }

    /// Fails every job the store still lists as in the pipeline and removes
    /// its staging files. Meant to run once at startup, before the pool
    /// accepts work. Returns the number of jobs failed.
    pub async fn recover_interrupted(&self) -> anyhow::Result<usize> {
        let interrupted = self.store.in_flight().await?;
        if interrupted.is_empty() {
            return Ok(0);
        }

        let files = self.layout.list_files().await?;
        for job_id in &interrupted {
            tracing::warn!(job_id = %job_id, "Job was interrupted by a restart");
            self.store.set_failed(job_id, INTERRUPTED_MESSAGE).await?;

            let staging = files.iter().filter(|file| {
                file.kind == FileKind::Staging && file.job_id.as_deref() == Some(job_id.as_str())
            });
            for file in staging {
                if let Err(e) = self.layout.delete_file(&file.path).await {
                    tracing::warn!(job_id = %job_id, "Failed to remove staging file: {:#}", e);
                }
            }
        }

        Ok(interrupted.len())
    }

    async fn progress(&self, job_id: &str, stage: JobStage, percent: u8) -> Result<(), PipelineError> {
        tracing::info!(job_id = %job_id, %stage, percent, "Pipeline progress");
        self.store
            .set_progress(job_id, stage, percent)
            .await
            .map_err(at(PipelineStage::Bookkeeping))
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Processing queue is full, retry later")]
    QueueFull(PipelineJob),

    #[error("Pipeline is shutting down")]
    Closed(PipelineJob),
}

/// Submission side of the worker pool.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineJob>,
}

impl PipelineHandle {
    /// Enqueues without waiting; a full queue is reported to the caller.
    pub fn submit(&self, job: PipelineJob) -> Result<(), SubmitError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => SubmitError::QueueFull(job),
            mpsc::error::TrySendError::Closed(job) => SubmitError::Closed(job),
        })
    }
}

/// Bounded submission queue. The receiver is usually handed to
/// [`spawn_pipeline_pool`].
pub fn pipeline_channel(capacity: usize) -> (PipelineHandle, mpsc::Receiver<PipelineJob>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PipelineHandle { tx }, rx)
}

/// Starts the dispatcher: at most `workers` jobs run at once, the rest wait
/// in the queue. The returned task ends once every handle is dropped and all
/// accepted jobs have finished.
pub fn spawn_pipeline_pool(
    runner: Arc<PipelineRunner>,
    workers: usize,
    capacity: usize,
) -> (PipelineHandle, JoinHandle<()>) {
    let (handle, mut rx) = pipeline_channel(capacity);
    let workers = workers.max(1);

    let dispatcher = tokio::spawn(async move {
        let permits = Arc::new(Semaphore::new(workers));
        tracing::info!("👷 Pipeline pool started with {} workers", workers);

        while let Some(job) = rx.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let runner = runner.clone();
            tokio::spawn(async move {
                let _permit = permit;
                // Outcome is recorded in the job store by the runner.
                let _ = runner.run(&job).await;
            });
        }

        // Wait for in-flight jobs to release their permits.
        let _ = permits.acquire_many(workers as u32).await;
        tracing::info!("🛑 Pipeline pool drained");
    });

    (handle, dispatcher)
}
