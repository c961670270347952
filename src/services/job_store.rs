use crate::models::{ArtifactRef, JobStage, JobState};
use crate::services::storage::{FileKind, StorageLayout};
use crate::utils::keyed_mutex::KeyedMutex;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Durable mapping from job id to job state.
///
/// `get` never fails for an id the store has not seen; it reports
/// [`JobStage::Unknown`] instead.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<JobState>;

    /// Records `Receiving` at 0% unless the store already knows the job.
    async fn mark_receiving(&self, job_id: &str) -> Result<()>;

    /// Claims the job for the pipeline. Only the first caller for a job in
    /// `Unknown` or `Receiving` gets `true`.
    async fn try_queue(&self, job_id: &str) -> Result<bool>;

    /// Claims a finished job for another run: `Done` or `Failed` goes back
    /// to `Queued` and the previous outcome is discarded. Jobs that are not
    /// finished are refused.
    async fn try_requeue(&self, job_id: &str) -> Result<bool>;

    /// Regressing or post-terminal updates are ignored.
    async fn set_progress(&self, job_id: &str, stage: JobStage, percent: u8) -> Result<()>;

    async fn set_done(&self, job_id: &str, artifact: ArtifactRef) -> Result<()>;

    async fn set_failed(&self, job_id: &str, message: &str) -> Result<()>;

    /// Read-once access to the failure message: the job is forgotten once the
    /// message has been handed out.
    async fn take_error(&self, job_id: &str) -> Result<Option<String>>;

    /// Ids of jobs currently owned by the pipeline.
    async fn in_flight(&self) -> Result<Vec<String>>;

    /// Drops per-job locks nobody holds. Returns how many were removed.
    fn prune_locks(&self) -> usize {
        0
    }
}

/// Job store backed by marker files next to the uploads.
///
/// `<id>.state` holds the JSON-encoded [`JobState`] (without the error text)
/// and `<id>.err` holds the error record of a failed job.
pub struct FsJobStore {
    layout: StorageLayout,
    locks: KeyedMutex,
}

impl FsJobStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            locks: KeyedMutex::new(),
        }
    }

    async fn read_state(&self, job_id: &str) -> Result<Option<JobState>> {
        let Some(raw) = self.layout.read_text(&self.layout.state_path(job_id)).await? else {
            return Ok(None);
        };
        let state = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt state marker for job {}", job_id))?;
        Ok(Some(state))
    }

    async fn write_state(&self, job_id: &str, state: &JobState) -> Result<()> {
        let mut persisted = state.clone();
        persisted.error = None;
        let data = serde_json::to_vec_pretty(&persisted)?;
        self.layout
            .write_atomic(&self.layout.state_path(job_id), &data)
            .await
    }

    /// Serialized read-modify-write of a job's state marker. `apply` returns
    /// whether anything changed.
    async fn update<F>(&self, job_id: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut JobState) -> bool + Send,
    {
        let _guard = self.locks.lock(job_id).await;
        let mut state = self
            .read_state(job_id)
            .await?
            .unwrap_or_else(JobState::unknown);
        if !apply(&mut state) {
            return Ok(false);
        }
        self.write_state(job_id, &state).await?;
        Ok(true)
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn get(&self, job_id: &str) -> Result<JobState> {
        let error = self.layout.read_text(&self.layout.error_path(job_id)).await?;

        if let Some(mut state) = self.read_state(job_id).await? {
            if state.stage == JobStage::Failed {
                // The error record is the source of truth for the message;
                // once it has been consumed the job is gone.
                match error {
                    Some(message) => state.error = Some(message),
                    None => return Ok(JobState::unknown()),
                }
            }
            return Ok(state);
        }

        // State markers can be swept before the outcome files.
        if let Some(message) = error {
            let mut state = JobState::new(JobStage::Failed, 0);
            state.error = Some(message);
            return Ok(state);
        }

        let result_path = self.layout.result_path(job_id);
        if let Ok(metadata) = tokio::fs::metadata(&result_path).await {
            let mut state = JobState::new(JobStage::Done, 100);
            state.artifact = Some(ArtifactRef {
                path: result_path,
                size: metadata.len(),
            });
            return Ok(state);
        }

        Ok(JobState::unknown())
    }

    async fn mark_receiving(&self, job_id: &str) -> Result<()> {
        self.update(job_id, |state| {
            state.stage == JobStage::Unknown && state.advance(JobStage::Receiving, 0)
        })
        .await?;
        Ok(())
    }

    async fn try_queue(&self, job_id: &str) -> Result<bool> {
        self.update(job_id, |state| {
            matches!(state.stage, JobStage::Unknown | JobStage::Receiving)
                && state.advance(JobStage::Queued, 0)
        })
        .await
    }

    async fn try_requeue(&self, job_id: &str) -> Result<bool> {
        let _guard = self.locks.lock(job_id).await;
        let result_path = self.layout.result_path(job_id);
        let error_path = self.layout.error_path(job_id);

        let finished = match self.read_state(job_id).await? {
            Some(state) => state.stage.is_terminal(),
            None => {
                self.layout.file_exists(&result_path).await?
                    || self.layout.file_exists(&error_path).await?
            }
        };
        if !finished {
            return Ok(false);
        }

        self.layout.delete_file(&result_path).await?;
        self.layout.delete_file(&error_path).await?;
        self.write_state(job_id, &JobState::new(JobStage::Queued, 0))
            .await?;
        Ok(true)
    }

    async fn set_progress(&self, job_id: &str, stage: JobStage, percent: u8) -> Result<()> {
        let applied = self
            .update(job_id, |state| state.advance(stage, percent))
            .await?;
        if !applied {
            tracing::debug!(job_id = %job_id, %stage, percent, "Ignored non-monotonic progress update");
        }
        Ok(())
    }

    async fn set_done(&self, job_id: &str, artifact: ArtifactRef) -> Result<()> {
        self.update(job_id, |state| state.complete(artifact)).await?;
        Ok(())
    }

    async fn set_failed(&self, job_id: &str, message: &str) -> Result<()> {
        let _guard = self.locks.lock(job_id).await;
        let mut state = self
            .read_state(job_id)
            .await?
            .unwrap_or_else(JobState::unknown);
        if !state.fail(message) {
            tracing::debug!(job_id = %job_id, stage = %state.stage, "Ignored failure for finished job");
            return Ok(());
        }
        // Error record first, so a reader that sees `Failed` always finds it.
        self.layout
            .write_atomic(&self.layout.error_path(job_id), message.as_bytes())
            .await?;
        self.write_state(job_id, &state).await
    }

    async fn take_error(&self, job_id: &str) -> Result<Option<String>> {
        let _guard = self.locks.lock(job_id).await;
        let error_path = self.layout.error_path(job_id);
        let Some(message) = self.layout.read_text(&error_path).await? else {
            return Ok(None);
        };
        self.layout.delete_file(&error_path).await?;
        self.layout
            .delete_file(&self.layout.state_path(job_id))
            .await?;
        Ok(Some(message))
    }

    async fn in_flight(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for file in self.layout.list_files().await? {
            let (FileKind::State, Some(job_id)) = (file.kind, file.job_id) else {
                continue;
            };
            match self.read_state(&job_id).await {
                Ok(Some(state)) if state.stage.is_in_flight() => ids.push(job_id),
                Ok(_) => {}
                Err(e) => tracing::warn!(job_id = %job_id, "Skipping unreadable state marker: {:#}", e),
            }
        }
        Ok(ids)
    }

    fn prune_locks(&self) -> usize {
        self.locks.cleanup()
    }
}

/// Process-local job store, used where durability is not needed (tests,
/// single-shot tooling).
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, JobState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, job_id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut JobState) -> bool,
    {
        match self.jobs.entry(job_id.to_string()) {
            Entry::Occupied(mut entry) => apply(entry.get_mut()),
            Entry::Vacant(entry) => {
                let mut state = JobState::unknown();
                let changed = apply(&mut state);
                if changed {
                    entry.insert(state);
                }
                changed
            }
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, job_id: &str) -> Result<JobState> {
        Ok(self
            .jobs
            .get(job_id)
            .map(|state| state.value().clone())
            .unwrap_or_else(JobState::unknown))
    }

    async fn mark_receiving(&self, job_id: &str) -> Result<()> {
        self.update(job_id, |state| {
            state.stage == JobStage::Unknown && state.advance(JobStage::Receiving, 0)
        });
        Ok(())
    }

    async fn try_queue(&self, job_id: &str) -> Result<bool> {
        Ok(self.update(job_id, |state| {
            matches!(state.stage, JobStage::Unknown | JobStage::Receiving)
                && state.advance(JobStage::Queued, 0)
        }))
    }

    async fn try_requeue(&self, job_id: &str) -> Result<bool> {
        Ok(match self.jobs.get_mut(job_id) {
            Some(mut state) if state.stage.is_terminal() => {
                *state = JobState::new(JobStage::Queued, 0);
                true
            }
            _ => false,
        })
    }

    async fn set_progress(&self, job_id: &str, stage: JobStage, percent: u8) -> Result<()> {
        self.update(job_id, |state| state.advance(stage, percent));
        Ok(())
    }

    async fn set_done(&self, job_id: &str, artifact: ArtifactRef) -> Result<()> {
        self.update(job_id, |state| state.complete(artifact));
        Ok(())
    }

    async fn set_failed(&self, job_id: &str, message: &str) -> Result<()> {
        self.update(job_id, |state| state.fail(message));
        Ok(())
    }

    async fn take_error(&self, job_id: &str) -> Result<Option<String>> {
        Ok(self
            .jobs
            .remove_if(job_id, |_, state| state.stage == JobStage::Failed)
            .and_then(|(_, state)| state.error))
    }

    async fn in_flight(&self) -> Result<Vec<String>> {
        Ok(self
            .jobs
            .iter()
            .filter(|entry| entry.value().stage.is_in_flight())
            .map(|entry| entry.key().clone())
            .collect())
    }
}
