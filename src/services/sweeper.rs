use crate::services::job_store::JobStore;
use crate::services::storage::{FileKind, StorageLayout};
use crate::utils::keyed_mutex::KeyedMutex;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::sleep;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    /// Expired files kept because their job is still in the pipeline.
    pub protected: usize,
}

/// Deletes files under the storage root that are older than the retention
/// interval, on the same interval.
pub struct RetentionSweeper {
    layout: StorageLayout,
    store: Arc<dyn JobStore>,
    locks: KeyedMutex,
    retention: Duration,
    shutdown: watch::Receiver<bool>,
}

impl RetentionSweeper {
    pub fn new(
        layout: StorageLayout,
        store: Arc<dyn JobStore>,
        locks: KeyedMutex,
        retention: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            layout,
            store,
            locks,
            retention,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "🧹 Retention sweeper started (every {:?})",
            self.retention
        );

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Retention sweeper shutting down");
                    break;
                }
                _ = sleep(self.retention) => {
                    match self.sweep(SystemTime::now()).await {
                        Ok(report) => tracing::info!(
                            scanned = report.scanned,
                            removed = report.removed,
                            protected = report.protected,
                            "✅ Retention sweep completed"
                        ),
                        Err(e) => tracing::error!("Retention sweep failed: {:#}", e),
                    }
                }
            }
        }
    }

    /// One sweep cycle, treating `now` as the current time.
    pub async fn sweep(&self, now: SystemTime) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return Ok(report);
        };

        // Input and state of running jobs must outlive the TTL, otherwise a
        // slow run loses its file mid-way.
        let in_flight: HashSet<String> = self.store.in_flight().await?.into_iter().collect();

        for file in self.layout.list_files().await? {
            report.scanned += 1;
            if file.last_modified >= cutoff {
                continue;
            }

            let running = file
                .job_id
                .as_ref()
                .is_some_and(|id| in_flight.contains(id));
            if running && matches!(file.kind, FileKind::Staging | FileKind::State) {
                report.protected += 1;
                continue;
            }

            match self.layout.delete_file(&file.path).await {
                Ok(true) => {
                    tracing::debug!("Swept expired file {}", file.path.display());
                    report.removed += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to sweep {}: {:#}", file.path.display(), e),
            }
        }

        let pruned = self.locks.cleanup() + self.store.prune_locks();
        if pruned > 0 {
            tracing::debug!("Pruned {} idle job locks", pruned);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::job_store::{FsJobStore, MemoryJobStore};
    use std::path::Path;

    fn backdate(path: &Path, age: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn sweeper(
        layout: &StorageLayout,
        store: Arc<dyn JobStore>,
    ) -> (RetentionSweeper, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let sweeper = RetentionSweeper::new(
            layout.clone(),
            store,
            KeyedMutex::new(),
            Duration::from_secs(600),
            rx,
        );
        (sweeper, tx)
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let (sweeper, _tx) = sweeper(&layout, Arc::new(MemoryJobStore::new()));

        let old_staging = layout.staging_path("old", "wav");
        let old_result = layout.result_path("done");
        let fresh_staging = layout.staging_path("fresh", "wav");
        for path in [&old_staging, &old_result, &fresh_staging] {
            std::fs::write(path, b"data").unwrap();
        }
        backdate(&old_staging, Duration::from_secs(601));
        backdate(&old_result, Duration::from_secs(3600));
        backdate(&fresh_staging, Duration::from_secs(599));

        let report = sweeper.sweep(SystemTime::now()).await.unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.removed, 2);
        assert!(!old_staging.exists());
        assert!(!old_result.exists());
        assert!(fresh_staging.exists());
    }

    #[tokio::test]
    async fn test_sweep_keeps_in_flight_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let store = Arc::new(MemoryJobStore::new());
        assert!(store.try_queue("busy").await.unwrap());
        let (sweeper, _tx) = sweeper(&layout, store);

        let staging = layout.staging_path("busy", "m4a");
        let stale_error = layout.error_path("busy");
        std::fs::write(&staging, b"audio").unwrap();
        std::fs::write(&stale_error, b"old failure").unwrap();
        backdate(&staging, Duration::from_secs(7200));
        backdate(&stale_error, Duration::from_secs(7200));

        let report = sweeper.sweep(SystemTime::now()).await.unwrap();

        assert_eq!(report.protected, 1);
        assert_eq!(report.removed, 1);
        assert!(staging.exists());
        assert!(!stale_error.exists());
    }

    #[tokio::test]
    async fn test_sweep_prunes_upload_and_store_locks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let store = Arc::new(FsJobStore::new(layout.clone()));
        let upload_locks = KeyedMutex::new();
        let (_tx, rx) = watch::channel(false);
        let sweeper = RetentionSweeper::new(
            layout,
            store.clone(),
            upload_locks.clone(),
            Duration::from_secs(600),
            rx,
        );

        for i in 0..20 {
            let job_id = format!("seen-{}", i);
            drop(upload_locks.lock(&job_id).await);
            store.get(&job_id).await.unwrap();
            store.mark_receiving(&job_id).await.unwrap();
        }
        let held = upload_locks.lock("busy").await;

        sweeper.sweep(SystemTime::now()).await.unwrap();

        assert_eq!(upload_locks.len(), 1, "held lock survives");
        assert_eq!(store.prune_locks(), 0, "store locks already pruned");
        drop(held);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let (sweeper, tx) = sweeper(&layout, Arc::new(MemoryJobStore::new()));

        let handle = tokio::spawn(sweeper.run());
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
