use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub const RESULT_EXTENSION: &str = "pdf";
pub const ERROR_EXTENSION: &str = "err";
pub const STATE_EXTENSION: &str = "state";

/// What a file under the storage root is, judged by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Staging,
    Result,
    Error,
    State,
    /// In-progress atomic write (`.<name>.<uuid>.partial`) or any other dotfile.
    Temp,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub job_id: Option<String>,
    pub kind: FileKind,
    pub size: u64,
    pub last_modified: SystemTime,
}

/// Naming scheme for every per-job file under a single flat storage root.
///
/// `<id>.<ext>` staging input, `<id>.pdf` rendered result, `<id>.err` error
/// record, `<id>.state` job state marker.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create storage root {}", self.root.display()))
    }

    pub fn staging_path(&self, job_id: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{}", job_id, extension))
    }

    pub fn result_path(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", job_id, RESULT_EXTENSION))
    }

    pub fn error_path(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", job_id, ERROR_EXTENSION))
    }

    pub fn state_path(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", job_id, STATE_EXTENSION))
    }

    /// Classifies a file name. Job ids never contain a dot, so the id is
    /// everything before the first one.
    pub fn classify(file_name: &str) -> (Option<String>, FileKind) {
        if file_name.starts_with('.') {
            return (None, FileKind::Temp);
        }
        let Some((id, ext)) = file_name.split_once('.') else {
            return (None, FileKind::Temp);
        };
        let kind = match ext {
            RESULT_EXTENSION => FileKind::Result,
            ERROR_EXTENSION => FileKind::Error,
            STATE_EXTENSION => FileKind::State,
            _ => FileKind::Staging,
        };
        (Some(id.to_string()), kind)
    }

    /// Writes `data` to `path` so that readers observe either the old file,
    /// nothing, or the complete new content.
    pub async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Atomic write target has no file name")?;
        let temp_path = path.with_file_name(format!(".{}.{}.partial", file_name, Uuid::new_v4()));

        let written = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e).with_context(|| format!("Failed to write {}", path.display()));
        }
        Ok(())
    }

    /// Returns `true` when a file was actually removed.
    pub async fn delete_file(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    pub async fn file_exists(&self, path: &Path) -> Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))
    }

    /// Reads a UTF-8 file, mapping "not found" to `None`.
    pub async fn read_text(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Lists regular files directly under the root. Files that vanish while
    /// listing are skipped.
    pub async fn list_files(&self) -> Result<Vec<StoredFile>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to list {}", self.root.display()));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let (job_id, kind) = Self::classify(&name);
            files.push(StoredFile {
                path: entry.path(),
                job_id,
                kind,
                size: metadata.len(),
                last_modified: metadata.modified()?,
            });
        }
        Ok(files)
    }
}
