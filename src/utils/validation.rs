use anyhow::{Result, anyhow};
use std::path::Path;

/// Longest accepted job identifier.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Extension used for a chunk that arrives without a filename.
pub const FALLBACK_EXTENSION: &str = "tmp";

/// Extensions the job store and pipeline use for their own files.
/// A staging file must never collide with one of these.
pub const RESERVED_EXTENSIONS: &[&str] = &["pdf", "err", "state", "partial"];

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Job ids end up as file names under the storage root, so only a
/// conservative alphabet is accepted.
pub fn validate_job_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_JOB_ID_LEN {
        return Err(anyhow!(ValidationError {
            code: "INVALID_JOB_ID",
            message: format!("Job id must be 1 to {} characters long", MAX_JOB_ID_LEN),
        }));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        tracing::warn!("Rejected job id with unsafe characters: {:?}", id);
        return Err(anyhow!(ValidationError {
            code: "INVALID_JOB_ID",
            message: "Job id may only contain letters, digits, '-' and '_'".to_string(),
        }));
    }

    Ok(())
}

/// Resolves the staging extension for a chunk.
///
/// The filename of the chunk is reduced to its last path component first, so
/// `../../x.wav` still yields `wav`. A missing filename falls back to
/// [`FALLBACK_EXTENSION`].
pub fn chunk_extension(filename: Option<&str>, allowed: &[String]) -> Result<String> {
    let Some(filename) = filename.filter(|f| !f.trim().is_empty()) else {
        return Ok(FALLBACK_EXTENSION.to_string());
    };

    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| {
            anyhow!(ValidationError {
                code: "MISSING_EXTENSION",
                message: format!("File '{}' has no extension", name),
            })
        })?;

    if RESERVED_EXTENSIONS.contains(&ext.as_str()) || !allowed.contains(&ext) {
        return Err(anyhow!(ValidationError {
            code: "BLOCKED_EXTENSION",
            message: format!("File extension '.{}' is not allowed", ext),
        }));
    }

    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(anyhow!(ValidationError {
            code: "BLOCKED_EXTENSION",
            message: format!("File extension '.{}' is not allowed", ext),
        }));
    }

    Ok(ext)
}
