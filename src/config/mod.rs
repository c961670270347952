use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for the speech-to-text endpoint (OpenAI-compatible
/// `/audio/transcriptions`).
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Spoken language hint, ISO-639-1 (default: "zh")
    pub language: String,
}

/// Settings for the summarization endpoint (OpenAI-compatible
/// `/chat/completions`).
#[derive(Debug, Clone)]
pub struct SummarizationConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding staging files, results and job markers (default: "uploads")
    pub storage_root: PathBuf,

    /// Maximum size of a complete upload in bytes (default: 900 MB)
    pub max_upload_size: u64,

    /// Accepted chunk file extensions, lowercase
    pub allowed_extensions: Vec<String>,

    /// Age after which files under the storage root are swept; also the
    /// sweep cadence (default: 600 seconds)
    pub retention_interval: Duration,

    pub host: String,
    pub port: u16,

    /// Jobs processed concurrently (default: 2)
    pub pipeline_workers: usize,

    /// Completed uploads waiting for a worker before new ones are refused (default: 32)
    pub pipeline_queue_capacity: usize,

    /// Name offered to the browser for the rendered document
    pub download_filename: String,

    /// Timeout for each collaborator HTTP call (default: 30 minutes)
    pub collaborator_timeout: Duration,

    pub transcription: TranscriptionConfig,
    pub summarization: SummarizationConfig,
}

pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] =
    &["wav", "mp3", "m4a", "flac", "ogg", "mp4", "webm", "mkv"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("uploads"),
            max_upload_size: 900 * 1024 * 1024,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            retention_interval: Duration::from_secs(600),
            host: "0.0.0.0".to_string(),
            port: 5000,
            pipeline_workers: 2,
            pipeline_queue_capacity: 32,
            download_filename: "meeting-summary.pdf".to_string(),
            collaborator_timeout: Duration::from_secs(30 * 60),
            transcription: TranscriptionConfig {
                base_url: "http://127.0.0.1:8000/v1".to_string(),
                api_key: None,
                model: "whisper-1".to_string(),
                language: "zh".to_string(),
            },
            summarization: SummarizationConfig {
                base_url: "https://api.moonshot.cn/v1".to_string(),
                api_key: None,
                model: "kimi-k2-thinking-turbo".to_string(),
                temperature: 0.3,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source, falling back to
    /// the defaults for missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let trimmed = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let default = Self::default();

        Self {
            storage_root: lookup("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.storage_root),

            max_upload_size: trimmed("MAX_UPLOAD_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            allowed_extensions: lookup("ALLOWED_EXTENSIONS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.allowed_extensions),

            retention_interval: trimmed("RETENTION_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.retention_interval),

            host: lookup("HOST").unwrap_or(default.host),
            port: trimmed("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),

            pipeline_workers: trimmed("PIPELINE_WORKERS")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(default.pipeline_workers),

            pipeline_queue_capacity: trimmed("PIPELINE_QUEUE_CAPACITY")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(default.pipeline_queue_capacity),

            download_filename: lookup("DOWNLOAD_FILENAME").unwrap_or(default.download_filename),

            collaborator_timeout: trimmed("COLLABORATOR_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.collaborator_timeout),

            transcription: TranscriptionConfig {
                base_url: lookup("TRANSCRIBE_BASE_URL").unwrap_or(default.transcription.base_url),
                api_key: lookup("TRANSCRIBE_API_KEY"),
                model: lookup("TRANSCRIBE_MODEL").unwrap_or(default.transcription.model),
                language: lookup("TRANSCRIBE_LANGUAGE").unwrap_or(default.transcription.language),
            },

            summarization: SummarizationConfig {
                base_url: lookup("LLM_BASE_URL").unwrap_or(default.summarization.base_url),
                api_key: lookup("LLM_KEY"),
                model: lookup("LLM_MODEL").unwrap_or(default.summarization.model),
                temperature: trimmed("LLM_TEMPERATURE")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.summarization.temperature),
            },
        }
    }

    /// Create config for development and tests (local storage, small limits, fast sweeps)
    pub fn development() -> Self {
        Self {
            storage_root: PathBuf::from("uploads-dev"),
            max_upload_size: 64 * 1024 * 1024,
            retention_interval: Duration::from_secs(60),
            host: "127.0.0.1".to_string(),
            pipeline_workers: 1,
            pipeline_queue_capacity: 8,
            collaborator_timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
