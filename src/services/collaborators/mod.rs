//! External collaborators of the pipeline.
//!
//! Each stage is an opaque call behind a trait so the pipeline can be driven
//! by fakes in tests and by HTTP services in production.

pub mod renderer;
pub mod summarizer;
pub mod transcriber;

use crate::config::AppConfig;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use renderer::PdfRenderer;
pub use summarizer::ChatSummarizer;
pub use transcriber::WhisperApiTranscriber;

/// Speech-to-text over an uploaded audio/video file.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

/// Turns a raw transcript into a structured Markdown summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String>;
}

/// Renders Markdown into the downloadable document.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, markdown: &str) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Arc<dyn Summarizer>,
    pub renderer: Arc<dyn Renderer>,
}

impl Collaborators {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.collaborator_timeout)
            .build()?;

        if config.summarization.api_key.is_none() {
            tracing::warn!("LLM_KEY is not set, summarization requests will be unauthenticated");
        }

        Ok(Self {
            transcriber: Arc::new(WhisperApiTranscriber::new(
                client.clone(),
                config.transcription.clone(),
            )),
            summarizer: Arc::new(ChatSummarizer::new(client, config.summarization.clone())),
            renderer: Arc::new(PdfRenderer::default()),
        })
    }
}
