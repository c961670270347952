use super::Transcriber;
use crate::config::TranscriptionConfig;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for a Whisper server exposing the OpenAI `/audio/transcriptions` API.
pub struct WhisperApiTranscriber {
    client: reqwest::Client,
    config: TranscriptionConfig,
}

impl WhisperApiTranscriber {
    pub fn new(client: reqwest::Client, config: TranscriptionConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        let file = tokio::fs::File::open(audio_path)
            .await
            .with_context(|| format!("Failed to open {}", audio_path.display()))?;
        let length = file.metadata().await?.len();
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let form = Form::new()
            .part("file", Part::stream_with_length(body, length).file_name(file_name))
            .text("model", self.config.model.clone())
            .text("language", self.config.language.clone())
            .text("response_format", "json");

        let mut request = self.client.post(self.endpoint()).multipart(form);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        tracing::info!(
            "🎙️ Transcribing {} ({} bytes) with {}",
            audio_path.display(),
            length,
            self.config.model
        );

        let response = request
            .send()
            .await
            .context("Transcription request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Transcription service returned {}: {}", status, body.trim());
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .context("Malformed transcription response")?;
        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            bail!("No speech was recognized in the upload");
        }
        Ok(text)
    }
}
