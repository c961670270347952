use super::Summarizer;
use crate::config::SummarizationConfig;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

fn build_prompt(transcript: &str) -> String {
    format!(
        "Turn the following speech transcript into a structured Markdown summary:\n\
         1. A core summary of 3-5 sentences\n\
         2. 3-6 topics, each under its own top-level heading with bullet points\n\
         3. Per topic, a condensed version of the original (drop filler and repetition, keep key facts)\n\
         Answer in the language of the transcript.\n\n\
         Transcript:\n{}\n",
        transcript
    )
}

/// Summarizer backed by an OpenAI-compatible chat completion endpoint.
pub struct ChatSummarizer {
    client: reqwest::Client,
    config: SummarizationConfig,
}

impl ChatSummarizer {
    pub fn new(client: reqwest::Client, config: SummarizationConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        let prompt = build_prompt(transcript);
        let payload = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: self.config.temperature,
        };

        let mut request = self.client.post(self.endpoint()).json(&payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        tracing::info!(
            "🧠 Summarizing {} characters with {}",
            transcript.chars().count(),
            self.config.model
        );

        let response = request
            .send()
            .await
            .context("Summarization request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Summarization service returned {}: {}", status, body.trim());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Malformed summarization response")?;
        let summary = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if summary.is_empty() {
            bail!("Summarization service returned an empty answer");
        }
        Ok(summary)
    }
}
