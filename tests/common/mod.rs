#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use http_body_util::BodyExt;
use meeting_digest::config::AppConfig;
use meeting_digest::models::JobState;
use meeting_digest::services::assembler::UploadAssembler;
use meeting_digest::services::collaborators::{Collaborators, Renderer, Summarizer, Transcriber};
use meeting_digest::services::job_store::{FsJobStore, JobStore};
use meeting_digest::services::pipeline::{PipelineRunner, spawn_pipeline_pool};
use meeting_digest::services::storage::StorageLayout;
use meeting_digest::{AppState, create_app};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

pub const BOUNDARY: &str = "---------------------------735323031399963166993862150";

#[derive(Default)]
pub struct FakeTranscriber {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let audio = tokio::fs::read(audio_path).await?;
        Ok(format!("transcript of {} bytes", audio.len()))
    }
}

/// Summarizer that can be told to fail, or to hold until released.
#[derive(Default)]
pub struct FakeSummarizer {
    pub calls: AtomicUsize,
    pub failure: Option<String>,
    pub gate: Option<Arc<Notify>>,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.failure {
            bail!("{}", message);
        }
        Ok(format!("# Meeting summary\n\n- {}\n", transcript))
    }
}

pub struct FakeRenderer;

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, markdown: &str) -> Result<Vec<u8>> {
        Ok(format!("%PDF-fake\n{}", markdown).into_bytes())
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<dyn JobStore>,
    pub layout: StorageLayout,
    pub transcriber: Arc<FakeTranscriber>,
    pub summarizer: Arc<FakeSummarizer>,
    pub dir: tempfile::TempDir,
}

pub fn spawn_app(summarizer: FakeSummarizer) -> TestApp {
    spawn_app_with(summarizer, Arc::new(FakeRenderer))
}

pub fn spawn_app_with(summarizer: FakeSummarizer, renderer: Arc<dyn Renderer>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        storage_root: dir.path().to_path_buf(),
        ..AppConfig::development()
    };

    let layout = StorageLayout::new(config.storage_root.clone());
    let store: Arc<dyn JobStore> = Arc::new(FsJobStore::new(layout.clone()));
    let transcriber = Arc::new(FakeTranscriber::default());
    let summarizer = Arc::new(summarizer);
    let collaborators = Collaborators {
        transcriber: transcriber.clone(),
        summarizer: summarizer.clone(),
        renderer,
    };

    let runner = Arc::new(PipelineRunner::new(
        store.clone(),
        layout.clone(),
        collaborators,
    ));
    let (pipeline, _dispatcher) = spawn_pipeline_pool(
        runner,
        config.pipeline_workers,
        config.pipeline_queue_capacity,
    );
    let assembler = Arc::new(UploadAssembler::new(
        layout.clone(),
        config.max_upload_size,
    ));

    let state = AppState::new(config, layout.clone(), store.clone(), assembler, pipeline);
    TestApp {
        app: create_app(state.clone()),
        state,
        store,
        layout,
        transcriber,
        summarizer,
        dir,
    }
}

/// Builds a `multipart/form-data` chunk request body.
pub fn chunk_body(uid: Option<&str>, total: Option<u64>, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(uid) = uid {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"uid\"\r\n\r\n{uid}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(total) = total {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"total\"\r\n\r\n{total}\r\n"
            )
            .as_bytes(),
        );
    }
    if !data.is_empty() {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn post_chunk(app: &Router, body: Vec<u8>) -> (u16, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn get_json(app: &Router, uri: &str) -> (u16, Value) {
    read_json(get(app, uri).await).await
}

pub async fn read_json(response: Response<Body>) -> (u16, Value) {
    let status = response.status().as_u16();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body)
        .unwrap_or_else(|_| panic!("non-JSON body: {:?}", String::from_utf8_lossy(&body)));
    (status, json)
}

/// Polls the store (without consuming error records) until the job is terminal.
pub async fn wait_for_terminal(store: &dyn JobStore, job_id: &str) -> JobState {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let state = store.get(job_id).await.unwrap();
            if state.stage.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}
