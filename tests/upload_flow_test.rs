mod common;

use axum::http::{StatusCode, header};
use common::*;
use http_body_util::BodyExt;
use meeting_digest::models::JobStage;
use meeting_digest::services::collaborators::PdfRenderer;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// Collects the `request_id` field of every `http_request` span.
#[derive(Clone, Default)]
struct SpanRequestIds(Arc<Mutex<Vec<String>>>);

impl<S: tracing::Subscriber> Layer<S> for SpanRequestIds {
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        struct RequestId(Option<String>);

        impl Visit for RequestId {
            fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                if field.name() == "request_id" {
                    self.0 = Some(format!("{:?}", value));
                }
            }
        }

        if attrs.metadata().name() != "http_request" {
            return;
        }
        let mut visitor = RequestId(None);
        attrs.record(&mut visitor);
        if let Some(id) = visitor.0 {
            self.0.lock().unwrap().push(id);
        }
    }
}

#[tokio::test]
async fn test_chunked_upload_to_download() {
    let t = spawn_app_with(FakeSummarizer::default(), Arc::new(PdfRenderer));

    // Chunks of 3, 5 and 2 bytes with a declared total of 10
    let chunks: [&[u8]; 3] = [b"RIF", b"F-aud", b"io"];
    let mut statuses = Vec::new();
    for chunk in chunks {
        assert_eq!(t.transcriber.calls.load(Ordering::SeqCst), 0);
        let (status, json) =
            post_chunk(&t.app, chunk_body(Some("J1"), Some(10), "standup.wav", chunk)).await;
        assert_eq!(json["uid"], "J1");
        statuses.push((status, json["status"].as_str().unwrap().to_string()));
    }
    assert_eq!(
        statuses,
        vec![
            (206, "continue".to_string()),
            (206, "continue".to_string()),
            (202, "accepted".to_string()),
        ]
    );

    let state = wait_for_terminal(t.store.as_ref(), "J1").await;
    assert_eq!(state.stage, JobStage::Done);
    assert_eq!(state.percent, 100);
    assert_eq!(t.transcriber.calls.load(Ordering::SeqCst), 1);
    assert!(!t.dir.path().join("J1.wav").exists(), "staging file removed");

    let (status, json) = get_json(&t.app, "/status/J1").await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "done");
    assert_eq!(json["download"], "/download/J1");
    assert_eq!(json["percent"], 100);

    let response = get(&t.app, "/download/J1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/pdf"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment;"));
    assert!(disposition.contains("filename*=UTF-8''meeting%2Dsummary%2Epdf"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.starts_with(b"%PDF-"));

    // The artifact stays for the sweeper; downloading again still works.
    assert_eq!(get(&t.app, "/download/J1").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_total_never_triggers() {
    let t = spawn_app(FakeSummarizer::default());

    let (status, json) = post_chunk(&t.app, chunk_body(None, None, "call.mp3", b"abc")).await;
    assert_eq!(status, 206);
    let uid = json["uid"].as_str().unwrap().to_string();

    let (status, _) = post_chunk(&t.app, chunk_body(Some(&uid), Some(0), "call.mp3", b"def")).await;
    assert_eq!(status, 206);

    let (status, json) = get_json(&t.app, &format!("/status/{}", uid)).await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "processing");
    assert_eq!(json["stage"], "receiving");
    assert_eq!(json["percent"], 0);
    assert_eq!(t.transcriber.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_final_chunks_trigger_once() {
    // Hold the job in summarization so the staging file outlives both requests.
    let gate = Arc::new(Notify::new());
    let t = spawn_app(FakeSummarizer {
        gate: Some(gate.clone()),
        ..Default::default()
    });

    let (status, _) = post_chunk(&t.app, chunk_body(Some("J2"), Some(6), "a.m4a", b"abcd")).await;
    assert_eq!(status, 206);

    let first = {
        let app = t.app.clone();
        tokio::spawn(async move {
            post_chunk(&app, chunk_body(Some("J2"), Some(6), "a.m4a", b"ef")).await
        })
    };
    let second = {
        let app = t.app.clone();
        tokio::spawn(async move {
            post_chunk(&app, chunk_body(Some("J2"), Some(6), "a.m4a", b"ef")).await
        })
    };
    assert_eq!(first.await.unwrap().0, 202);
    assert_eq!(second.await.unwrap().0, 202);

    gate.notify_one();
    let state = wait_for_terminal(t.store.as_ref(), "J2").await;
    assert_eq!(state.stage, JobStage::Done);
    assert_eq!(t.transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(t.summarizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reupload_of_finished_job_is_processed() {
    let t = spawn_app(FakeSummarizer::default());

    post_chunk(&t.app, chunk_body(Some("D1"), Some(5), "a.wav", b"older")).await;
    assert_eq!(wait_for_terminal(t.store.as_ref(), "D1").await.stage, JobStage::Done);

    let (status, json) =
        post_chunk(&t.app, chunk_body(Some("D1"), Some(5), "a.wav", b"newer")).await;
    assert_eq!(status, 202);
    assert_eq!(json["status"], "accepted");

    let state = wait_for_terminal(t.store.as_ref(), "D1").await;
    assert_eq!(state.stage, JobStage::Done);
    assert_eq!(t.transcriber.calls.load(Ordering::SeqCst), 2);
    assert!(!t.dir.path().join("D1.wav").exists(), "no orphaned staging file");
    assert!(t.dir.path().join("D1.pdf").exists());

    let (_, json) = get_json(&t.app, "/status/D1").await;
    assert_eq!(json["status"], "done");
}

#[tokio::test]
async fn test_failure_is_reported_once() {
    let t = spawn_app(FakeSummarizer {
        failure: Some("model overloaded".to_string()),
        ..Default::default()
    });

    let (status, _) = post_chunk(&t.app, chunk_body(Some("J3"), Some(4), "a.ogg", b"oggs")).await;
    assert_eq!(status, 202);

    let state = wait_for_terminal(t.store.as_ref(), "J3").await;
    assert_eq!(state.stage, JobStage::Failed);
    assert!(!t.dir.path().join("J3.ogg").exists(), "staging file removed");
    assert!(!t.dir.path().join("J3.pdf").exists(), "no artifact on failure");

    let (status, json) = get_json(&t.app, "/status/J3").await;
    assert_eq!(status, 500);
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "model overloaded");

    let (status, json) = get_json(&t.app, "/status/J3").await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "unknown");
}

#[tokio::test]
async fn test_download_of_failed_job_consumes_error() {
    let t = spawn_app(FakeSummarizer {
        failure: Some("quota exceeded".to_string()),
        ..Default::default()
    });

    post_chunk(&t.app, chunk_body(Some("J4"), Some(2), "a.flac", b"fl")).await;
    wait_for_terminal(t.store.as_ref(), "J4").await;

    let (status, json) = get_json(&t.app, "/download/J4").await;
    assert_eq!(status, 500);
    assert_eq!(json["error"], "quota exceeded");

    let (status, json) = get_json(&t.app, "/status/J4").await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "unknown");
}

#[tokio::test]
async fn test_download_before_done_is_not_ready() {
    let t = spawn_app(FakeSummarizer::default());

    let (status, json) = get_json(&t.app, "/download/nothing-here").await;
    assert_eq!(status, 404);
    assert!(json["error"].as_str().is_some());

    post_chunk(&t.app, chunk_body(Some("J5"), Some(100), "a.wav", b"partial")).await;
    let (status, _) = get_json(&t.app, "/download/J5").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_encoded_slash_ids_stay_inside_the_root() {
    let t = spawn_app(FakeSummarizer::default());

    // A sibling directory of the storage root, reachable as `../<name>/victim`.
    let outside = tempfile::tempdir().unwrap();
    let victim = outside.path().join("victim");
    for ext in ["err", "state", "pdf"] {
        std::fs::write(victim.with_extension(ext), b"not yours").unwrap();
    }
    let escaped = format!(
        "..%2F{}%2Fvictim",
        outside.path().file_name().unwrap().to_str().unwrap()
    );

    let (status, json) = get_json(&t.app, &format!("/status/{}", escaped)).await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "unknown");

    let (status, _) = get_json(&t.app, &format!("/download/{}", escaped)).await;
    assert_eq!(status, 404);

    for ext in ["err", "state", "pdf"] {
        assert!(victim.with_extension(ext).exists(), "{} was touched", ext);
    }
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    let t = spawn_app(FakeSummarizer::default());

    // No audio part
    let (status, json) = post_chunk(&t.app, chunk_body(Some("J6"), Some(3), "a.wav", b"")).await;
    assert_eq!(status, 400);
    assert!(json["error"].as_str().is_some());
    let (_, json) = get_json(&t.app, "/status/J6").await;
    assert_eq!(json["status"], "unknown", "state untouched");

    // Extension outside the allow-list
    let (status, _) = post_chunk(&t.app, chunk_body(Some("J7"), Some(3), "notes.exe", b"MZ!")).await;
    assert_eq!(status, 400);

    // Id that would escape the storage root
    let (status, _) = post_chunk(&t.app, chunk_body(Some("../J8"), Some(3), "a.wav", b"abc")).await;
    assert_eq!(status, 400);

    // Non-numeric total
    let body = String::from_utf8(chunk_body(Some("J9"), Some(3), "a.wav", b"abc"))
        .unwrap()
        .replace("\r\n\r\n3\r\n", "\r\n\r\nthree\r\n");
    let (status, _) = post_chunk(&t.app, body.into_bytes()).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_declared_total_over_limit() {
    let t = spawn_app(FakeSummarizer::default());
    let limit = t.state.config.max_upload_size;

    let (status, _) = post_chunk(
        &t.app,
        chunk_body(Some("big"), Some(limit + 1), "a.wav", b"abc"),
    )
    .await;
    assert_eq!(status, 413);
}

#[tokio::test]
async fn test_health_and_request_id() {
    let t = spawn_app(FakeSummarizer::default());

    let response = get(&t.app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let (_, json) = read_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["jobs_in_flight"], 0);
}

#[tokio::test]
async fn test_request_span_carries_assigned_id() {
    let t = spawn_app(FakeSummarizer::default());
    let ids = SpanRequestIds::default();
    let _guard = tracing_subscriber::registry().with(ids.clone()).set_default();

    let response = get(&t.app, "/health").await;
    let assigned = response.headers()["x-request-id"]
        .to_str()
        .unwrap()
        .to_string();
    assert_ne!(assigned, "unknown");

    assert_eq!(*ids.0.lock().unwrap(), vec![assigned]);
}
