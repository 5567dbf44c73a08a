//! End-to-end job lifecycle through queue, runner, registry and streaming

mod common;

use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;

use common::{engine, extraction_calls, test_config, wait_terminal, GatedExtractor, ScriptedExtractor, AGREEMENT};
use extract_jobs::processing::{
    Document, DocumentContent, JobErrorKind, JobEventKind, JobOptions, JobStatus, StageKind,
};
use extract_jobs::providers::{ArtifactStore, StageOutput};
use extract_jobs::streaming::{self, StreamFrame};
use extract_jobs::Error;

#[tokio::test]
async fn completed_job_reports_monotone_progress_and_partials() {
    let extractor = ScriptedExtractor::new(vec![]);
    let engine = engine(extractor.clone(), &test_config());

    let job = engine
        .queue
        .submit(Some("client-a".into()), Document::text("loan.txt", AGREEMENT), JobOptions::default())
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    let job = wait_terminal(&engine.registry, job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    let percents: Vec<u8> = engine
        .registry
        .events_since(job.id, 0)
        .unwrap()
        .into_iter()
        .filter_map(|e| match e.kind {
            JobEventKind::Progress(p) => Some(p.percent),
            _ => None,
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));

    let sections: Vec<String> = engine
        .registry
        .partial_results(job.id)
        .unwrap()
        .into_iter()
        .map(|p| p.section)
        .collect();
    assert_eq!(sections, vec!["parties", "terms", "payment_schedule", "signatures"]);

    // Section hints come from the locator
    let calls = extractor.calls();
    assert_eq!(extraction_calls(&calls), 4);
    assert!(calls.iter().all(|c| c.section_offset.is_some()));

    let artifact_ref = engine.registry.get_result(job.id).unwrap().unwrap();
    let artifact = engine.artifacts.get(&artifact_ref).await.unwrap().unwrap();
    assert_eq!(artifact["job_id"], json!(job.id));
    assert_eq!(artifact["sections"]["terms"]["section"], json!("terms"));
    assert_eq!(artifact["sizing"]["was_truncated"], json!(false));
}

#[tokio::test]
async fn selected_sections_only() {
    let extractor = ScriptedExtractor::new(vec![]);
    let engine = engine(extractor.clone(), &test_config());

    let options = JobOptions {
        sections: Some(vec!["terms".into()]),
    };
    let job = engine
        .queue
        .submit(None, Document::text("loan.txt", AGREEMENT), options)
        .await
        .unwrap();
    let job = wait_terminal(&engine.registry, job.id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(extraction_calls(&extractor.calls()), 1);
    assert_eq!(engine.registry.partial_results(job.id).unwrap().len(), 1);
}

#[tokio::test]
async fn oversized_text_is_sized_before_extraction() {
    let extractor = ScriptedExtractor::new(vec![]);
    let mut config = test_config();
    config.sizing.budget_chars = 1_000;
    let engine = engine(extractor.clone(), &config);

    let text = format!("{}{}", AGREEMENT, "x".repeat(10_000));
    let job = engine
        .queue
        .submit(None, Document::text("long.txt", text), JobOptions::default())
        .await
        .unwrap();
    let job = wait_terminal(&engine.registry, job.id).await;
    assert_eq!(job.status, JobStatus::Completed);

    for call in extractor.calls() {
        let sent = call.text.unwrap();
        assert!(sent.chars().count() <= 1_000);
    }
    let artifact_ref = job.result.unwrap();
    let artifact = engine.artifacts.get(&artifact_ref).await.unwrap().unwrap();
    assert_eq!(artifact["sizing"]["was_truncated"], json!(true));
    assert_eq!(artifact["sizing"]["method"], json!("smart"));
}

#[tokio::test]
async fn scanned_document_uses_recognition() {
    let extractor = ScriptedExtractor::new(vec![
        Ok(StageOutput::default()),
        Err(Error::transient("recognizer busy")),
        Ok(StageOutput::text(AGREEMENT)),
    ]);
    let engine = engine(extractor.clone(), &test_config());

    let document = Document {
        filename: "scan.tiff".into(),
        mime_type: "image/tiff".into(),
        content: DocumentContent::Binary(vec![0x49, 0x49, 0x2a, 0x00]),
    };
    let job = engine
        .queue
        .submit(None, document, JobOptions::default())
        .await
        .unwrap();
    let job = wait_terminal(&engine.registry, job.id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let calls = extractor.calls();
    assert_eq!(calls[0].stage, StageKind::Acquisition);
    assert!(calls[0].content_base64.is_some());
    assert_eq!((calls[1].stage, calls[1].attempt), (StageKind::Recognition, 1));
    assert_eq!((calls[2].stage, calls[2].attempt), (StageKind::Recognition, 2));
    assert_eq!(calls[3].text.as_deref(), Some(AGREEMENT));
}

#[tokio::test]
async fn terminal_failure_keeps_earlier_partials() {
    let extractor = ScriptedExtractor::new(vec![
        Ok(StageOutput::data(json!({"lender": "Acme Bank"}))),
        Ok(StageOutput::data(json!({"rate": "5%"}))),
        Err(Error::terminal("schedule table unreadable")),
    ]);
    let engine = engine(extractor, &test_config());

    let job = engine
        .queue
        .submit(None, Document::text("loan.txt", AGREEMENT), JobOptions::default())
        .await
        .unwrap();
    let job = wait_terminal(&engine.registry, job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::Upstream);
    assert_eq!(error.stage, Some(StageKind::Extraction));
    assert!(!error.retryable);

    let partials = engine.registry.partial_results(job.id).unwrap();
    assert_eq!(partials.len(), 2);
    assert_eq!(partials[1].data, json!({"rate": "5%"}));
    assert_eq!(engine.registry.get_result(job.id).unwrap(), None);
}

#[tokio::test]
async fn cancel_while_queued_never_runs() {
    let extractor = GatedExtractor::new();
    let mut config = test_config();
    config.pipeline.max_concurrent_jobs = 1;
    let engine = engine(extractor.clone(), &config);

    let first = engine
        .queue
        .submit(None, Document::text("a.txt", AGREEMENT), JobOptions::default())
        .await
        .unwrap();
    extractor.wait_started(1).await;

    let second = engine
        .queue
        .submit(None, Document::text("b.txt", AGREEMENT), JobOptions::default())
        .await
        .unwrap();
    let ack = engine.registry.request_cancellation(second.id, Some("ops")).unwrap();
    assert!(!ack.already_requested);
    assert_eq!(ack.status, JobStatus::Queued);

    let second = wait_terminal(&engine.registry, second.id).await;
    assert_eq!(second.status, JobStatus::Cancelled);
    assert!(second.started_at.is_none());

    extractor.open();
    let first = wait_terminal(&engine.registry, first.id).await;
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(extractor.started(), 4);
}

#[tokio::test]
async fn cancel_while_running_stops_at_next_checkpoint() {
    let extractor = GatedExtractor::new();
    let engine = engine(extractor.clone(), &test_config());

    let job = engine
        .queue
        .submit(None, Document::text("a.txt", AGREEMENT), JobOptions::default())
        .await
        .unwrap();
    extractor.wait_started(1).await;

    let first = engine.registry.request_cancellation(job.id, None).unwrap();
    let second = engine.registry.request_cancellation(job.id, None).unwrap();
    assert!(!first.already_requested);
    assert!(second.already_requested);
    assert_eq!(second.status, JobStatus::Running);

    // The in-flight call is never aborted
    extractor.release(1);
    let job = wait_terminal(&engine.registry, job.id).await;

    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.error.is_none());
    assert_eq!(extractor.started(), 1);
    assert_eq!(engine.registry.partial_results(job.id).unwrap().len(), 1);

    assert!(matches!(
        engine.registry.request_cancellation(job.id, None),
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn stream_delivers_frames_in_order_and_ends() {
    let extractor = GatedExtractor::new();
    let engine = engine(extractor.clone(), &test_config());
    let registry = Arc::clone(&engine.registry);

    let job = engine
        .queue
        .submit(None, Document::text("a.txt", AGREEMENT), JobOptions::default())
        .await
        .unwrap();
    let stream = streaming::subscribe(&registry, job.id).unwrap();
    extractor.open();

    let frames: Vec<StreamFrame> = stream.collect().await;
    let last = frames.last().unwrap();
    assert!(matches!(
        last,
        StreamFrame::FinalResult { status: JobStatus::Completed, result: Some(_), error: None }
    ));
    assert_eq!(frames.iter().filter(|f| f.is_final()).count(), 1);

    let partials: Vec<&str> = frames
        .iter()
        .filter_map(|f| match f {
            StreamFrame::PartialResult { section, .. } => Some(section.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(partials, vec!["parties", "terms", "payment_schedule", "signatures"]);

    // A later subscriber sees the same log
    let replay: Vec<StreamFrame> = streaming::subscribe(&registry, job.id)
        .unwrap()
        .collect()
        .await;
    assert_eq!(replay, frames);
}

#[tokio::test]
async fn dropped_subscriber_does_not_affect_the_job() {
    let extractor = GatedExtractor::new();
    let engine = engine(extractor.clone(), &test_config());
    let registry = Arc::clone(&engine.registry);

    let job = engine
        .queue
        .submit(None, Document::text("a.txt", AGREEMENT), JobOptions::default())
        .await
        .unwrap();
    let mut stream = streaming::subscribe(&registry, job.id).unwrap();
    extractor.release(1);
    let first = stream.next().await.unwrap();
    assert_eq!(first.event_name(), "progress");
    drop(stream);

    extractor.open();
    let job = streaming::wait_for_final(&registry, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}
