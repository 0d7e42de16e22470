mod support;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use snapsolve_core::{ClipboardSink, ConsumerLoop, HostState, NullPresenter};
use snapsolve_types::{ConnectionState, HostEvent, LogLevel, TaskResult};
use support::fakes::FakeInference;
use support::{eventually, process_image, test_config, Harness};

#[tokio::test]
async fn answer_scenario_uses_default_bucket() {
    let mut h = Harness::new();
    h.open().await;

    h.connector.last_link().inject(process_image("q1.png"));
    let result = h.wait_for_result().await;

    assert_eq!(result, Some(TaskResult::Answer("B".into())));
    assert_eq!(
        h.store.fetched.lock().clone(),
        vec![("exam-bucket".to_string(), "q1.png".to_string())]
    );
    assert!(h
        .statuses()
        .contains(&"Processing S3: q1.png...".to_string()));
    assert!(eventually(|| !h.manager.is_busy()).await);
}

#[tokio::test]
async fn missing_object_fails_without_inference() {
    let mut h = Harness::new();
    h.open().await;

    h.connector.last_link().inject(process_image("nope.png"));
    let result = h.wait_for_result().await;

    assert!(matches!(result, Some(TaskResult::Failure(ref reason)) if reason.contains("not found")));
    assert_eq!(h.inference.calls.load(Ordering::SeqCst), 0);
    assert!(eventually(|| !h.manager.is_busy()).await);

    // guard is reusable after a failure
    h.connector.last_link().inject(process_image("q1.png"));
    assert_eq!(h.wait_for_result().await, Some(TaskResult::Answer("B".into())));
}

#[tokio::test]
async fn inference_failure_frees_the_guard_for_the_next_request() {
    let mut h = Harness::with(test_config(), FakeInference::rejecting(1, "D"));
    h.open().await;

    h.connector.last_link().inject(process_image("q1.png"));
    let result = h.wait_for_result().await;

    assert!(matches!(result, Some(TaskResult::Failure(ref reason)) if reason.contains("quota exceeded")));
    assert!(eventually(|| !h.manager.is_busy()).await);
    assert_eq!(h.results().len(), 1);
    assert_eq!(h.logged(LogLevel::Error, "Inference failed"), 1);

    h.connector.last_link().inject(process_image("q1.png"));
    assert_eq!(h.wait_for_result().await, Some(TaskResult::Answer("D".into())));
    assert_eq!(h.inference.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.logged(LogLevel::Warn, "Already processing"), 0);
}

#[tokio::test]
async fn second_submission_while_busy_is_dropped() {
    let mut h = Harness::with(
        test_config(),
        FakeInference::slow("B", Duration::from_millis(150)),
    );
    h.open().await;
    let link = h.connector.last_link();

    link.inject(process_image("q1.png"));
    link.inject(process_image("q1.png"));
    assert_eq!(h.wait_for_result().await, Some(TaskResult::Answer("B".into())));
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.collect();

    assert_eq!(h.results().len(), 1);
    assert_eq!(h.inference.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.logged(LogLevel::Warn, "Already processing, ignoring"), 1);

    // a later submission after the completion is admitted again
    link.inject(process_image("q1.png"));
    assert_eq!(h.wait_for_result().await, Some(TaskResult::Answer("B".into())));
    assert_eq!(h.inference.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn explicit_bucket_overrides_the_default() {
    let mut h = Harness::new();
    h.open().await;

    h.connector.last_link().inject(
        serde_json::json!({
            "action": "processS3Image",
            "s3Key": "q1.png",
            "s3Bucket": "other-bucket"
        })
        .to_string(),
    );
    let result = h.wait_for_result().await;

    assert!(matches!(result, Some(TaskResult::Failure(_))));
    assert_eq!(
        h.store.fetched.lock().clone(),
        vec![("other-bucket".to_string(), "q1.png".to_string())]
    );
}

#[tokio::test]
async fn malformed_payloads_change_nothing() {
    let mut h = Harness::new();
    h.open().await;

    for payload in [
        "not json at all",
        "[1, 2, 3]",
        r#"{"s3Key":"q1.png"}"#,
        r#"{"action":"processS3Image"}"#,
        r#"{"action":"processS3Image","s3Key":""}"#,
    ] {
        h.manager.handle_message(payload);
        assert!(!h.manager.is_busy());
    }
    h.manager
        .handle_message(r#"{"action":"error","message":"bad token"}"#);
    h.manager.handle_message(r#"{"action":"somethingElse"}"#);
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.collect();

    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert!(h.results().is_empty());
    assert!(h.store.fetched.lock().is_empty());
    assert_eq!(h.logged(LogLevel::Warn, "Dropping inbound message"), 3);
    assert_eq!(h.logged(LogLevel::Error, "no s3Key"), 2);
    assert_eq!(h.logged(LogLevel::Error, "Error relayed via channel: bad token"), 1);
    assert_eq!(h.logged(LogLevel::Warn, "Unhandled action: somethingElse"), 1);
}

#[tokio::test]
async fn close_does_not_cancel_an_inflight_task() {
    let mut h = Harness::with(
        test_config(),
        FakeInference::slow("C", Duration::from_millis(100)),
    );
    h.open().await;

    h.connector.last_link().inject(process_image("q1.png"));
    assert!(eventually(|| h.manager.is_busy()).await);
    h.manager.close();
    h.wait_disconnected().await;

    assert_eq!(h.wait_for_result().await, Some(TaskResult::Answer("C".into())));
    assert!(!h.manager.is_busy());

    let disconnect_at = h
        .seen
        .iter()
        .position(|e| matches!(e, HostEvent::ConnectionChanged { connected: false }));
    let result_at = h
        .seen
        .iter()
        .position(|e| matches!(e, HostEvent::TaskCompleted { .. }));
    assert!(disconnect_at < result_at);
}

#[tokio::test]
async fn shutdown_waits_for_the_inflight_task() {
    let mut h = Harness::with(
        test_config(),
        FakeInference::slow("A", Duration::from_millis(80)),
    );
    h.open().await;
    h.connector.last_link().inject(process_image("q1.png"));
    assert!(eventually(|| h.manager.is_busy()).await);

    h.manager.shutdown(Duration::from_secs(2)).await;

    assert!(!h.manager.is_busy());
    h.collect();
    assert_eq!(h.results(), vec![TaskResult::Answer("A".into())]);
}

#[derive(Clone, Default)]
struct SharedClipboard(Arc<Mutex<Vec<String>>>);

impl ClipboardSink for SharedClipboard {
    fn copy_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn consumer_applies_results_and_copies_answer() {
    let (tx, rx) = snapsolve_core::event_channel();
    let connector = Arc::new(support::fakes::FakeConnector::default());
    let manager = snapsolve_channels::ConnectionManager::new(
        test_config(),
        connector.clone(),
        Arc::new(support::fakes::FakeStore::with_object("exam-bucket", "q1.png")),
        Arc::new(FakeInference::answering("B")),
        tx,
    );
    let clipboard = SharedClipboard::default();
    let mut consumer = ConsumerLoop::new(
        rx,
        HostState::new(true),
        Box::new(clipboard.clone()),
        Box::new(NullPresenter),
    );

    manager.open().await.expect("open");
    connector.last_link().inject(process_image("q1.png"));
    assert!(eventually(|| {
        consumer.drain_pending();
        consumer.state().last_result.is_some()
    })
    .await);

    let state = consumer.state();
    assert!(state.connected);
    assert!(!state.can_connect());
    assert!(state.can_disconnect());
    assert_eq!(state.status, "Ready. Listening...");
    assert_eq!(state.last_result_text().as_deref(), Some("B"));
    assert_eq!(*clipboard.0.lock().unwrap(), vec!["B".to_string()]);
}
