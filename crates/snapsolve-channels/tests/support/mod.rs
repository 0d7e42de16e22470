#![allow(dead_code)]

pub mod fakes;

use std::sync::Arc;
use std::time::Duration;

use snapsolve_channels::{ConnectionManager, HostConfig};
use snapsolve_core::{event_channel, EventReceiver};
use snapsolve_types::{HostEvent, LogLevel, TaskResult};

use fakes::{FakeConnector, FakeInference, FakeStore};

pub const WAIT: Duration = Duration::from_secs(3);

pub fn test_config() -> HostConfig {
    HostConfig {
        endpoint_url: Some("wss://example.test/prod".to_string()),
        shared_secret: Some("s3cret".to_string()),
        default_bucket: Some("exam-bucket".to_string()),
        openai: snapsolve_providers::OpenAIConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        },
        ping_interval: Duration::from_secs(60),
        ping_timeout: Duration::from_secs(10),
        shutdown_grace: Duration::from_millis(500),
        ..Default::default()
    }
}

/// Manager wired to fakes, plus everything it published so far.
pub struct Harness {
    pub manager: ConnectionManager,
    pub connector: Arc<FakeConnector>,
    pub store: Arc<FakeStore>,
    pub inference: Arc<FakeInference>,
    rx: EventReceiver,
    pub seen: Vec<HostEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), FakeInference::answering("B"))
    }

    pub fn with(config: HostConfig, inference: FakeInference) -> Self {
        let (tx, rx) = event_channel();
        let connector = Arc::new(FakeConnector::default());
        let store = Arc::new(FakeStore::with_object("exam-bucket", "q1.png"));
        let inference = Arc::new(inference);
        let manager = ConnectionManager::new(
            config,
            connector.clone(),
            store.clone(),
            inference.clone(),
            tx,
        );
        Self {
            manager,
            connector,
            store,
            inference,
            rx,
            seen: Vec::new(),
        }
    }

    pub fn collect(&mut self) {
        self.seen.extend(self.rx.drain());
    }

    /// Receives events until one matches `pred` or [`WAIT`] elapses.
    pub async fn wait_for<F>(&mut self, pred: F) -> bool
    where
        F: Fn(&HostEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(event)) => {
                    let hit = pred(&event);
                    self.seen.push(event);
                    if hit {
                        return true;
                    }
                }
                _ => return false,
            }
        }
    }

    pub async fn wait_for_result(&mut self) -> Option<TaskResult> {
        let before = self.results().len();
        let found = self
            .wait_for(|e| matches!(e, HostEvent::TaskCompleted { .. }))
            .await;
        if !found {
            return None;
        }
        self.results().into_iter().nth(before)
    }

    pub fn results(&self) -> Vec<TaskResult> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                HostEvent::TaskCompleted { result } => Some(result.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn connection_changes(&self) -> Vec<bool> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                HostEvent::ConnectionChanged { connected } => Some(*connected),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                HostEvent::Status { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn logged(&self, level: LogLevel, needle: &str) -> usize {
        self.seen
            .iter()
            .filter(|e| matches!(e, HostEvent::Log(entry) if entry.level == level && entry.text.contains(needle)))
            .count()
    }

    /// Opens and receives through the status that follows `connected: true`.
    pub async fn open(&mut self) {
        self.manager.open().await.expect("open");
        assert!(
            self.wait_for(|e| matches!(e, HostEvent::ConnectionChanged { connected: true }))
                .await
        );
        assert!(self.wait_for(is_status).await, "no status after connect");
    }

    /// Receives through the disconnect and the status published right after it.
    pub async fn wait_disconnected(&mut self) {
        assert!(
            self.wait_for(|e| matches!(e, HostEvent::ConnectionChanged { connected: false }))
                .await,
            "no disconnect event"
        );
        assert!(self.wait_for(is_status).await, "no status after disconnect");
    }
}

fn is_status(event: &HostEvent) -> bool {
    matches!(event, HostEvent::Status { .. })
}

pub fn process_image(key: &str) -> String {
    serde_json::json!({ "action": "processS3Image", "s3Key": key }).to_string()
}

pub async fn eventually<F>(mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
