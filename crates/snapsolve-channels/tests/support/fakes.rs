use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use snapsolve_channels::{Connection, Connector, TransportError, TransportEvent, TransportLink};
use snapsolve_providers::{InferenceError, InferenceProvider, ObjectStore, StorageError};
use tokio::sync::mpsc;

/// In-memory link. The test plays the server through `inject`/`fail`.
pub struct FakeLink {
    open: AtomicBool,
    pub pings: AtomicUsize,
    pub close_calls: AtomicUsize,
    last: Mutex<Instant>,
    tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl FakeLink {
    fn new(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            open: AtomicBool::new(true),
            pings: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            last: Mutex::new(Instant::now()),
            tx: Mutex::new(Some(tx)),
        }
    }

    pub fn inject(&self, text: impl Into<String>) {
        *self.last.lock() = Instant::now();
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(TransportEvent::Message(text.into()));
        }
    }

    /// Ends the stream with `event`, as the reader task would.
    pub fn finish(&self, event: TransportEvent) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(event);
        }
    }

    pub fn fail(&self, detail: &str) {
        self.finish(TransportEvent::Error(detail.to_string()));
    }
}

impl TransportLink for FakeLink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_ping(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Instant::now();
        Ok(())
    }

    fn last_activity(&self) -> Instant {
        *self.last.lock()
    }

    /// The fake peer acknowledges immediately with a normal close.
    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.finish(TransportEvent::Closed {
            code: Some(1000),
            reason: "client requested close".to_string(),
        });
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub links: Mutex<Vec<Arc<FakeLink>>>,
    pub urls: Mutex<Vec<String>>,
    pub fail_with: Mutex<Option<String>>,
}

impl FakeConnector {
    pub fn connects(&self) -> usize {
        self.urls.lock().len()
    }

    pub fn link(&self, index: usize) -> Arc<FakeLink> {
        self.links.lock()[index].clone()
    }

    pub fn last_link(&self) -> Arc<FakeLink> {
        self.links.lock().last().cloned().expect("no connection yet")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
        self.urls.lock().push(url.to_string());
        if let Some(detail) = self.fail_with.lock().clone() {
            return Err(TransportError::Connect(detail));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(FakeLink::new(tx));
        self.links.lock().push(link.clone());
        Ok(Connection {
            link,
            events: rx,
        })
    }
}

pub struct FakeStore {
    objects: HashMap<(String, String), Vec<u8>>,
    pub fetched: Mutex<Vec<(String, String)>>,
}

impl FakeStore {
    pub fn with_object(bucket: &str, key: &str) -> Self {
        let mut objects = HashMap::new();
        objects.insert(
            (bucket.to_string(), key.to_string()),
            b"\x89PNG\r\n\x1a\nfake".to_vec(),
        );
        Self {
            objects,
            fetched: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.fetched
            .lock()
            .push((bucket.to_string(), key.to_string()));
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

pub struct FakeInference {
    answer: String,
    delay: Duration,
    rejections: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeInference {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            delay: Duration::ZERO,
            rejections: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Rejects the first `times` calls, then answers.
    pub fn rejecting(times: usize, answer: &str) -> Self {
        Self {
            rejections: AtomicUsize::new(times),
            ..Self::answering(answer)
        }
    }

    pub fn slow(answer: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::answering(answer)
        }
    }
}

#[async_trait]
impl InferenceProvider for FakeInference {
    fn model_id(&self) -> &str {
        "fake-vision"
    }

    async fn infer(&self, _image: &[u8], _prompt: &str) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let rejected = self
            .rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(InferenceError::Provider("quota exceeded".to_string()));
        }
        Ok(self.answer.clone())
    }
}
