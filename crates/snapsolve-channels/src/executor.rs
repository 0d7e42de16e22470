use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use snapsolve_core::EventSender;
use snapsolve_observability::{emit_event, snippet, ObservabilityEvent, ProcessKind};
use snapsolve_providers::{InferenceProvider, ObjectStore, ANSWER_PROMPT};
use snapsolve_types::{TaskResult, WorkRequest};
use tokio::task::JoinHandle;
use tracing::Level;

use crate::admission::AdmissionPermit;

const ANSWER_LOG_CHARS: usize = 100;

/// Runs one admitted request: fetch the image, infer, publish the result.
#[derive(Clone)]
pub struct TaskExecutor {
    store: Arc<dyn ObjectStore>,
    inference: Arc<dyn InferenceProvider>,
    events: EventSender,
    prompt: String,
    timeout: Option<Duration>,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        inference: Arc<dyn InferenceProvider>,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            inference,
            events,
            prompt: ANSWER_PROMPT.to_string(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the request on its own task. The permit travels with it.
    pub fn spawn(&self, request: WorkRequest, permit: AdmissionPermit) -> JoinHandle<TaskResult> {
        let executor = self.clone();
        tokio::spawn(async move { executor.run(request, permit).await })
    }

    /// Emits exactly one `TaskCompleted`, then releases `permit`.
    pub async fn run(&self, request: WorkRequest, permit: AdmissionPermit) -> TaskResult {
        emit_event(
            Level::INFO,
            ProcessKind::Host,
            ObservabilityEvent {
                event: "task.start",
                component: "executor",
                request_id: Some(request.request_id.as_str()),
                bucket: Some(request.bucket.as_str()),
                key: Some(request.key.as_str()),
                model_id: Some(self.inference.model_id()),
                ..Default::default()
            },
        );

        let result = match AssertUnwindSafe(self.bounded(&request)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(&*panic);
                self.events
                    .error(format!("Task for {} crashed: {reason}", request.locator()));
                TaskResult::Failure(format!("unexpected error: {reason}"))
            }
        };

        let (level, event, detail) = match &result {
            TaskResult::Answer(_) => (Level::INFO, "task.answer", None),
            TaskResult::Failure(reason) => (Level::WARN, "task.failure", Some(reason.as_str())),
        };
        emit_event(
            level,
            ProcessKind::Host,
            ObservabilityEvent {
                event,
                component: "executor",
                request_id: Some(request.request_id.as_str()),
                bucket: Some(request.bucket.as_str()),
                key: Some(request.key.as_str()),
                detail,
                ..Default::default()
            },
        );

        self.events.task_completed(result.clone());
        drop(permit);
        result
    }

    async fn bounded(&self, request: &WorkRequest) -> TaskResult {
        let Some(limit) = self.timeout else {
            return self.execute(request).await;
        };
        match tokio::time::timeout(limit, self.execute(request)).await {
            Ok(result) => result,
            Err(_) => {
                self.events
                    .error(format!("Task for {} timed out after {limit:?}", request.locator()));
                TaskResult::Failure(format!("timed out after {}s", limit.as_secs()))
            }
        }
    }

    async fn execute(&self, request: &WorkRequest) -> TaskResult {
        self.events
            .info(format!("Downloading {} via {}...", request.locator(), self.store.name()));
        let image = match self.store.fetch(&request.bucket, &request.key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.events.error(format!("Fetch failed: {e}"));
                return TaskResult::Failure(e.to_string());
            }
        };
        self.events
            .info(format!("Downloaded {} bytes. Sending to {}...", image.len(), self.inference.model_id()));

        match self.inference.infer(&image, &self.prompt).await {
            Ok(answer) => {
                self.events
                    .info(format!("Answer: {}", snippet(&answer, ANSWER_LOG_CHARS)));
                TaskResult::Answer(answer)
            }
            Err(e) => {
                self.events.error(format!("Inference failed: {e}"));
                TaskResult::Failure(e.to_string())
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "task panicked".to_string()
    }
}
