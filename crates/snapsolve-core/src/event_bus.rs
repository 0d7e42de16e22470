use tokio::sync::mpsc;

use snapsolve_types::{HostEvent, LogEntry, LogLevel, TaskResult};

/// Producer half of the host event channel. Cheap to clone, never blocks.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<HostEvent>,
}

/// Consumer half. Exactly one exists per channel.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<HostEvent>,
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

impl EventSender {
    /// Returns `false` once the consumer is gone.
    pub fn publish(&self, event: HostEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn log(&self, level: LogLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            LogLevel::Debug => tracing::debug!(target: "snapsolve.events", "{text}"),
            LogLevel::Info => tracing::info!(target: "snapsolve.events", "{text}"),
            LogLevel::Warn => tracing::warn!(target: "snapsolve.events", "{text}"),
            LogLevel::Error => tracing::error!(target: "snapsolve.events", "{text}"),
        }
        self.publish(HostEvent::Log(LogEntry::new(level, text)));
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.log(LogLevel::Debug, text);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.log(LogLevel::Info, text);
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.log(LogLevel::Warn, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.log(LogLevel::Error, text);
    }

    pub fn status(&self, text: impl Into<String>) {
        self.publish(HostEvent::Status { text: text.into() });
    }

    pub fn connection_changed(&self, connected: bool) {
        self.publish(HostEvent::ConnectionChanged { connected });
    }

    pub fn task_completed(&self, result: TaskResult) {
        self.publish(HostEvent::TaskCompleted { result });
    }
}

impl EventReceiver {
    pub fn try_recv(&mut self) -> Option<HostEvent> {
        self.rx.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<HostEvent> {
        self.rx.recv().await
    }

    /// Everything queued right now, in enqueue order.
    pub fn drain(&mut self) -> Vec<HostEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.try_recv() {
            out.push(event);
        }
        out
    }
}
