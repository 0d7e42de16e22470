//! Connection lifecycle and inbound dispatch.
//!
//! The manager owns the `Disconnected -> Connecting -> Connected` state
//! machine. A successful open starts one liveness monitor and one pump task
//! that reads transport events for that session. Only a terminal transport
//! event returns the state to `Disconnected`; `close()` merely asks for it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use snapsolve_core::{EventSender, STATUS_CONFIG_ERROR};
use snapsolve_observability::{emit_event, ObservabilityEvent, ProcessKind};
use snapsolve_providers::{InferenceProvider, ObjectStore};
use snapsolve_types::{ConnectionState, WorkRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Level;

use crate::admission::AdmissionGuard;
use crate::config::HostConfig;
use crate::error::ChannelError;
use crate::executor::TaskExecutor;
use crate::liveness::{LivenessHandle, LivenessMonitor, MonitorState};
use crate::protocol::{parse_inbound, InboundMessage};
use crate::transport::{Connection, Connector, TransportEvent, TransportLink};
use crate::websocket::display_endpoint;

pub const STATUS_CONNECTING: &str = "Connecting WebSocket...";
pub const STATUS_CONNECTED: &str = "WebSocket Connected. Listening...";
pub const STATUS_DISCONNECTING: &str = "Disconnecting...";
pub const STATUS_DISCONNECTED: &str = "WebSocket Disconnected.";
pub const STATUS_TRANSPORT_ERROR: &str = "WebSocket Error: Check Logs";

const STATUS_KEY_CHARS: usize = 20;

#[derive(Default)]
struct Session {
    state: ConnectionState,
    id: u64,
    link: Option<Arc<dyn TransportLink>>,
    monitor: Option<LivenessHandle>,
    monitors_started: u64,
    close_requested: bool,
}

struct ManagerInner {
    config: HostConfig,
    connector: Arc<dyn Connector>,
    executor: TaskExecutor,
    admission: Arc<AdmissionGuard>,
    events: EventSender,
    session: Mutex<Session>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        config: HostConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn ObjectStore>,
        inference: Arc<dyn InferenceProvider>,
        events: EventSender,
    ) -> Self {
        let executor =
            TaskExecutor::new(store, inference, events.clone()).with_timeout(config.task_timeout);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                connector,
                executor,
                admission: AdmissionGuard::new(),
                events,
                session: Mutex::new(Session::default()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    pub fn is_busy(&self) -> bool {
        self.inner.admission.is_busy()
    }

    pub fn admission(&self) -> Arc<AdmissionGuard> {
        self.inner.admission.clone()
    }

    /// State of the current (or most recent) session's monitor.
    pub fn monitor_state(&self) -> Option<MonitorState> {
        self.inner.session.lock().monitor.as_ref().map(LivenessHandle::state)
    }

    /// Monitors started over the manager's lifetime.
    pub fn monitors_started(&self) -> u64 {
        self.inner.session.lock().monitors_started
    }

    /// Opens the connection. A no-op (with a warning) while connecting or
    /// connected. Invalid configuration is reported and returned without any
    /// state change.
    pub async fn open(&self) -> Result<(), ChannelError> {
        let inner = &self.inner;
        let (url, session_id) = {
            let mut session = inner.session.lock();
            if session.state.is_active() {
                inner.events.warn("Already connected.");
                return Ok(());
            }
            let url = match inner.config.validate().and_then(|_| inner.config.connect_url()) {
                Ok(url) => url,
                Err(e) => {
                    inner.events.error(format!("Cannot connect: {e}"));
                    inner.events.status(STATUS_CONFIG_ERROR);
                    return Err(e.into());
                }
            };
            session.state = ConnectionState::Connecting;
            session.id += 1;
            session.close_requested = false;
            (url, session.id)
        };

        inner.events.status(STATUS_CONNECTING);
        inner
            .events
            .info(format!("Connecting to {}...", display_endpoint(&url)));
        inner.observe(Level::INFO, "connection.connecting", ConnectionState::Connecting, None);

        let connection = match inner.connector.connect(&url).await {
            Ok(connection) => connection,
            Err(e) => {
                {
                    let mut session = inner.session.lock();
                    if session.id == session_id {
                        session.state = ConnectionState::Disconnected;
                    }
                }
                let detail = e.to_string();
                inner.events.error(format!("WebSocket Error: {detail}"));
                inner.events.connection_changed(false);
                inner.events.status(STATUS_TRANSPORT_ERROR);
                inner.observe(
                    Level::WARN,
                    "connection.failed",
                    ConnectionState::Disconnected,
                    Some(detail.as_str()),
                );
                return Err(e.into());
            }
        };

        let Connection { link, events } = connection;
        let close_now = {
            let mut session = inner.session.lock();
            session.state = ConnectionState::Connected;
            session.link = Some(link.clone());
            if let Some(old) = session.monitor.take() {
                old.stop();
            }
            session.monitor = Some(
                LivenessMonitor::new(
                    link.clone(),
                    inner.config.ping_interval,
                    inner.config.ping_timeout,
                    inner.events.clone(),
                )
                .start(),
            );
            session.monitors_started += 1;
            session.close_requested
        };

        inner.events.info("WebSocket connection opened.");
        inner.events.connection_changed(true);
        inner.events.status(STATUS_CONNECTED);
        inner.observe(Level::INFO, "connection.open", ConnectionState::Connected, None);

        tokio::spawn(pump(self.inner.clone(), session_id, events));

        if close_now {
            self.close();
        }
        Ok(())
    }

    /// Asks the transport to close. A no-op (with a warning) while
    /// disconnected. The switch to `Disconnected` happens when the transport
    /// reports the close.
    pub fn close(&self) {
        let inner = &self.inner;
        let link = {
            let mut session = inner.session.lock();
            match session.state {
                ConnectionState::Disconnected => {
                    inner.events.warn("Not currently connected.");
                    return;
                }
                ConnectionState::Connecting => {
                    session.close_requested = true;
                    None
                }
                ConnectionState::Connected => {
                    session.close_requested = true;
                    if let Some(monitor) = session.monitor.as_ref() {
                        monitor.stop();
                    }
                    session.link.clone()
                }
            }
        };
        inner.events.status(STATUS_DISCONNECTING);
        if let Some(link) = link {
            link.close();
        }
    }

    /// Presentation-facing open: runs on its own task so the caller never
    /// waits on the handshake.
    pub fn request_open(&self) -> JoinHandle<Result<(), ChannelError>> {
        let manager = self.clone();
        tokio::spawn(async move { manager.open().await })
    }

    pub fn request_close(&self) {
        self.close();
    }

    /// Close, give the in-flight task up to `grace` to finish, then stop the
    /// monitor and drop the transport.
    pub async fn shutdown(&self, grace: Duration) {
        if self.state() != ConnectionState::Disconnected {
            self.close();
        }
        if !self.inner.admission.wait_idle(grace).await {
            self.inner
                .events
                .warn("Task still running after shutdown grace period.");
        }
        let (monitor, link) = {
            let mut session = self.inner.session.lock();
            (session.monitor.take(), session.link.take())
        };
        if let Some(monitor) = monitor {
            monitor.stop();
        }
        drop(link);
    }

    /// Dispatches one inbound text frame. Exposed for the pump and for tests.
    pub fn handle_message(&self, text: &str) {
        self.inner.handle_message(text);
    }
}

async fn pump(
    inner: Arc<ManagerInner>,
    session_id: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(text) => inner.handle_message(&text),
            terminal => {
                inner.handle_terminal(session_id, terminal);
                return;
            }
        }
    }
    inner.handle_terminal(
        session_id,
        TransportEvent::Closed {
            code: None,
            reason: "transport dropped".to_string(),
        },
    );
}

impl ManagerInner {
    fn observe(&self, level: Level, event: &str, state: ConnectionState, detail: Option<&str>) {
        emit_event(
            level,
            ProcessKind::Host,
            ObservabilityEvent {
                event,
                component: "connection",
                connection_state: Some(state.as_str()),
                detail,
                ..Default::default()
            },
        );
    }

    fn handle_terminal(&self, session_id: u64, event: TransportEvent) {
        {
            let mut session = self.session.lock();
            if session.id != session_id || session.state == ConnectionState::Disconnected {
                return;
            }
            session.state = ConnectionState::Disconnected;
            session.link = None;
            session.close_requested = false;
            if let Some(monitor) = session.monitor.as_ref() {
                monitor.stop();
            }
        }

        let status = match &event {
            TransportEvent::Error(detail) => {
                self.events.error(format!("WebSocket Error: {detail}"));
                self.observe(
                    Level::WARN,
                    "connection.error",
                    ConnectionState::Disconnected,
                    Some(detail.as_str()),
                );
                STATUS_TRANSPORT_ERROR
            }
            TransportEvent::Closed { code, reason } => {
                let code = code.map_or_else(|| "none".to_string(), |c| c.to_string());
                self.events
                    .info(format!("WebSocket closed. Code: {code}, Reason: {reason}"));
                self.observe(
                    Level::INFO,
                    "connection.closed",
                    ConnectionState::Disconnected,
                    Some(reason.as_str()),
                );
                STATUS_DISCONNECTED
            }
            TransportEvent::Message(_) => STATUS_DISCONNECTED,
        };
        self.events.connection_changed(false);
        self.events.status(status);
    }

    fn handle_message(&self, text: &str) {
        match parse_inbound(text) {
            Ok(InboundMessage::ProcessImage { key, bucket }) => self.admit(key, bucket),
            Ok(InboundMessage::Error { message }) => {
                self.events
                    .error(format!("Error relayed via channel: {message}"));
            }
            Ok(InboundMessage::Other { action }) => {
                self.events.warn(format!("Unhandled action: {action}"));
            }
            Err(e) => self.events.warn(format!("Dropping inbound message: {e}")),
        }
    }

    fn admit(&self, key: Option<String>, bucket: Option<String>) {
        if self.admission.is_busy() {
            self.events.warn("Already processing, ignoring.");
            return;
        }
        let Some(key) = key else {
            self.events.error("processS3Image message has no s3Key.");
            return;
        };
        let Some(bucket) = bucket.or_else(|| self.config.default_bucket.clone()) else {
            self.events
                .error(format!("No bucket for s3Key {key} and no default bucket configured."));
            return;
        };
        let Some(permit) = self.admission.try_acquire() else {
            self.events.warn("Already processing, ignoring.");
            return;
        };

        let request = WorkRequest::new(bucket, key);
        self.events
            .info(format!("Accepted {} ({})", request.locator(), request.request_id));
        let short: String = request.key.chars().take(STATUS_KEY_CHARS).collect();
        self.events.status(format!("Processing S3: {short}..."));
        self.executor.spawn(request, permit);
    }
}
