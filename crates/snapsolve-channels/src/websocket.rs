//! Websocket transport on top of `tokio-tungstenite`.
//!
//! `connect` performs the handshake, splits the stream and spawns two tasks:
//! a writer that serialises ping/close commands, and a reader that forwards
//! text frames and finishes with exactly one terminal event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::{Connection, Connector, TransportEvent, TransportLink};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const CLOSE_HANDSHAKE_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum LinkCommand {
    Ping,
    Close,
}

struct LinkShared {
    open: AtomicBool,
    close_requested: AtomicBool,
    closing: Notify,
    last_activity: Mutex<Instant>,
}

impl LinkShared {
    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

pub struct WebSocketLink {
    shared: Arc<LinkShared>,
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl TransportLink for WebSocketLink {
    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn send_ping(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.commands
            .send(LinkCommand::Ping)
            .map_err(|_| TransportError::Closed)
    }

    fn last_activity(&self) -> Instant {
        *self.shared.last_activity.lock()
    }

    fn close(&self) {
        if self.shared.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.open.store(false, Ordering::SeqCst);
        let _ = self.commands.send(LinkCommand::Close);
        self.shared.closing.notify_one();
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Endpoint without its query string, safe to log.
pub fn display_endpoint(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
        info!("Connecting to {}", display_endpoint(url));
        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| TransportError::Timeout(self.connect_timeout))?
                .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (write, read) = stream.split();
        let shared = Arc::new(LinkShared {
            open: AtomicBool::new(true),
            close_requested: AtomicBool::new(false),
            closing: Notify::new(),
            last_activity: Mutex::new(Instant::now()),
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(write, command_rx, shared.clone()));
        tokio::spawn(read_loop(read, event_tx, shared.clone(), CLOSE_HANDSHAKE_WAIT));

        Ok(Connection {
            link: Arc::new(WebSocketLink {
                shared,
                commands: command_tx,
            }),
            events: event_rx,
        })
    }
}

async fn write_loop<S>(
    mut write: S,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    shared: Arc<LinkShared>,
) where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(command) = commands.recv().await {
        let (frame, last) = match command {
            LinkCommand::Ping => (Message::Ping(Vec::new()), false),
            LinkCommand::Close => (Message::Close(None), true),
        };
        if let Err(e) = write.send(frame).await {
            warn!("websocket write failed: {e}");
            shared.open.store(false, Ordering::SeqCst);
            break;
        }
        if last {
            break;
        }
    }
    debug!("websocket writer finished");
}

async fn read_loop<S, E>(
    mut read: S,
    events: mpsc::UnboundedSender<TransportEvent>,
    shared: Arc<LinkShared>,
    close_wait: Duration,
) where
    S: futures_util::Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let timed_out = || TransportEvent::Closed {
        code: None,
        reason: "close handshake timed out".to_string(),
    };
    // fixed once the close is requested; later frames do not extend it
    let mut close_deadline: Option<tokio::time::Instant> = None;
    let terminal = loop {
        let next = if shared.close_requested.load(Ordering::SeqCst) {
            let deadline =
                *close_deadline.get_or_insert_with(|| tokio::time::Instant::now() + close_wait);
            if tokio::time::Instant::now() >= deadline {
                break timed_out();
            }
            match tokio::time::timeout_at(deadline, read.next()).await {
                Ok(next) => next,
                Err(_) => break timed_out(),
            }
        } else {
            tokio::select! {
                next = read.next() => next,
                _ = shared.closing.notified() => continue,
            }
        };

        match next {
            Some(Ok(message)) => {
                shared.touch();
                match message {
                    Message::Text(text) => {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                    Message::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            let _ = events.send(TransportEvent::Message(text));
                        }
                        Err(_) => debug!("dropping non-UTF-8 binary frame"),
                    },
                    Message::Close(frame) => {
                        break TransportEvent::Closed {
                            code: frame.as_ref().map(|f| u16::from(f.code)),
                            reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                        }
                    }
                    // pongs only refresh last_activity
                    _ => {}
                }
            }
            Some(Err(e)) => break TransportEvent::Error(e.to_string()),
            None => {
                break TransportEvent::Closed {
                    code: None,
                    reason: "stream ended".to_string(),
                }
            }
        }
    };

    shared.open.store(false, Ordering::SeqCst);
    debug!("websocket reader finished: {terminal:?}");
    let _ = events.send(terminal);
}
