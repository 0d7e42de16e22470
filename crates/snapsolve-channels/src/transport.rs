use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Notification from an open transport. After `Error` or `Closed` the stream
/// ends; each connection produces at most one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportEvent::Message(_))
    }
}

/// Control side of an open connection, shared with the liveness monitor.
pub trait TransportLink: Send + Sync {
    fn is_open(&self) -> bool;
    fn send_ping(&self) -> Result<(), TransportError>;
    /// Last time any frame was read from the peer.
    fn last_activity(&self) -> Instant;
    /// Requests a close handshake. The terminal event arrives on the stream.
    fn close(&self);
}

pub struct Connection {
    pub link: Arc<dyn TransportLink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError>;
}
