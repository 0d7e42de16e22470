use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("websocket connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport is closed")]
    Closed,

    #[error("transport send failed: {0}")]
    Send(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("inbound payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("inbound payload is not a JSON object")]
    NotAnObject,

    #[error("inbound payload has no `action` field")]
    MissingAction,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
