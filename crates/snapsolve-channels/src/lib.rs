//! Connection side of the snapsolve host.
//!
//! A [`ConnectionManager`] keeps one websocket session open, runs a
//! [`LivenessMonitor`] for it and turns `processS3Image` messages into tasks
//! gated by the [`AdmissionGuard`]. Everything human-facing is published on
//! the event channel from `snapsolve-core`.

pub mod admission;
pub mod config;
pub mod error;
pub mod executor;
pub mod liveness;
pub mod manager;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use admission::{AdmissionGuard, AdmissionPermit};
pub use config::HostConfig;
pub use error::{ChannelError, ConfigError, ProtocolError, TransportError};
pub use executor::TaskExecutor;
pub use liveness::{LivenessHandle, LivenessMonitor, MonitorState, StopReason};
pub use manager::ConnectionManager;
pub use protocol::{parse_inbound, InboundMessage};
pub use transport::{Connection, Connector, TransportEvent, TransportLink};
pub use websocket::WebSocketConnector;
