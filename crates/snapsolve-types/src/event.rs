use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TaskResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            at: Utc::now(),
        }
    }

    /// `[HH:MM:SS.mmm][LEVEL] text`
    pub fn formatted(&self) -> String {
        format!(
            "[{}][{}] {}",
            self.at.format("%H:%M:%S%.3f"),
            self.level.as_str(),
            self.text
        )
    }
}

/// Notifications carried from background contexts to the single consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    Log(LogEntry),
    Status { text: String },
    ConnectionChanged { connected: bool },
    TaskCompleted { result: TaskResult },
}

impl HostEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HostEvent::Log(_) => "log",
            HostEvent::Status { .. } => "status",
            HostEvent::ConnectionChanged { .. } => "connection_changed",
            HostEvent::TaskCompleted { .. } => "task_completed",
        }
    }
}
