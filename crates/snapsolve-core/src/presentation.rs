use std::collections::VecDeque;

use snapsolve_types::{HostEvent, LogEntry, TaskResult};

pub const MAX_LOG_ENTRIES: usize = 1000;

pub const STATUS_READY_TO_CONNECT: &str = "Ready to Connect.";
pub const STATUS_LISTENING: &str = "Ready. Listening...";
pub const STATUS_PROCESSING_FAILED: &str = "Error Processing. Check log.";
pub const STATUS_CONFIG_ERROR: &str = "Config Error! Check .env and logs.";

/// Presentation state. Only the consumer loop mutates it.
#[derive(Debug, Clone)]
pub struct HostState {
    pub log: VecDeque<LogEntry>,
    pub status: String,
    pub connected: bool,
    pub last_result: Option<TaskResult>,
    pub config_ready: bool,
}

impl HostState {
    pub fn new(config_ready: bool) -> Self {
        Self {
            log: VecDeque::new(),
            status: if config_ready {
                STATUS_READY_TO_CONNECT.to_string()
            } else {
                STATUS_CONFIG_ERROR.to_string()
            },
            connected: false,
            last_result: None,
            config_ready,
        }
    }

    pub fn apply(&mut self, event: &HostEvent) {
        match event {
            HostEvent::Log(entry) => self.push_log(entry.clone()),
            HostEvent::Status { text } => self.status = text.clone(),
            HostEvent::ConnectionChanged { connected } => self.connected = *connected,
            HostEvent::TaskCompleted { result } => {
                self.status = if result.is_failure() {
                    STATUS_PROCESSING_FAILED.to_string()
                } else if self.connected {
                    STATUS_LISTENING.to_string()
                } else {
                    STATUS_READY_TO_CONNECT.to_string()
                };
                self.last_result = Some(result.clone());
            }
        }
    }

    pub fn push_log(&mut self, entry: LogEntry) {
        if self.log.len() == MAX_LOG_ENTRIES {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }

    pub fn can_connect(&self) -> bool {
        !self.connected && self.config_ready
    }

    pub fn can_disconnect(&self) -> bool {
        self.connected
    }

    pub fn last_result_text(&self) -> Option<String> {
        self.last_result.as_ref().map(TaskResult::display_text)
    }
}
