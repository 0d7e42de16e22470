use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of work parsed from an inbound `processS3Image` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkRequest {
    pub bucket: String,
    pub key: String,
    pub request_id: String,
}

impl WorkRequest {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// `s3://bucket/key`, used in log lines.
    pub fn locator(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum TaskResult {
    Answer(String),
    Failure(String),
}

impl TaskResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskResult::Failure(_))
    }

    /// Text shown in the "last result" area. Failures are prefixed with `Error:`.
    pub fn display_text(&self) -> String {
        match self {
            TaskResult::Answer(text) => text.clone(),
            TaskResult::Failure(reason) => format!("Error: {reason}"),
        }
    }
}
