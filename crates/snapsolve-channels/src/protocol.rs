use serde_json::Value;

use crate::error::ProtocolError;

pub const ACTION_PROCESS_IMAGE: &str = "processS3Image";
pub const ACTION_ERROR: &str = "error";

/// Inbound message, keyed by its `action` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    ProcessImage {
        key: Option<String>,
        bucket: Option<String>,
    },
    Error {
        message: String,
    },
    Other {
        action: String,
    },
}

pub fn parse_inbound(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
    let action = object
        .get("action")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingAction)?;

    let text_field = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };

    Ok(match action {
        ACTION_PROCESS_IMAGE => InboundMessage::ProcessImage {
            key: text_field("s3Key"),
            bucket: text_field("s3Bucket"),
        },
        ACTION_ERROR => InboundMessage::Error {
            message: text_field("message").unwrap_or_else(|| "Unknown".to_string()),
        },
        other => InboundMessage::Other {
            action: other.to_string(),
        },
    })
}
