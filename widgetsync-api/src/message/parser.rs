use core::fmt;

use serde_json::Value;

use super::event::{EventKind, StreamEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Frame bytes are not UTF-8
    InvalidEncoding,
    /// Frame is not a JSON object
    Malformed(String),
    /// Object has no `type` field
    MissingType,
    /// `type` names no known event
    UnknownType(String),
    /// Known event with missing or ill-typed fields
    InvalidPayload { kind: EventKind, message: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding => write!(f, "Frame is not valid UTF-8"),
            Self::Malformed(e) => write!(f, "Malformed frame: {}", e),
            Self::MissingType => write!(f, "Frame has no `type` field"),
            Self::UnknownType(tag) => write!(f, "Unknown event type: {}", tag),
            Self::InvalidPayload { kind, message } => {
                write!(f, "Invalid {} payload: {}", kind, message)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Decodes one raw frame off the stream.
pub fn parse_frame(bytes: &[u8]) -> Result<StreamEvent, ParseError> {
    let text = core::str::from_utf8(bytes).map_err(|_| ParseError::InvalidEncoding)?;
    parse_text(text)
}

/// Decodes one text frame off the stream.
pub fn parse_text(text: &str) -> Result<StreamEvent, ParseError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let kind = match value.as_object().map(|object| object.get("type")) {
        None => return Err(ParseError::Malformed("frame is not a JSON object".into())),
        Some(None) => return Err(ParseError::MissingType),
        Some(Some(Value::String(tag))) => {
            EventKind::from_tag(tag).ok_or_else(|| ParseError::UnknownType(tag.clone()))?
        }
        Some(Some(_)) => return Err(ParseError::Malformed("`type` must be a string".into())),
    };

    serde_json::from_value(value).map_err(|e| ParseError::InvalidPayload {
        kind,
        message: e.to_string(),
    })
}

/// Encodes an event into a text frame.
pub fn encode_event(event: &StreamEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
