//! Wire frames exchanged with the assistant service and the typed events
//! they decode into.
//!
//! Outbound frames:
//! - `{ "message": "..." }` submits user text
//! - `{ "toggle_fast_mode": true|false }` flips fast mode
//!
//! Inbound frames carry exactly one of:
//! - `{ "error": "..." }`
//! - `{ "chunk": "...", "character": "..." }` (empty chunk = end of turn)
//! - `{ "system": "..." }` or any other object, a control acknowledgement

use serde::{Deserialize, Serialize};

use crate::errors::ChatError;

/// Frame sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientFrame {
    Message { message: String },
    ToggleFastMode { toggle_fast_mode: bool },
}

impl ClientFrame {
    pub fn message(text: impl Into<String>) -> Self {
        ClientFrame::Message { message: text.into() }
    }

    pub fn toggle_fast_mode(enabled: bool) -> Self {
        ClientFrame::ToggleFastMode { toggle_fast_mode: enabled }
    }

    pub fn encode(&self) -> Result<String, ChatError> {
        serde_json::to_string(self).map_err(ChatError::MalformedFrame)
    }
}

/// Raw inbound frame; every key is optional on the wire.
#[derive(Debug, Default, Deserialize)]
struct InboundFrame {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    chunk: Option<String>,
    #[serde(default)]
    character: Option<String>,
    #[serde(default)]
    system: Option<String>,
}

/// Event delivered to the conversation, decoded from a frame or raised by
/// the connection itself.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    /// Text fragment; an empty `text` ends the turn.
    Chunk { text: String, character: Option<String> },
    /// The assistant service reported a failure for the current turn.
    Error { message: String },
    /// Control acknowledgement, optionally carrying a notice for the user.
    Control { notice: Option<String> },
    Connected,
    Disconnected { reason: String, will_retry: bool },
}

impl ChatEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        ChatEvent::Chunk { text: text.into(), character: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ChatEvent::Error { message: message.into() }
    }
}

/// Decodes one inbound text frame.
///
/// `error` takes precedence over `chunk` if a server ever sends both.
pub fn decode_frame(text: &str) -> Result<ChatEvent, ChatError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(ChatError::MalformedFrame)?;
    if !value.is_object() {
        return Err(ChatError::UnexpectedFrame(truncate(text, 80)));
    }
    let frame: InboundFrame = serde_json::from_value(value).map_err(ChatError::MalformedFrame)?;

    if let Some(message) = frame.error {
        return Ok(ChatEvent::Error { message });
    }
    if let Some(text) = frame.chunk {
        return Ok(ChatEvent::Chunk { text, character: frame.character });
    }
    Ok(ChatEvent::Control { notice: frame.system })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_outbound_shapes() {
        assert_eq!(ClientFrame::message("hi").encode().unwrap(), r#"{"message":"hi"}"#);
        assert_eq!(
            ClientFrame::toggle_fast_mode(true).encode().unwrap(),
            r#"{"toggle_fast_mode":true}"#
        );
    }

    #[test]
    fn decodes_chunk_with_character() {
        let event = decode_frame(r#"{"chunk":"Hello","character":"Rhea"}"#).unwrap();
        assert_eq!(event, ChatEvent::Chunk { text: "Hello".into(), character: Some("Rhea".into()) });
    }

    #[test]
    fn empty_chunk_is_still_a_chunk() {
        assert_eq!(decode_frame(r#"{"chunk":""}"#).unwrap(), ChatEvent::chunk(""));
    }

    #[test]
    fn decodes_error_and_prefers_it() {
        assert_eq!(decode_frame(r#"{"error":"rate limited"}"#).unwrap(), ChatEvent::error("rate limited"));
        assert_eq!(
            decode_frame(r#"{"chunk":"x","error":"boom"}"#).unwrap(),
            ChatEvent::error("boom")
        );
    }

    #[test]
    fn system_and_bare_objects_are_control_acks() {
        assert_eq!(
            decode_frame(r#"{"system":"Fast mode enabled"}"#).unwrap(),
            ChatEvent::Control { notice: Some("Fast mode enabled".into()) }
        );
        assert_eq!(decode_frame(r#"{"ok":true}"#).unwrap(), ChatEvent::Control { notice: None });
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(decode_frame("not json").unwrap_err().is_protocol());
        assert!(decode_frame(r#"["chunk","x"]"#).unwrap_err().is_protocol());
        assert!(decode_frame(r#""just a string""#).unwrap_err().is_protocol());
        assert!(decode_frame(r#"{"chunk":42}"#).unwrap_err().is_protocol());
    }

    #[test]
    fn truncates_long_frames_in_errors() {
        let long = format!("[{}]", "1,".repeat(100));
        let err = decode_frame(&long).unwrap_err();
        assert!(err.to_string().ends_with('…'));
    }
}
