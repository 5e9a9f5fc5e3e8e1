use thiserror::Error;

/// Every failure the chat client can observe.
///
/// None of these is fatal: transport and upstream failures are turned into
/// [`ChatEvent`](crate::protocol::ChatEvent) values before they reach the
/// conversation, protocol failures are dropped with a warning, and auxiliary
/// failures leave the last known data in place.
#[derive(Debug, Error)]
pub enum ChatError {
    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Connection to {url} failed: {message}")]
    ConnectFailed { url: String, message: String },

    #[error("Connection dropped: {reason}")]
    ConnectionDropped { reason: String },

    #[error("Not connected to the assistant")]
    NotConnected,

    // ── Protocol errors ──────────────────────────────────────────────────────
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),

    // ── Upstream errors ──────────────────────────────────────────────────────
    #[error("{0}")]
    Upstream(String),

    // ── Auxiliary request errors ─────────────────────────────────────────────
    #[error("{operation} request failed: {message}")]
    Auxiliary { operation: &'static str, message: String },

    // ── Input rejections ─────────────────────────────────────────────────────
    #[error("A response is still streaming")]
    TurnInProgress,

    #[error("Message cannot be empty")]
    EmptyMessage,
}

impl ChatError {
    pub fn connect_failed(url: impl Into<String>, message: impl ToString) -> Self {
        ChatError::ConnectFailed { url: url.into(), message: message.to_string() }
    }

    pub fn auxiliary(operation: &'static str, message: impl ToString) -> Self {
        ChatError::Auxiliary { operation, message: message.to_string() }
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChatError::ConnectFailed { .. } | ChatError::ConnectionDropped { .. } | ChatError::NotConnected
        )
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, ChatError::MalformedFrame(_) | ChatError::UnexpectedFrame(_))
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self, ChatError::Upstream(_))
    }

    pub fn is_auxiliary(&self) -> bool {
        matches!(self, ChatError::Auxiliary { .. })
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, ChatError::TurnInProgress | ChatError::EmptyMessage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_family() {
        assert!(ChatError::connect_failed("ws://x", "refused").is_transport());
        assert!(ChatError::NotConnected.is_transport());
        assert!(ChatError::UnexpectedFrame("[]".into()).is_protocol());
        assert!(ChatError::Upstream("rate limited".into()).is_upstream());
        assert!(ChatError::auxiliary("Context status", "timeout").is_auxiliary());
        assert!(ChatError::TurnInProgress.is_rejection());
        assert!(!ChatError::EmptyMessage.is_transport());
    }

    #[test]
    fn messages_are_human_readable() {
        let err = ChatError::auxiliary("Clear context", "Server error: 500");
        assert_eq!(err.to_string(), "Clear context request failed: Server error: 500");
        assert_eq!(ChatError::Upstream("rate limited".into()).to_string(), "rate limited");
    }
}
