use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Creation-order identifier, unique within one conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a message can still grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Assistant message currently receiving fragments.
    Open,
    Complete,
    /// Interrupted turn or synthetic failure notice.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    /// Speaker name announced by the assistant service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(id: MessageId, role: MessageRole, content: String, status: MessageStatus) -> Self {
        Self { id, role, content, status, speaker: None, created_at: Utc::now() }
    }

    pub fn is_open(&self) -> bool {
        self.status == MessageStatus::Open
    }

    pub fn css_class(&self) -> &'static str {
        match (self.role, self.status) {
            (_, MessageStatus::Failed) => "message assistant failed",
            (MessageRole::User, _) => "message user",
            (MessageRole::Assistant, _) => "message assistant",
        }
    }

    /// Label shown above the bubble: the announced speaker or the role.
    pub fn display_name(&self) -> &str {
        self.speaker.as_deref().unwrap_or(self.role.as_str())
    }
}

/// Snapshot of the assistant's context window, mirrored from the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextStatus {
    pub total_tokens: u64,
    pub context_limit: u64,
    pub usage_percentage: f64,
}

impl ContextStatus {
    /// Usage clamped to `0..=100` for meters.
    pub fn clamped_percentage(&self) -> f64 {
        self.usage_percentage.clamp(0.0, 100.0)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} tokens ({:.1}%)",
            self.total_tokens, self.context_limit, self.usage_percentage
        )
    }
}

/// Body of `POST /api/context/trim`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrimRequest {
    pub target_percentage: u8,
}

/// Response of `POST /api/context/trim`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrimOutcome {
    #[serde(default)]
    pub message: String,
    pub remaining_messages: u64,
    pub current_usage_percentage: f64,
}

/// Response of `POST /api/clear`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClearResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ClearResponse {
    pub fn succeeded(&self) -> bool {
        self.status == "success"
    }
}

/// Body of `POST /api/events`.
#[derive(Debug, Clone, Serialize)]
pub struct NewKeyEvent<'a> {
    pub event: &'a str,
}

/// Story facts the assistant keeps in its system prompt. Returned by both
/// `GET` and `POST /api/events`; only the latter carries a message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KeyEvents {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl KeyEvents {
    /// Bullet list in the order the events were added.
    pub fn formatted(&self) -> String {
        if self.events.is_empty() {
            return "No significant events yet.".to_string();
        }
        self.events.iter().map(|e| format!("- {e}")).collect::<Vec<_>>().join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CharacterSummary {
    pub name: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub personality: String,
}

/// Response of `GET /api/characters/current`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CurrentCharacters {
    #[serde(default)]
    pub assistant: Option<CharacterSummary>,
    #[serde(default)]
    pub user: Option<CharacterSummary>,
}

impl CurrentCharacters {
    pub fn assistant_name(&self) -> Option<&str> {
        self.assistant.as_ref().map(|c| c.name.as_str())
    }
}
