use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::errors::ChatError;
use crate::models::{
    ClearResponse, ContextStatus, CurrentCharacters, KeyEvents, NewKeyEvent, TrimOutcome, TrimRequest,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `{"error": ...}` body the service sends with 4xx/5xx answers.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Request/response calls to the assistant service that live outside the
/// socket: context status, clear, trim, key events and the current characters.
#[derive(Clone)]
pub struct ContextClient {
    http: Client,
    status_url: String,
    clear_url: String,
    trim_url: String,
    events_url: String,
    characters_url: String,
}

impl ContextClient {
    pub fn new(config: &ClientConfig) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {e}");
                Client::new()
            });
        Self {
            http,
            status_url: config.context_status_url(),
            clear_url: config.clear_url(),
            trim_url: config.trim_url(),
            events_url: config.events_url(),
            characters_url: config.characters_url(),
        }
    }

    /// Fetches the current context usage.
    pub async fn status(&self) -> Result<ContextStatus, ChatError> {
        const OP: &str = "Context status";
        let resp = self
            .http
            .get(&self.status_url)
            .send()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

        if !resp.status().is_success() {
            return Err(ChatError::auxiliary(OP, format!("Server error: {}", resp.status())));
        }

        resp.json::<ContextStatus>()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Parse error: {e}")))
    }

    /// Empties the service's conversational memory.
    pub async fn clear(&self) -> Result<(), ChatError> {
        const OP: &str = "Clear context";
        let resp = self
            .http
            .post(&self.clear_url)
            .send()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

        let status = resp.status();
        let body = resp.json::<ClearResponse>().await.ok();
        match body {
            Some(body) if status.is_success() && body.succeeded() => {
                debug!("Context cleared: {}", body.message.unwrap_or_default());
                Ok(())
            }
            Some(ClearResponse { error: Some(error), .. }) => Err(ChatError::auxiliary(OP, error)),
            _ => Err(ChatError::auxiliary(OP, format!("Server error: {status}"))),
        }
    }

    /// Asks the service to drop old turns until usage reaches `target_percentage`.
    pub async fn trim(&self, target_percentage: u8) -> Result<TrimOutcome, ChatError> {
        const OP: &str = "Trim context";
        let resp = self
            .http
            .post(&self.trim_url)
            .json(&TrimRequest { target_percentage })
            .send()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

        if !resp.status().is_success() {
            return Err(ChatError::auxiliary(OP, format!("Server error: {}", resp.status())));
        }

        resp.json::<TrimOutcome>()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Parse error: {e}")))
    }

    /// Lists the key events the assistant remembers.
    pub async fn events(&self) -> Result<KeyEvents, ChatError> {
        const OP: &str = "Key events";
        let resp = self
            .http
            .get(&self.events_url)
            .send()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

        if !resp.status().is_success() {
            return Err(ChatError::auxiliary(OP, format!("Server error: {}", resp.status())));
        }

        resp.json::<KeyEvents>()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Parse error: {e}")))
    }

    /// Records a key event and returns the updated list.
    pub async fn add_event(&self, event: &str) -> Result<KeyEvents, ChatError> {
        const OP: &str = "Add key event";
        let resp = self
            .http
            .post(&self.events_url)
            .json(&NewKeyEvent { event })
            .send()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(match resp.json::<ErrorBody>().await {
                Ok(body) => ChatError::auxiliary(OP, body.error),
                Err(_) => ChatError::auxiliary(OP, format!("Server error: {status}")),
            });
        }

        resp.json::<KeyEvents>()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Parse error: {e}")))
    }

    /// Fetches the assistant and user characters the service is playing.
    pub async fn current_characters(&self) -> Result<CurrentCharacters, ChatError> {
        const OP: &str = "Current characters";
        let resp = self
            .http
            .get(&self.characters_url)
            .send()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

        if !resp.status().is_success() {
            return Err(ChatError::auxiliary(OP, format!("Server error: {}", resp.status())));
        }

        resp.json::<CurrentCharacters>()
            .await
            .map_err(|e| ChatError::auxiliary(OP, format!("Parse error: {e}")))
    }
}
