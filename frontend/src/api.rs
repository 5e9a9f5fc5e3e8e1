use gloo_net::http::Request;
use rhea_chat::ChatError;
use rhea_chat::models::{
    ClearResponse, ContextStatus, CurrentCharacters, KeyEvents, NewKeyEvent, TrimOutcome, TrimRequest,
};

/// Fetches the assistant's current context usage.
pub async fn fetch_context_status(url: &str) -> Result<ContextStatus, ChatError> {
    const OP: &str = "Context status";
    let resp = Request::get(url)
        .send()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

    if !resp.ok() {
        return Err(ChatError::auxiliary(OP, format!("Server error: {}", resp.status())));
    }

    resp.json::<ContextStatus>()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Parse error: {e}")))
}

/// Clears the assistant's conversational memory.
pub async fn clear_context(url: &str) -> Result<(), ChatError> {
    const OP: &str = "Clear context";
    let resp = Request::post(url)
        .send()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

    let ok = resp.ok();
    let status = resp.status();
    match resp.json::<ClearResponse>().await {
        Ok(body) if ok && body.succeeded() => Ok(()),
        Ok(ClearResponse { error: Some(error), .. }) => Err(ChatError::auxiliary(OP, error)),
        _ => Err(ChatError::auxiliary(OP, format!("Server error: {status}"))),
    }
}

/// Trims server-side context down to `target_percentage` of the limit.
pub async fn trim_context(url: &str, target_percentage: u8) -> Result<TrimOutcome, ChatError> {
    const OP: &str = "Trim context";
    let resp = Request::post(url)
        .json(&TrimRequest { target_percentage })
        .map_err(|e| ChatError::auxiliary(OP, format!("Serialize error: {e}")))?
        .send()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

    if !resp.ok() {
        return Err(ChatError::auxiliary(OP, format!("Server error: {}", resp.status())));
    }

    resp.json::<TrimOutcome>()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Parse error: {e}")))
}

/// Lists the key events the assistant remembers.
pub async fn fetch_key_events(url: &str) -> Result<KeyEvents, ChatError> {
    const OP: &str = "Key events";
    let resp = Request::get(url)
        .send()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

    if !resp.ok() {
        return Err(ChatError::auxiliary(OP, format!("Server error: {}", resp.status())));
    }

    resp.json::<KeyEvents>()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Parse error: {e}")))
}

/// Records a key event; the service answers with the updated list.
pub async fn add_key_event(url: &str, event: &str) -> Result<KeyEvents, ChatError> {
    const OP: &str = "Add key event";
    let resp = Request::post(url)
        .json(&NewKeyEvent { event })
        .map_err(|e| ChatError::auxiliary(OP, format!("Serialize error: {e}")))?
        .send()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

    if !resp.ok() {
        return Err(ChatError::auxiliary(OP, format!("Server error: {}", resp.status())));
    }

    resp.json::<KeyEvents>()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Parse error: {e}")))
}

/// Fetches the characters the service is currently playing.
pub async fn fetch_current_characters(url: &str) -> Result<CurrentCharacters, ChatError> {
    const OP: &str = "Current characters";
    let resp = Request::get(url)
        .send()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Network error: {e}")))?;

    if !resp.ok() {
        return Err(ChatError::auxiliary(OP, format!("Server error: {}", resp.status())));
    }

    resp.json::<CurrentCharacters>()
        .await
        .map_err(|e| ChatError::auxiliary(OP, format!("Parse error: {e}")))
}
