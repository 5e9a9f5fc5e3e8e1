use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::connection::ReconnectPolicy;

const DEFAULT_WS_URL: &str = "ws://localhost:3000/ws";
const DEFAULT_API_BASE: &str = "http://localhost:3000";

/// Client settings shared by the browser and terminal front ends.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub ws_url: String,
    pub api_base: String,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Upper bound on one socket handshake before it counts as a failure.
    pub connect_timeout_ms: u64,
    pub status_poll_interval_ms: u64,
    pub scroll_threshold_px: f64,
    /// End a turn early when a fragment ends like a sentence.
    pub turn_end_heuristic: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: None,
            connect_timeout_ms: 10_000,
            status_poll_interval_ms: 5_000,
            scroll_threshold_px: 100.0,
            turn_end_heuristic: true,
        }
    }
}

impl ClientConfig {
    /// Builds a config from `RHEA_*` environment variables, falling back to
    /// the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("RHEA_WS_URL") {
            config.ws_url = url;
        }
        if let Some(base) = lookup("RHEA_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(ms) = parse_var(&lookup, "RHEA_RECONNECT_DELAY_MS") {
            config.reconnect_base_delay_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "RHEA_RECONNECT_MAX_DELAY_MS") {
            config.reconnect_max_delay_ms = ms;
        }
        if let Some(attempts) = parse_var(&lookup, "RHEA_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = Some(attempts);
        }
        if let Some(ms) = parse_var(&lookup, "RHEA_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "RHEA_STATUS_POLL_MS") {
            config.status_poll_interval_ms = ms;
        }
        if let Some(enabled) = parse_var(&lookup, "RHEA_TURN_END_HEURISTIC") {
            config.turn_end_heuristic = enabled;
        }

        config
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms.max(self.reconnect_base_delay_ms)),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms.max(250))
    }

    pub fn context_status_url(&self) -> String {
        format!("{}/api/context/status", self.api_base)
    }

    pub fn clear_url(&self) -> String {
        format!("{}/api/clear", self.api_base)
    }

    pub fn trim_url(&self) -> String {
        format!("{}/api/context/trim", self.api_base)
    }

    pub fn events_url(&self) -> String {
        format!("{}/api/events", self.api_base)
    }

    pub fn characters_url(&self) -> String {
        format!("{}/api/characters/current", self.api_base)
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_local_service() {
        let config = ClientConfig::from_lookup(|_| None);
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.context_status_url(), "http://localhost:3000/api/context/status");
        assert_eq!(config.clear_url(), "http://localhost:3000/api/clear");
    }

    #[test]
    fn reads_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("RHEA_WS_URL", "ws://chat.internal/ws"),
            ("RHEA_API_BASE", "http://chat.internal/"),
            ("RHEA_RECONNECT_DELAY_MS", "250"),
            ("RHEA_MAX_RECONNECT_ATTEMPTS", "3"),
            ("RHEA_TURN_END_HEURISTIC", "false"),
            ("RHEA_CONNECT_TIMEOUT_MS", "1500"),
        ]));
        assert_eq!(config.ws_url, "ws://chat.internal/ws");
        assert_eq!(config.trim_url(), "http://chat.internal/api/context/trim");
        assert_eq!(config.reconnect_base_delay_ms, 250);
        assert_eq!(config.max_reconnect_attempts, Some(3));
        assert!(!config.turn_end_heuristic);
        assert_eq!(config.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(config.events_url(), "http://chat.internal/api/events");
        assert_eq!(config.characters_url(), "http://chat.internal/api/characters/current");
    }

    #[test]
    fn unparsable_values_fall_back() {
        let config = ClientConfig::from_lookup(lookup(&[("RHEA_STATUS_POLL_MS", "soon")]));
        assert_eq!(config.status_poll_interval_ms, 5_000);
    }

    #[test]
    fn policy_cap_never_below_base() {
        let config = ClientConfig {
            reconnect_base_delay_ms: 5_000,
            reconnect_max_delay_ms: 1_000,
            ..ClientConfig::default()
        };
        let policy = config.reconnect_policy();
        assert_eq!(policy.max_delay, Duration::from_millis(5_000));
    }

    #[test]
    fn deserializes_partial_json() {
        let config: ClientConfig = serde_json::from_str(r#"{"scroll_threshold_px": 40}"#).unwrap();
        assert_eq!(config.scroll_threshold_px, 40.0);
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
    }
}
