use gloo_timers::callback::Interval;
use leptos::html::Div;
use leptos::prelude::*;
use leptos::task::spawn_local;
use rhea_chat::models::{ContextStatus, KeyEvents};
use rhea_chat::{
    ChatError, ChatEvent, ClientConfig, ClientFrame, ConnectionManager, ConnectionState,
    ConversationMachine, Effects, Viewport,
};

use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use crate::api;
use crate::ws::{self, Socket, SocketHandlers};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

/// Default settings, overridable when the bundle is built.
pub fn browser_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    if let Some(url) = option_env!("RHEA_WS_URL") {
        config.ws_url = url.to_string();
    }
    if let Some(base) = option_env!("RHEA_API_BASE") {
        config.api_base = base.trim_end_matches('/').to_string();
    }
    config
}

/// Shared application state, provided via Leptos context.
#[derive(Clone, Copy)]
pub struct AppState {
    // --- Read signals (for components to subscribe to) ---
    pub chat: ReadSignal<ConversationMachine>,
    pub connection: ReadSignal<ConnectionState>,
    pub context: ReadSignal<Option<ContextStatus>>,
    pub fast_mode: ReadSignal<bool>,
    pub theme: ReadSignal<Theme>,
    pub fullscreen: ReadSignal<bool>,
    pub error: ReadSignal<Option<String>>,
    pub key_events: ReadSignal<Vec<String>>,

    // --- Write signals (for mutating state) ---
    pub set_chat: WriteSignal<ConversationMachine>,
    pub set_connection: WriteSignal<ConnectionState>,
    pub set_context: WriteSignal<Option<ContextStatus>>,
    pub set_fast_mode: WriteSignal<bool>,
    pub set_theme: WriteSignal<Theme>,
    pub set_fullscreen: WriteSignal<bool>,
    pub set_error: WriteSignal<Option<String>>,
    pub set_key_events: WriteSignal<Vec<String>>,

    /// Scroll container of the message list.
    pub messages_ref: NodeRef<Div>,
    pub config: StoredValue<ClientConfig>,
    pub socket: StoredValue<Socket, LocalStorage>,
    /// Closures bound to the current socket; replaced on every reconnect.
    pub handlers: StoredValue<Option<SocketHandlers>, LocalStorage>,
}

impl AppState {
    /// Create a new `AppState` and provide it in the current Leptos context.
    pub fn provide() -> Self {
        let config = browser_config();
        let (chat, set_chat) = signal(ConversationMachine::new((&config).into()));
        let (connection, set_connection) = signal(ConnectionState::Disconnected);
        let (context, set_context) = signal(None::<ContextStatus>);
        let (fast_mode, set_fast_mode) = signal(false);
        let (theme, set_theme) = signal(Theme::default());
        let (fullscreen, set_fullscreen) = signal(false);
        let (error, set_error) = signal(None::<String>);
        let (key_events, set_key_events) = signal(Vec::<String>::new());
        let socket = StoredValue::new_local(ConnectionManager::new(config.reconnect_policy()));

        let state = Self {
            chat,
            connection,
            context,
            fast_mode,
            theme,
            fullscreen,
            error,
            key_events,
            set_chat,
            set_connection,
            set_context,
            set_fast_mode,
            set_theme,
            set_fullscreen,
            set_error,
            set_key_events,
            messages_ref: NodeRef::new(),
            config: StoredValue::new(config),
            socket,
            handlers: StoredValue::new_local(None),
        };

        state.socket.update_value(|m| m.on_event(move |event| state.handle_event(event)));
        provide_context(state);
        state
    }

    /// Connect the socket and start the context-status poll.
    pub fn start(&self) {
        ws::connect(*self);
        self.refresh_context();
        self.refresh_key_events();
        self.load_characters();
        self.watch_fullscreen();

        let state = *self;
        let period = self.config.with_value(|c| c.status_poll_interval());
        let millis = u32::try_from(period.as_millis()).unwrap_or(u32::MAX);
        Interval::new(millis, move || state.refresh_context()).forget();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.get() == ConnectionState::Open
    }

    /// Mirror the manager's connection state into the UI.
    pub fn sync_connection(&self) {
        let current = self.socket.with_value(|m| m.state());
        if self.connection.get_untracked() != current {
            self.set_connection.set(current);
        }
    }

    /// Consumer for every event the connection manager decodes.
    fn handle_event(&self, event: ChatEvent) {
        if matches!(event, ChatEvent::Connected) {
            self.set_error.set(None);
        }
        let viewport = self.viewport();
        let effects = self.set_chat.try_update(|c| c.apply(event, &viewport)).unwrap_or_default();
        self.after_change(&effects);
    }

    /// Send a user message to the assistant.
    pub fn send_message(&self, text: String) {
        let submitted = match self.set_chat.try_update(|c| c.submit(&text)) {
            Some(Ok(submitted)) => submitted,
            Some(Err(e)) => {
                log::debug!("Submit rejected: {e}");
                return;
            }
            None => return,
        };
        self.set_error.set(None);
        self.after_change(&submitted.effects);

        let sent = self.socket.try_update_value(|m| m.send(&submitted.frame)).unwrap_or(false);
        if !sent {
            let effects = self
                .set_chat
                .try_update(|c| c.abort_turn(&ChatError::NotConnected))
                .unwrap_or_default();
            self.after_change(&effects);
        }
    }

    pub fn toggle_fast_mode(&self) {
        let enabled = !self.fast_mode.get_untracked();
        let frame = ClientFrame::toggle_fast_mode(enabled);
        if self.socket.try_update_value(|m| m.send(&frame)).unwrap_or(false) {
            self.set_fast_mode.set(enabled);
        } else {
            self.set_error.set(Some(ChatError::NotConnected.to_string()));
        }
    }

    /// Reload the context-usage snapshot; failures keep the stale value.
    pub fn refresh_context(&self) {
        let state = *self;
        let url = self.config.with_value(|c| c.context_status_url());
        spawn_local(async move {
            match api::fetch_context_status(&url).await {
                Ok(status) => state.set_context.set(Some(status)),
                Err(e) => log::warn!("{e}"),
            }
        });
    }

    /// Clear server memory, then the local conversation.
    pub fn clear_context(&self) {
        let state = *self;
        let url = self.config.with_value(|c| c.clear_url());
        spawn_local(async move {
            match api::clear_context(&url).await {
                Ok(()) => {
                    let effects = state.set_chat.try_update(|c| c.clear()).unwrap_or_default();
                    state.after_change(&effects);
                    state.refresh_context();
                }
                Err(e) => {
                    log::warn!("{e}");
                    state.set_error.set(Some(e.to_string()));
                }
            }
        });
    }

    pub fn trim_context(&self, target_percentage: u8) {
        let state = *self;
        let url = self.config.with_value(|c| c.trim_url());
        spawn_local(async move {
            match api::trim_context(&url, target_percentage).await {
                Ok(outcome) => {
                    log::info!("{} ({} messages kept)", outcome.message, outcome.remaining_messages);
                    state.refresh_context();
                }
                Err(e) => {
                    log::warn!("{e}");
                    state.set_error.set(Some(e.to_string()));
                }
            }
        });
    }

    pub fn refresh_key_events(&self) {
        let state = *self;
        let url = self.config.with_value(|c| c.events_url());
        spawn_local(async move {
            match api::fetch_key_events(&url).await {
                Ok(events) => state.set_key_events.set(events.events),
                Err(e) => log::warn!("{e}"),
            }
        });
    }

    /// Adds a fact for the assistant to remember.
    pub fn add_key_event(&self, event: String) {
        let event = event.trim().to_string();
        if event.is_empty() {
            return;
        }
        let state = *self;
        let url = self.config.with_value(|c| c.events_url());
        spawn_local(async move {
            match api::add_key_event(&url, &event).await {
                Ok(KeyEvents { events, .. }) => state.set_key_events.set(events),
                Err(e) => {
                    log::warn!("{e}");
                    state.set_error.set(Some(e.to_string()));
                }
            }
        });
    }

    /// Names unlabelled replies after the service's current assistant.
    fn load_characters(&self) {
        let state = *self;
        let url = self.config.with_value(|c| c.characters_url());
        spawn_local(async move {
            match api::fetch_current_characters(&url).await {
                Ok(pair) => {
                    if let Some(name) = pair.assistant_name() {
                        state.set_chat.update(|c| c.set_assistant_name(name));
                    }
                }
                Err(e) => log::debug!("{e}"),
            }
        });
    }

    pub fn toggle_theme(&self) {
        let theme = self.theme.get_untracked().toggled();
        self.set_theme.set(theme);
        self.apply_theme();
    }

    pub fn apply_theme(&self) {
        let theme = self.theme.get_untracked();
        if let Some(root) = document().document_element() {
            if let Err(e) = root.set_attribute("data-theme", theme.as_str()) {
                log::warn!("Failed to apply theme: {e:?}");
            }
        }
    }

    /// Requests or leaves fullscreen. The signal follows `fullscreenchange`,
    /// so leaving with Esc is picked up too.
    pub fn toggle_fullscreen(&self) {
        let doc = document();
        if doc.fullscreen_element().is_some() {
            doc.exit_fullscreen();
        } else if let Some(root) = doc.document_element() {
            if let Err(e) = root.request_fullscreen() {
                log::warn!("Fullscreen request failed: {e:?}");
            }
        }
    }

    pub fn sync_fullscreen(&self) {
        let active = document().fullscreen_element().is_some();
        if self.fullscreen.get_untracked() != active {
            self.set_fullscreen.set(active);
        }
    }

    /// Installed once per page, so the closure lives as long as the document.
    fn watch_fullscreen(&self) {
        let state = *self;
        let on_change = Closure::<dyn Fn()>::new(move || state.sync_fullscreen());
        document().set_onfullscreenchange(Some(on_change.as_ref().unchecked_ref()));
        on_change.forget();
        self.sync_fullscreen();
    }

    fn viewport(&self) -> Viewport {
        self.messages_ref
            .get_untracked()
            .map(|el| Viewport {
                scroll_top: f64::from(el.scroll_top()),
                scroll_height: f64::from(el.scroll_height()),
                client_height: f64::from(el.client_height()),
            })
            .unwrap_or_default()
    }

    /// Apply UI side effects once the new content has rendered.
    fn after_change(&self, effects: &Effects) {
        if !effects.scroll_to_bottom {
            return;
        }
        let messages_ref = self.messages_ref;
        request_animation_frame(move || {
            if let Some(el) = messages_ref.get_untracked() {
                el.set_scroll_top(el.scroll_height());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_toggles_between_two_values() {
        assert_eq!(Theme::default(), Theme::Light);
        assert_eq!(Theme::Light.toggled(), Theme::Dark);
        assert_eq!(Theme::Dark.toggled().as_str(), "light");
    }

    #[test]
    fn browser_config_keeps_defaults_without_overrides() {
        let config = browser_config();
        if option_env!("RHEA_WS_URL").is_none() {
            assert_eq!(config.ws_url, ClientConfig::default().ws_url);
        }
        assert!(!config.api_base.ends_with('/'));
    }
}
