use leptos::ev;
use leptos::prelude::*;
use rhea_chat::ConnectionState;
use rhea_chat::models::Message;

use crate::state::AppState;

/// Main chat area with message history, streaming display, and input.
#[component]
pub fn ChatArea() -> impl IntoView {
    let state = expect_context::<AppState>();

    view! {
        <main class="chat-area">
            // Error banner
            {move || {
                state.error.get().map(|err| {
                    view! {
                        <div class="error-banner">{err}</div>
                    }
                })
            }}

            // Messages
            <div class="messages-container" node_ref=state.messages_ref>
                {move || {
                    if state.chat.with(|c| c.messages().is_empty()) {
                        view! {
                            <div class="empty-state">
                                "Send a message to start chatting"
                            </div>
                        }.into_any()
                    } else {
                        view! {
                            <For
                                each=move || state.chat.with(|c| c.messages().to_vec())
                                key=|m| (m.id, m.content.len(), m.status, m.speaker.clone())
                                let:msg
                            >
                                <MessageBubble message=msg />
                            </For>
                        }.into_any()
                    }
                }}
            </div>

            // Input area
            <ChatInput />
        </main>
    }
}

/// A single chat message bubble.
#[component]
fn MessageBubble(message: Message) -> impl IntoView {
    let label = message.display_name().to_string();
    let time = message.created_at.format("%H:%M").to_string();
    let body_class = if message.is_open() { "streaming-cursor" } else { "message-body" };

    view! {
        <div class=message.css_class()>
            <div class="role-label">{label}<span class="timestamp">{time}</span></div>
            <div class=body_class>{message.content}</div>
        </div>
    }
}

/// Chat input form with textarea and send button.
#[component]
fn ChatInput() -> impl IntoView {
    let state = expect_context::<AppState>();
    let (input, set_input) = signal(String::new());

    let is_sending = move || state.chat.with(|c| c.is_loading());
    let is_blocked = move || is_sending() || !state.is_connected();

    let send = move || {
        let text = input.get().trim().to_string();
        if text.is_empty() || is_blocked() {
            return;
        }
        set_input.set(String::new());
        state.send_message(text);
    };

    let on_keydown = move |ev: ev::KeyboardEvent| {
        if ev.key() == "Enter" && !ev.shift_key() {
            ev.prevent_default();
            send();
        }
    };

    let on_submit = move |_| {
        send();
    };

    let placeholder = move || match state.connection.get() {
        ConnectionState::Open => "Type a message… (Enter to send, Shift+Enter for newline)",
        _ => "Reconnecting to the assistant…",
    };

    view! {
        <div class="input-area">
            <div class="input-row">
                <textarea
                    rows="1"
                    placeholder=placeholder
                    prop:value=input
                    on:input=move |ev| {
                        set_input.set(event_target_value(&ev));
                    }
                    on:keydown=on_keydown
                    disabled=is_blocked
                />
                <button
                    class="send-btn"
                    on:click=on_submit
                    disabled=move || is_blocked() || input.get().trim().is_empty()
                >
                    {move || if is_sending() { "Sending…" } else { "Send" }}
                </button>
            </div>
        </div>
    }
}
