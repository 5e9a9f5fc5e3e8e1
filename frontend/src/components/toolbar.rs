use leptos::prelude::*;
use rhea_chat::ConnectionState;

use crate::state::{AppState, Theme};

/// Server context is trimmed down to this share of the limit.
const TRIM_TARGET_PERCENT: u8 = 50;

/// Header bar: connection badge, context meter and presentation toggles.
#[component]
pub fn Toolbar() -> impl IntoView {
    let state = expect_context::<AppState>();

    let badge_class = move || match state.connection.get() {
        ConnectionState::Open => "connection-badge online",
        ConnectionState::Connecting => "connection-badge connecting",
        ConnectionState::Disconnected | ConnectionState::Closing => "connection-badge offline",
    };

    view! {
        <header class="toolbar">
            <h2>"Rhea"</h2>
            <span class=badge_class>{move || state.connection.get().to_string()}</span>

            <ContextMeter />

            {move || {
                state.chat.with(|c| c.notice().map(str::to_string)).map(|notice| {
                    view! { <span class="system-notice">{notice}</span> }
                })
            }}

            <div class="toolbar-actions">
                <button
                    class="toggle-btn"
                    class:active=move || state.fast_mode.get()
                    disabled=move || !state.is_connected()
                    on:click=move |_| state.toggle_fast_mode()
                >
                    "Fast mode"
                </button>
                <button class="toggle-btn" on:click=move |_| state.toggle_theme()>
                    {move || match state.theme.get() {
                        Theme::Light => "Dark theme",
                        Theme::Dark => "Light theme",
                    }}
                </button>
                <button class="toggle-btn" on:click=move |_| state.toggle_fullscreen()>
                    {move || if state.fullscreen.get() { "Exit fullscreen" } else { "Fullscreen" }}
                </button>
            </div>
        </header>
    }
}

/// Context usage bar with clear and trim actions.
#[component]
fn ContextMeter() -> impl IntoView {
    let state = expect_context::<AppState>();

    view! {
        <div class="context-meter">
            {move || match state.context.get() {
                Some(status) => {
                    let width = format!("width: {:.1}%", status.clamped_percentage());
                    view! {
                        <div class="meter-track" title=status.summary()>
                            <div class="meter-fill" style=width></div>
                        </div>
                        <span class="meter-label">{format!("{:.0}%", status.usage_percentage)}</span>
                    }.into_any()
                }
                None => view! { <span class="meter-label">"–"</span> }.into_any(),
            }}
            <button
                class="clear-btn"
                disabled=move || state.chat.with(|c| c.is_loading())
                on:click=move |_| state.clear_context()
            >
                "Clear"
            </button>
            <button class="trim-btn" on:click=move |_| state.trim_context(TRIM_TARGET_PERCENT)>
                "Trim"
            </button>
        </div>
    }
}
