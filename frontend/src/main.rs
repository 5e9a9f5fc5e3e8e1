mod api;
mod components;
mod state;
mod ws;

use leptos::prelude::*;
use leptos::mount::mount_to_body;

use components::chat::ChatArea;
use components::events::KeyEventsPanel;
use components::toolbar::Toolbar;
use state::AppState;

/// Root application component.
#[component]
fn App() -> impl IntoView {
    let state = AppState::provide();

    // Open the socket and start polling context usage
    state.start();
    state.apply_theme();

    view! {
        <div class="app-container" class:fullscreen=move || state.fullscreen.get()>
            <Toolbar />
            <KeyEventsPanel />
            <ChatArea />
        </div>
    }
}

fn main() {
    console_log::init_with_level(log::Level::Debug).expect("Failed to init logger");
    mount_to_body(App);
}
