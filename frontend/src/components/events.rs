use leptos::ev;
use leptos::prelude::*;

use crate::state::AppState;

/// Key events the assistant keeps in mind, with a field to add one.
#[component]
pub fn KeyEventsPanel() -> impl IntoView {
    let state = expect_context::<AppState>();
    let (draft, set_draft) = signal(String::new());

    let add = move || {
        let event = draft.get_untracked();
        if event.trim().is_empty() {
            return;
        }
        set_draft.set(String::new());
        state.add_key_event(event);
    };

    let on_keydown = move |ev: ev::KeyboardEvent| {
        if ev.key() == "Enter" {
            ev.prevent_default();
            add();
        }
    };

    view! {
        <details class="key-events">
            <summary>{move || format!("Key events ({})", state.key_events.with(Vec::len))}</summary>
            <ul>
                <For
                    each=move || state.key_events.get().into_iter().enumerate()
                    key=|(i, event)| (*i, event.clone())
                    let:item
                >
                    <li>{item.1}</li>
                </For>
            </ul>
            <div class="input-row">
                <input
                    type="text"
                    placeholder="Something the assistant should remember"
                    prop:value=draft
                    on:input=move |ev| set_draft.set(event_target_value(&ev))
                    on:keydown=on_keydown
                />
                <button on:click=move |_| add()>"Add"</button>
            </div>
        </details>
    }
}
