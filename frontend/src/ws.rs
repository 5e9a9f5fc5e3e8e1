use std::time::Duration;

use leptos::prelude::*;
use rhea_chat::{ChatError, ConnectionManager, FrameSink};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{CloseEvent, MessageEvent, WebSocket};

use crate::state::AppState;

/// Browser socket handed to the connection manager once it opens.
pub struct BrowserSink(WebSocket);

impl FrameSink for BrowserSink {
    fn send_text(&mut self, text: &str) -> Result<(), ChatError> {
        self.0
            .send_with_str(text)
            .map_err(|e| ChatError::ConnectionDropped { reason: format!("{e:?}") })
    }

    fn close(&mut self) {
        let _ = self.0.close();
    }
}

pub type Socket = ConnectionManager<BrowserSink>;

/// Event closures of the current socket. Dropping the handle detaches them
/// from the socket first, so a replaced socket can never call a freed closure.
pub struct SocketHandlers {
    ws: WebSocket,
    _onopen: Closure<dyn Fn()>,
    _onmessage: Closure<dyn Fn(MessageEvent)>,
    _onerror: Closure<dyn Fn()>,
    _onclose: Closure<dyn Fn(CloseEvent)>,
}

impl Drop for SocketHandlers {
    fn drop(&mut self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onerror(None);
        self.ws.set_onclose(None);
    }
}

/// Opens a WebSocket for the session's connection manager. Reconnects are
/// scheduled from here whenever the manager asks for one; each new socket's
/// handlers replace, and free, the previous socket's.
pub fn connect(state: AppState) {
    let url = state.config.with_value(|c| c.ws_url.clone());
    let proceed = state.socket.try_update_value(|m| m.begin_connect()).unwrap_or(false);
    state.sync_connection();
    if !proceed {
        return;
    }

    let ws = match WebSocket::new(&url) {
        Ok(ws) => ws,
        Err(e) => {
            let err = ChatError::connect_failed(&url, format!("{e:?}"));
            log::error!("{err}");
            let delay = state.socket.try_update_value(|m| m.on_connect_failed(&err)).flatten();
            state.sync_connection();
            schedule_reconnect(state, delay);
            return;
        }
    };
    ws.set_binary_type(web_sys::BinaryType::Arraybuffer);

    // --- onopen: hand the socket to the manager ---
    let ws_clone = ws.clone();
    let onopen = Closure::<dyn Fn()>::new(move || {
        state.socket.update_value(|m| m.on_open(BrowserSink(ws_clone.clone())));
        state.sync_connection();
    });
    ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));

    // --- onmessage: decode text frames ---
    let onmessage = Closure::<dyn Fn(MessageEvent)>::new(move |ev: MessageEvent| {
        match ev.data().as_string() {
            Some(text) => state.socket.update_value(|m| m.on_frame(&text)),
            None => log::warn!("Ignoring non-text frame"),
        }
    });
    ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

    // --- onerror: the browser follows up with a close event ---
    let onerror = Closure::<dyn Fn()>::new(move || {
        log::error!("WebSocket connection error");
    });
    ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));

    // --- onclose: report and maybe reconnect ---
    let onclose = Closure::<dyn Fn(CloseEvent)>::new(move |ev: CloseEvent| {
        let reason = close_reason(&ev);
        let delay = state.socket.try_update_value(|m| m.on_close(reason)).flatten();
        state.sync_connection();
        schedule_reconnect(state, delay);
    });
    ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));

    state.handlers.set_value(Some(SocketHandlers {
        ws,
        _onopen: onopen,
        _onmessage: onmessage,
        _onerror: onerror,
        _onclose: onclose,
    }));
}

fn schedule_reconnect(state: AppState, delay: Option<Duration>) {
    let Some(delay) = delay else {
        return;
    };
    // One-shot callback, released by the browser once it has run.
    set_timeout(move || connect(state), delay);
}

fn close_reason(ev: &CloseEvent) -> String {
    let reason = ev.reason();
    if reason.is_empty() {
        format!("socket closed (code {})", ev.code())
    } else {
        reason
    }
}
