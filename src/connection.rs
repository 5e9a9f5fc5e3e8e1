//! Connection Manager: owns the single duplex connection to the assistant
//! service and turns its traffic into [`ChatEvent`]s.
//!
//! The manager does no I/O itself. A driver (the browser `WebSocket` glue or
//! the tokio client) opens sockets, reports what happened through the `on_*`
//! hooks and honours the reconnect delays those hooks return. Whatever the
//! driver hands over in [`ConnectionManager::on_open`] becomes the only
//! writer to the transport.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::ChatError;
use crate::protocol::{decode_frame, ChatEvent, ClientFrame};

/// Write half of an open connection.
pub trait FrameSink {
    fn send_text(&mut self, text: &str) -> Result<(), ChatError>;

    /// Starts a graceful close. The driver still reports the final close
    /// through [`ConnectionManager::on_close`].
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up; `None` never gives up.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { base_delay: delay, max_delay: delay, max_attempts: None }
    }

    /// Delay before the next attempt after `failures` consecutive failures
    /// (1-based), or `None` once the attempt bound is exhausted.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if failures > max {
                return None;
            }
        }
        let exponent = failures.saturating_sub(1).min(5);
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(exponent));
        Some(delay.min(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

pub type EventHandler = Box<dyn FnMut(ChatEvent)>;

pub struct ConnectionManager<S> {
    state: ConnectionState,
    sink: Option<S>,
    policy: ReconnectPolicy,
    failures: u32,
    shutting_down: bool,
    handler: Option<EventHandler>,
}

impl<S: FrameSink> ConnectionManager<S> {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            sink: None,
            policy,
            failures: 0,
            shutting_down: false,
            handler: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Consecutive failed or dropped connections since the last open.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Registers the single consumer of decoded events, replacing any
    /// previous one.
    pub fn on_event(&mut self, handler: impl FnMut(ChatEvent) + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Moves `Disconnected` to `Connecting`. Returns `false` when the driver
    /// should not open a socket (already connecting/open, or shutting down).
    pub fn begin_connect(&mut self) -> bool {
        if self.shutting_down {
            debug!("Connect skipped: manager is shutting down");
            return false;
        }
        if self.state != ConnectionState::Disconnected {
            debug!("Connect skipped: connection is {}", self.state);
            return false;
        }
        info!(attempt = self.failures + 1, "Connecting to assistant service");
        self.state = ConnectionState::Connecting;
        true
    }

    pub fn on_open(&mut self, mut sink: S) {
        if self.shutting_down {
            debug!("Connection opened after shutdown was requested; closing it");
            sink.close();
            self.state = ConnectionState::Closing;
            return;
        }
        if self.state != ConnectionState::Connecting {
            warn!("Unexpected open while {}", self.state);
        }
        info!("Connection open");
        self.sink = Some(sink);
        self.state = ConnectionState::Open;
        self.failures = 0;
        self.emit(ChatEvent::Connected);
    }

    /// Decodes one inbound text frame. Malformed frames are dropped.
    pub fn on_frame(&mut self, text: &str) {
        if !matches!(self.state, ConnectionState::Open | ConnectionState::Closing) {
            debug!("Frame received while {}; ignoring", self.state);
            return;
        }
        match decode_frame(text) {
            Ok(event) => self.emit(event),
            Err(e) => warn!("Dropping inbound frame: {e}"),
        }
    }

    /// Records that the connection closed or failed. Returns how long the
    /// driver should wait before calling [`begin_connect`](Self::begin_connect)
    /// again, or `None` when no reconnect should happen.
    pub fn on_close(&mut self, reason: impl Into<String>) -> Option<Duration> {
        let reason = reason.into();
        let previous = self.state;
        self.sink = None;
        self.state = ConnectionState::Disconnected;

        if previous == ConnectionState::Disconnected {
            debug!("Close reported for an already closed connection: {reason}");
            return None;
        }

        if self.shutting_down || previous == ConnectionState::Closing {
            info!("Connection closed");
            self.emit(ChatEvent::Disconnected { reason, will_retry: false });
            return None;
        }

        self.failures = self.failures.saturating_add(1);
        let delay = self.policy.delay_for(self.failures);
        match delay {
            Some(delay) => warn!(
                attempt = self.failures,
                "Connection lost ({reason}); reconnecting in {}ms",
                delay.as_millis()
            ),
            None => warn!(
                attempt = self.failures,
                "Connection lost ({reason}); giving up after {} attempts",
                self.failures
            ),
        }
        self.emit(ChatEvent::Disconnected { reason, will_retry: delay.is_some() });
        delay
    }

    pub fn on_connect_failed(&mut self, error: &ChatError) -> Option<Duration> {
        self.on_close(error.to_string())
    }

    /// Sends a frame if the connection is open. Otherwise the frame is
    /// dropped with a warning and `false` is returned.
    pub fn send(&mut self, frame: &ClientFrame) -> bool {
        if self.state != ConnectionState::Open {
            warn!("Dropping outbound frame: connection is {}", self.state);
            return false;
        }
        let Some(sink) = self.sink.as_mut() else {
            warn!("Dropping outbound frame: no open sink");
            return false;
        };
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Dropping outbound frame: {e}");
                return false;
            }
        };
        match sink.send_text(&text) {
            Ok(()) => true,
            Err(e) => {
                warn!("Send failed: {e}");
                false
            }
        }
    }

    /// Closes the connection for good; no reconnect follows.
    pub fn close(&mut self) {
        self.shutting_down = true;
        match self.state {
            ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                if let Some(sink) = self.sink.as_mut() {
                    sink.close();
                }
            }
            ConnectionState::Connecting => self.state = ConnectionState::Closing,
            ConnectionState::Disconnected | ConnectionState::Closing => {}
        }
    }

    fn emit(&mut self, event: ChatEvent) {
        match self.handler.as_mut() {
            Some(handler) => handler(event),
            None => debug!("No event handler registered; dropping {event:?}"),
        }
    }
}
