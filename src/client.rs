//! Tokio driver for the chat core.
//!
//! [`ChatClient::run`] owns one [`ConnectionManager`] and one
//! [`ConversationMachine`] and processes socket frames, user commands,
//! reconnect timers and status polls one at a time, so every event is fully
//! applied before the next is looked at.

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::api::ContextClient;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, FrameSink};
use crate::conversation::{ConversationMachine, Effects, TurnSettings, Viewport};
use crate::errors::ChatError;
use crate::models::{ContextStatus, CurrentCharacters, KeyEvents, TrimOutcome};
use crate::protocol::{ChatEvent, ClientFrame};

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Instruction from the user-facing side of the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Submit(String),
    /// Flips fast mode relative to what the client last sent.
    ToggleFastMode,
    RefreshStatus,
    ClearContext,
    TrimContext(u8),
    AddKeyEvent(String),
    ListKeyEvents,
    Shutdown,
}

/// Something the front end may want to render.
#[derive(Debug)]
pub enum ClientUpdate {
    Connection(ConnectionState),
    Conversation(Effects),
    Notice(String),
    Status(ContextStatus),
    Trimmed(TrimOutcome),
    KeyEvents(KeyEvents),
    Characters(CurrentCharacters),
    Rejected(ChatError),
    AuxiliaryFailed(ChatError),
}

enum Outbound {
    Text(String),
    Close,
}

/// Hands frames to the socket writer task.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl FrameSink for ChannelSink {
    fn send_text(&mut self, text: &str) -> Result<(), ChatError> {
        self.tx
            .send(Outbound::Text(text.to_string()))
            .map_err(|_| ChatError::ConnectionDropped { reason: "socket writer stopped".into() })
    }

    fn close(&mut self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

pub struct ChatClient {
    config: ClientConfig,
    manager: ConnectionManager<ChannelSink>,
    conversation: ConversationMachine,
    events: mpsc::UnboundedReceiver<ChatEvent>,
    context: ContextClient,
    context_status: Option<ContextStatus>,
    fast_mode: bool,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let mut manager = ConnectionManager::new(config.reconnect_policy());
        manager.on_event(move |event| {
            let _ = tx.send(event);
        });

        Self {
            conversation: ConversationMachine::new(TurnSettings::from(&config)),
            context: ContextClient::new(&config),
            config,
            manager,
            events,
            context_status: None,
            fast_mode: false,
        }
    }

    pub fn conversation(&self) -> &ConversationMachine {
        &self.conversation
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn context_status(&self) -> Option<ContextStatus> {
        self.context_status
    }

    pub fn fast_mode(&self) -> bool {
        self.fast_mode
    }

    /// Runs until [`ClientCommand::Shutdown`] arrives or the command channel
    /// closes, then hands the client back for inspection.
    pub async fn run<F>(mut self, mut commands: mpsc::UnboundedReceiver<ClientCommand>, mut observer: F) -> Self
    where
        F: FnMut(&ConversationMachine, &ClientUpdate),
    {
        let mut inbound: Option<WsReader> = None;
        let mut reconnect_at = Some(Instant::now());
        let mut published = self.manager.state();
        let mut characters_loaded = false;

        let period = self.config.status_poll_interval();
        let mut status_tick = tokio::time::interval_at(Instant::now() + period, period);
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if reconnect_at.is_some_and(|at| at <= Instant::now()) {
                reconnect_at = None;
                if self.manager.begin_connect() {
                    self.publish_connection(&mut published, &mut observer);
                    match self.open_socket().await {
                        Ok(reader) => inbound = Some(reader),
                        Err(e) => reconnect_at = schedule(self.manager.on_connect_failed(&e)),
                    }
                }
            }
            self.drain_events(&mut observer);
            self.publish_connection(&mut published, &mut observer);
            if !characters_loaded && self.manager.is_open() {
                characters_loaded = true;
                self.load_characters(&mut observer).await;
            }

            // User commands go first so a submit is settled before more frames land.
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command, &mut observer).await,
                },
                frame = next_frame(&mut inbound) => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.manager.on_frame(&text),
                    Some(Ok(WsMessage::Close(close))) => {
                        inbound = None;
                        let reason = close
                            .map(|c| c.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        reconnect_at = schedule(self.manager.on_close(reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        inbound = None;
                        reconnect_at = schedule(self.manager.on_close(e.to_string()));
                    }
                    None => {
                        inbound = None;
                        reconnect_at = schedule(self.manager.on_close("stream ended"));
                    }
                },
                _ = wait_until(reconnect_at) => {}
                _ = status_tick.tick() => self.refresh_status(&mut observer).await,
            }
        }

        info!("Shutting down chat client");
        self.manager.close();
        self.manager.on_close("client shutdown");
        self.drain_events(&mut observer);
        self.publish_connection(&mut published, &mut observer);
        self
    }

    async fn open_socket(&mut self) -> Result<WsReader, ChatError> {
        let url = self.config.ws_url.clone();
        let limit = self.config.connect_timeout();
        let (stream, _) = tokio::time::timeout(limit, connect_async(url.as_str()))
            .await
            .map_err(|_| ChatError::connect_failed(&url, format!("no handshake within {limit:?}")))?
            .map_err(|e| ChatError::connect_failed(&url, e))?;
        let (mut write, read) = stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                let result = match outbound {
                    Outbound::Text(text) => write.send(WsMessage::Text(text)).await,
                    Outbound::Close => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    debug!("Socket writer stopped: {e}");
                    break;
                }
            }
        });

        self.manager.on_open(ChannelSink { tx });
        Ok(read)
    }

    async fn handle_command<F>(&mut self, command: ClientCommand, observer: &mut F)
    where
        F: FnMut(&ConversationMachine, &ClientUpdate),
    {
        match command {
            ClientCommand::Submit(text) => match self.conversation.submit(&text) {
                Ok(submitted) => {
                    observer(&self.conversation, &ClientUpdate::Conversation(submitted.effects));
                    if !self.manager.send(&submitted.frame) {
                        let effects = self.conversation.abort_turn(&ChatError::NotConnected);
                        observer(&self.conversation, &ClientUpdate::Conversation(effects));
                    }
                }
                Err(e) => observer(&self.conversation, &ClientUpdate::Rejected(e)),
            },
            ClientCommand::ToggleFastMode => {
                let enabled = !self.fast_mode;
                if self.manager.send(&ClientFrame::toggle_fast_mode(enabled)) {
                    self.fast_mode = enabled;
                } else {
                    observer(&self.conversation, &ClientUpdate::Rejected(ChatError::NotConnected));
                }
            }
            ClientCommand::RefreshStatus => self.refresh_status(observer).await,
            ClientCommand::ClearContext => match self.context.clear().await {
                Ok(()) => {
                    let effects = self.conversation.clear();
                    observer(&self.conversation, &ClientUpdate::Conversation(effects));
                    self.refresh_status(observer).await;
                }
                Err(e) => {
                    warn!("{e}");
                    observer(&self.conversation, &ClientUpdate::AuxiliaryFailed(e));
                }
            },
            ClientCommand::TrimContext(target) => match self.context.trim(target).await {
                Ok(outcome) => {
                    observer(&self.conversation, &ClientUpdate::Trimmed(outcome));
                    self.refresh_status(observer).await;
                }
                Err(e) => {
                    warn!("{e}");
                    observer(&self.conversation, &ClientUpdate::AuxiliaryFailed(e));
                }
            },
            ClientCommand::AddKeyEvent(event) => match self.context.add_event(&event).await {
                Ok(events) => observer(&self.conversation, &ClientUpdate::KeyEvents(events)),
                Err(e) => {
                    warn!("{e}");
                    observer(&self.conversation, &ClientUpdate::AuxiliaryFailed(e));
                }
            },
            ClientCommand::ListKeyEvents => match self.context.events().await {
                Ok(events) => observer(&self.conversation, &ClientUpdate::KeyEvents(events)),
                Err(e) => {
                    warn!("{e}");
                    observer(&self.conversation, &ClientUpdate::AuxiliaryFailed(e));
                }
            },
            ClientCommand::Shutdown => {}
        }
    }

    /// Seeds the reply speaker from the service's character list. Optional:
    /// a failure only leaves replies labelled by role.
    async fn load_characters<F>(&mut self, observer: &mut F)
    where
        F: FnMut(&ConversationMachine, &ClientUpdate),
    {
        match self.context.current_characters().await {
            Ok(characters) => {
                if let Some(name) = characters.assistant_name() {
                    self.conversation.set_assistant_name(name);
                }
                observer(&self.conversation, &ClientUpdate::Characters(characters));
            }
            Err(e) => debug!("{e}"),
        }
    }

    async fn refresh_status<F>(&mut self, observer: &mut F)
    where
        F: FnMut(&ConversationMachine, &ClientUpdate),
    {
        match self.context.status().await {
            Ok(status) => {
                self.context_status = Some(status);
                observer(&self.conversation, &ClientUpdate::Status(status));
            }
            Err(e) => {
                warn!("{e}; keeping previous status");
                observer(&self.conversation, &ClientUpdate::AuxiliaryFailed(e));
            }
        }
    }

    fn drain_events<F>(&mut self, observer: &mut F)
    where
        F: FnMut(&ConversationMachine, &ClientUpdate),
    {
        // The terminal always shows the newest output.
        let viewport = Viewport::default();
        while let Ok(event) = self.events.try_recv() {
            if let ChatEvent::Control { notice: Some(notice) } = &event {
                observer(&self.conversation, &ClientUpdate::Notice(notice.clone()));
            }
            let effects = self.conversation.apply(event, &viewport);
            if !effects.is_empty() {
                observer(&self.conversation, &ClientUpdate::Conversation(effects));
            }
        }
    }

    fn publish_connection<F>(&self, published: &mut ConnectionState, observer: &mut F)
    where
        F: FnMut(&ConversationMachine, &ClientUpdate),
    {
        let state = self.manager.state();
        if state != *published {
            *published = state;
            observer(&self.conversation, &ClientUpdate::Connection(state));
        }
    }
}

fn schedule(delay: Option<std::time::Duration>) -> Option<Instant> {
    delay.map(|d| Instant::now() + d)
}

async fn next_frame(inbound: &mut Option<WsReader>) -> Option<Result<WsMessage, tungstenite::Error>> {
    match inbound.as_mut() {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
