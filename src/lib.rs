//! Client core for chatting with the Rhea assistant service.
//!
//! The modules at the top of this list compile for the browser and for
//! native targets alike. `api` and `client` bring in tokio, reqwest and
//! tungstenite and are only built with the `native` feature.

pub mod config;
pub mod connection;
pub mod conversation;
pub mod errors;
pub mod models;
pub mod protocol;

#[cfg(feature = "native")]
pub mod api;
#[cfg(feature = "native")]
pub mod client;

pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState, FrameSink, ReconnectPolicy};
pub use conversation::{Change, ConversationMachine, Effects, TurnPhase, Viewport};
pub use errors::ChatError;
pub use protocol::{ChatEvent, ClientFrame};
