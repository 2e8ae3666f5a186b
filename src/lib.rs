//! An implementation of RELP, the Reliable Event Logging Protocol: a framed,
//! acknowledged log transport over TCP with optional TLS.
//!
//! Every frame a client sends is answered by the server; unacknowledged
//! frames are resent after a reconnect, which gives at-least-once delivery
//! (duplicates are possible when an ack is lost, and callers must expect
//! that). Sessions negotiate their feature set in an open handshake and bound
//! the number of outstanding frames with a window.
//!
//! The [`client`] module ships messages; the [`engine`] module hosts
//! listeners and server sessions and hands received messages to an
//! [`engine::EventSink`].

pub mod auth;
pub mod client;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod offers;
pub mod sendbuf;
pub mod sendq;
pub mod server;
pub mod session;
pub mod transport;

mod tls;

#[cfg(test)]
mod tests;

// Re-export the protocol primitives for direct access
pub use command::{CmdState, Command, CommandStates};
pub use frame::{Frame, FrameParser, MAX_TXNR, Txnr, next_txnr};

// Re-export the main embedder API for easy access
pub use client::{ClientBuilder, RelpClient, RelpConnection, RelpSender};
pub use config::{
    AuthMode, DEFAULT_PORT, DnsLookupMode, KeepaliveConfig, ProtocolFamily, SessionConfig,
    TlsSettings,
};
pub use engine::{Engine, EventSink, NullEvents, StopHandle};
pub use error::{ErrorCode, RelpError, RelpResult};
pub use server::ListenerConfig;
pub use session::SessionState;
