// ABOUTME: RELP client module providing the builder, session type and trait seams
// ABOUTME: Exports everything an embedder needs to ship acknowledged syslog over RELP

//! RELP client.
//!
//! The client owns one session at a time: connect runs the open handshake,
//! sends travel under a window of unacked frames, and a broken session can be
//! re-established transparently (with the unacked frames resent) when
//! auto-retry is enabled.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use relp::client::ClientBuilder;
//!
//! # async fn example() -> relp::RelpResult<()> {
//! let mut client = ClientBuilder::new("logs.example.com")
//!     .auto_retry(true)
//!     .connect()
//!     .await?;
//!
//! client.send_syslog(b"<13>Jul  1 12:00:00 host app: hello").await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! * [`ClientBuilder`] - configuration collection and the connect sequence
//! * [`RelpClient`] - the established session with its window and ack state
//! * [`RelpConnection`] / [`RelpSender`] - trait seams for embedders that
//!   abstract over client implementations

pub mod builder;
pub mod session;
pub mod traits;

pub use builder::ClientBuilder;
pub use session::RelpClient;
pub use traits::{RelpConnection, RelpSender};
