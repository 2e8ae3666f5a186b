//! Session state shared between the client and server sides.
//!
//! A session walks the states below; `Broken` is absorbing except for an
//! explicit re-establishment, and while a session is `Broken` its send queue
//! is not drained.
//!
//! ```text
//! Disconnected → PreInit → InitCmdSent → InitRspRcvd → ReadyToSend ⇄ WindowFull
//!                                                            ↓
//!                                                      CloseCmdSent → CloseRspRcvd → Disconnected
//!                                                            ↓
//!                                                         Broken
//! ```

/// Protocol state of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    /// Transport is up, open exchange not yet started.
    PreInit,
    /// `open` sent, waiting for the server's response.
    InitCmdSent,
    /// Server offers received and processed.
    InitRspRcvd,
    ReadyToSend,
    /// The unacked list reached the window size; sends must wait for acks.
    WindowFull,
    CloseCmdSent,
    CloseRspRcvd,
    /// The session is unusable until re-established.
    Broken,
}

impl SessionState {
    /// States in which user frames may be admitted for sending.
    pub fn can_send(self) -> bool {
        self == SessionState::ReadyToSend
    }

    /// Terminal or recovery-only states.
    pub fn is_down(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Broken)
    }
}
