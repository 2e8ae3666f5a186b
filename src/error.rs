// ABOUTME: RELP error types covering the full fixed error-code space of the protocol engine
// ABOUTME: Provides structured error reporting with automatic conversion from underlying I/O errors

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io;
use thiserror::Error;

/// Base offset for the numeric error-code space.
///
/// All non-OK codes are reported as `RELP_ERR_BASE + offset`, so embedders can
/// distinguish RELP codes from their own without collisions.
pub const RELP_ERR_BASE: u32 = 10_000;

/// The fixed, monotonically numbered RELP status-code space.
///
/// `Ok` is always `0`; every other code is an offset added to [`RELP_ERR_BASE`].
/// `SessionClosed` signals a *normal* close, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ErrorCode {
    Ok = 0,
    OutOfMemory = 1,
    InvalidFrame = 2,
    ParamError = 3,
    InvalidPort = 4,
    CouldNotBind = 5,
    AcceptErr = 6,
    SessionBroken = 7,
    SessionClosed = 8,
    InvalidCmd = 9,
    DataTooLong = 10,
    InvalidTxnr = 11,
    InvalidDatalen = 12,
    PartialWrite = 13,
    IoErr = 14,
    TimedOut = 15,
    NotFound = 16,
    NotImplemented = 17,
    InvalidRspHdr = 18,
    EndOfData = 19,
    RspStateErr = 20,
    InvalidOffer = 21,
    UnknownCmd = 22,
    CmdDisabled = 23,
    InvalidHdl = 24,
    IncompatOffers = 25,
    RqdFeatMissing = 26,
    MaliciousHname = 27,
    InvalidHname = 28,
    AddrUnknown = 29,
    InvalidParam = 30,
    ErrTlsSetup = 31,
    ErrTlsHands = 32,
    ErrNoTls = 33,
    ErrNoTlsAuth = 34,
    AuthCertInvl = 35,
    AuthNoCert = 36,
    AuthErrFp = 37,
    AuthErrName = 38,
    InvldTlsPrio = 39,
    InvldWildcard = 40,
    InvldAuthMd = 41,
    ErrEpollCtl = 42,
    ZlibErr = 43,
    WrnNoKeepalive = 44,
}

impl ErrorCode {
    /// Numeric representation relative to [`RELP_ERR_BASE`]. `Ok` stays `0`.
    pub fn numeric(self) -> u32 {
        match self {
            ErrorCode::Ok => 0,
            other => RELP_ERR_BASE + u32::from(other),
        }
    }
}

/// Error type for all RELP engine operations.
///
/// Variants carry enough context for the embedder callbacks; [`RelpError::code`]
/// maps each variant onto the fixed [`ErrorCode`] space.
#[derive(Debug, Error)]
pub enum RelpError {
    /// A received frame violates the RELP frame grammar
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// DATALEN exceeds the session's configured maximum
    #[error("frame data length {len} exceeds limit of {max} octets")]
    DataTooLong { len: usize, max: usize },

    /// A txnr is out of sequence or out of range
    #[error("invalid txnr {got}, expected {expected}")]
    InvalidTxnr { got: u32, expected: u32 },

    /// DATALEN field could not be rendered or parsed
    #[error("invalid datalen")]
    InvalidDatalen,

    /// The session is broken and must be re-established before further use
    #[error("session broken")]
    SessionBroken,

    /// The session was closed in an orderly fashion (not an error)
    #[error("session closed")]
    SessionClosed,

    /// The command verb in a received frame is not valid here
    #[error("invalid command {0:?}")]
    InvalidCmd(String),

    /// A verb that is not part of the protocol at all
    #[error("unknown command {0:?}")]
    UnknownCmd(String),

    /// The command is known but disabled on this session
    #[error("command {0:?} is disabled on this session")]
    CmdDisabled(&'static str),

    /// A blocking wait exceeded the per-session timeout
    #[error("operation timed out")]
    TimedOut,

    /// A searched entity (e.g. an unacked txnr) was not found
    #[error("no matching entry found")]
    NotFound,

    /// The rsp frame header does not follow `NNN SP text`
    #[error("invalid rsp header")]
    InvalidRspHdr,

    /// Ran out of frame data while a field was still expected
    #[error("unexpected end of frame data")]
    EndOfData,

    /// The peer answered with a non-200 status
    #[error("peer reported status {code}: {text}")]
    RspStateErr { code: u16, text: String },

    /// A malformed offer inside an open exchange
    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    /// Client and server offers cannot be reconciled
    #[error("offers incompatible with peer")]
    IncompatOffers,

    /// A command we require was not offered by the peer
    #[error("peer does not support a required feature")]
    RqdFeatMissing,

    /// Listener port outside the valid range
    #[error("invalid port")]
    InvalidPort,

    /// No listener socket could be bound
    #[error("could not bind listener: {0}")]
    CouldNotBind(String),

    /// accept() on a listener socket failed
    #[error("accept failed: {0}")]
    AcceptErr(io::Error),

    /// I/O error during transport operations
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// An API parameter is out of range or inconsistent
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// TLS credentials or configuration could not be set up
    #[error("tls setup failed: {0}")]
    TlsSetup(String),

    /// The TLS handshake with the peer failed
    #[error("tls handshake failed: {0}")]
    TlsHandshake(String),

    /// The peer certificate chain did not validate
    #[error("certificate validation failed")]
    AuthCertInvalid,

    /// Peer authentication is configured but no certificate was presented
    #[error("peer did not present a certificate")]
    AuthNoCert,

    /// The peer certificate fingerprint is not in the permitted set
    #[error("non-permitted fingerprint {0}")]
    AuthFingerprint(String),

    /// None of the peer's names matched the permitted set
    #[error("no permitted peer name found in {0:?}")]
    AuthName(String),

    /// A permitted-peer pattern has an asterisk in an unsupported place
    #[error("invalid wildcard pattern {0:?}")]
    InvalidWildcard(String),

    /// The peer hostname could not be obtained or is unusable
    #[error("peer hostname invalid or unobtainable")]
    InvalidHostname,

    /// The peer address could not be obtained
    #[error("peer address unknown")]
    AddrUnknown,
}

impl RelpError {
    /// The fixed status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            RelpError::InvalidFrame(_) => ErrorCode::InvalidFrame,
            RelpError::DataTooLong { .. } => ErrorCode::DataTooLong,
            RelpError::InvalidTxnr { .. } => ErrorCode::InvalidTxnr,
            RelpError::InvalidDatalen => ErrorCode::InvalidDatalen,
            RelpError::SessionBroken => ErrorCode::SessionBroken,
            RelpError::SessionClosed => ErrorCode::SessionClosed,
            RelpError::InvalidCmd(_) => ErrorCode::InvalidCmd,
            RelpError::UnknownCmd(_) => ErrorCode::UnknownCmd,
            RelpError::CmdDisabled(_) => ErrorCode::CmdDisabled,
            RelpError::TimedOut => ErrorCode::TimedOut,
            RelpError::NotFound => ErrorCode::NotFound,
            RelpError::InvalidRspHdr => ErrorCode::InvalidRspHdr,
            RelpError::EndOfData => ErrorCode::EndOfData,
            RelpError::RspStateErr { .. } => ErrorCode::RspStateErr,
            RelpError::InvalidOffer(_) => ErrorCode::InvalidOffer,
            RelpError::IncompatOffers => ErrorCode::IncompatOffers,
            RelpError::RqdFeatMissing => ErrorCode::RqdFeatMissing,
            RelpError::InvalidPort => ErrorCode::InvalidPort,
            RelpError::CouldNotBind(_) => ErrorCode::CouldNotBind,
            RelpError::AcceptErr(_) => ErrorCode::AcceptErr,
            RelpError::Io(_) => ErrorCode::IoErr,
            RelpError::InvalidParam(_) => ErrorCode::InvalidParam,
            RelpError::TlsSetup(_) => ErrorCode::ErrTlsSetup,
            RelpError::TlsHandshake(_) => ErrorCode::ErrTlsHands,
            RelpError::AuthCertInvalid => ErrorCode::AuthCertInvl,
            RelpError::AuthNoCert => ErrorCode::AuthNoCert,
            RelpError::AuthFingerprint(_) => ErrorCode::AuthErrFp,
            RelpError::AuthName(_) => ErrorCode::AuthErrName,
            RelpError::InvalidWildcard(_) => ErrorCode::InvldWildcard,
            RelpError::InvalidHostname => ErrorCode::InvalidHname,
            RelpError::AddrUnknown => ErrorCode::AddrUnknown,
        }
    }

    /// Whether this condition leaves the session unusable.
    ///
    /// Transient conditions (timeouts waiting for window space, non-200
    /// responses) do not break the session by themselves.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            RelpError::InvalidFrame(_)
                | RelpError::DataTooLong { .. }
                | RelpError::InvalidTxnr { .. }
                | RelpError::SessionBroken
                | RelpError::InvalidCmd(_)
                | RelpError::NotFound
                | RelpError::Io(_)
                | RelpError::TlsHandshake(_)
                | RelpError::AuthCertInvalid
                | RelpError::AuthNoCert
                | RelpError::AuthFingerprint(_)
                | RelpError::AuthName(_)
        )
    }
}

/// A specialized `Result` type for RELP operations.
pub type RelpResult<T> = Result<T, RelpError>;
