//! Pre-serialized frames ready for transmission.
//!
//! A [`SendBuf`] holds the exact on-wire representation of one frame plus a
//! write cursor so partial writes can resume where they left off. The txnr is
//! rendered right-aligned into a nine-octet reserved slot at the start of the
//! buffer; that way a retransmit after reconnect can patch in a new (possibly
//! longer) txnr without reallocating or copying the frame.

use crate::command::Command;
use crate::error::{RelpError, RelpResult};
use crate::frame::{MAX_NUMBER_DIGITS, MAX_TXNR, Txnr};

/// Reserved octets for the txnr slot at the head of the buffer.
const TXNR_SLOT: usize = MAX_NUMBER_DIGITS;

/// What to do on the client when the `rsp` for this frame arrives.
///
/// Kept as a small enum rather than a callback pointer; the set of responses
/// that change session state is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RspAction {
    /// This frame was the `open` command; process server offers.
    OpenAck,
    /// This frame was the `close` command; complete the shutdown handshake.
    CloseAck,
    /// Plain data frame; the ack only releases window space.
    None,
}

/// A serialized frame with write cursor and response action.
#[derive(Debug)]
pub struct SendBuf {
    /// Full backing buffer, starting with the 9-octet txnr slot.
    buf: Vec<u8>,
    /// Decimal length of the currently patched-in txnr.
    txnr_len: usize,
    /// Index of the next unsent octet, relative to `buf`.
    cursor: usize,
    txnr: Txnr,
    on_rsp: RspAction,
}

impl SendBuf {
    /// Serialize a frame for sending.
    ///
    /// The data length is validated against the nine-digit wire limit; the
    /// txnr is the caller's business (the send path assigns it while holding
    /// the session exclusively, so numbering stays consistent).
    pub fn build(txnr: Txnr, cmd: Command, data: &[u8], on_rsp: RspAction) -> RelpResult<SendBuf> {
        if txnr > MAX_TXNR {
            return Err(RelpError::InvalidTxnr {
                got: txnr,
                expected: MAX_TXNR,
            });
        }
        let datalen_str = data.len().to_string();
        if datalen_str.len() > MAX_NUMBER_DIGITS {
            return Err(RelpError::InvalidDatalen);
        }

        let cmd_str = cmd.as_str();
        let mut cap = TXNR_SLOT + 1 + cmd_str.len() + 1 + datalen_str.len() + 1;
        if !data.is_empty() {
            cap += 1 + data.len();
        }

        let mut buf = Vec::with_capacity(cap);
        let txnr_str = txnr.to_string();
        let txnr_len = txnr_str.len();
        buf.resize(TXNR_SLOT - txnr_len, b' ');
        buf.extend_from_slice(txnr_str.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(cmd_str.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(datalen_str.as_bytes());
        if !data.is_empty() {
            buf.push(b' ');
            buf.extend_from_slice(data);
        }
        buf.push(b'\n');

        Ok(SendBuf {
            buf,
            txnr_len,
            cursor: TXNR_SLOT - txnr_len,
            txnr,
            on_rsp,
        })
    }

    /// Patch a new txnr into the already-serialized frame.
    ///
    /// Used when resending unacked frames over a re-established session: the
    /// txnr slot always has room for the full nine digits, so only the head
    /// of the buffer changes. The write cursor is rewound for the resend.
    pub fn rewrite_txnr(&mut self, txnr: Txnr) -> RelpResult<()> {
        if txnr == 0 || txnr > MAX_TXNR {
            return Err(RelpError::InvalidTxnr {
                got: txnr,
                expected: MAX_TXNR,
            });
        }
        let txnr_str = txnr.to_string();
        let len = txnr_str.len();
        self.buf[TXNR_SLOT - len..TXNR_SLOT].copy_from_slice(txnr_str.as_bytes());
        self.txnr = txnr;
        self.txnr_len = len;
        self.cursor = TXNR_SLOT - len;
        Ok(())
    }

    pub fn txnr(&self) -> Txnr {
        self.txnr
    }

    pub fn on_rsp(&self) -> RspAction {
        self.on_rsp
    }

    /// Wire representation of the whole frame (independent of the cursor).
    pub fn wire(&self) -> &[u8] {
        &self.buf[TXNR_SLOT - self.txnr_len..]
    }

    /// The octets still to be written.
    pub fn unsent(&self) -> &[u8] {
        &self.buf[self.cursor..]
    }

    /// Record that `n` octets were accepted by the transport.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.cursor + n <= self.buf.len());
        self.cursor += n;
    }

    /// True once every octet has been handed to the transport.
    pub fn is_done(&self) -> bool {
        self.cursor == self.buf.len()
    }

    /// Rewind the cursor to the start of the frame, e.g. for a resend.
    pub fn rewind(&mut self) {
        self.cursor = TXNR_SLOT - self.txnr_len;
    }
}
