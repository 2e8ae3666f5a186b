//! Provides a type representing a RELP protocol frame as well as a restartable
//! state machine for folding a raw octet stream into frames.
//!
//! The wire syntax of a frame is
//!
//! ```text
//! TXNR SP CMD SP DATALEN [SP DATA] LF
//! ```
//!
//! where `TXNR` and `DATALEN` are decimal numbers of at most nine digits,
//! `CMD` is 1..32 alphabetic characters and `DATA` is exactly `DATALEN`
//! octets. When `DATALEN` is zero the SP before `DATA` is omitted and the
//! trailer follows the length directly. The parser consumes octets one at a
//! time and therefore survives frames split across arbitrary read-chunk (or
//! TLS-record) boundaries.

use crate::error::{RelpError, RelpResult};
use bytes::{Bytes, BytesMut};

/// Transaction number identifying a request/response pair on one session.
pub type Txnr = u32;

/// Largest assignable txnr; the next one wraps to 1. Zero is reserved for
/// unsolicited server-to-client hint frames.
pub const MAX_TXNR: Txnr = 999_999_999;

/// Maximum number of decimal digits in the TXNR and DATALEN fields.
pub const MAX_NUMBER_DIGITS: usize = 9;

/// Maximum length of the CMD field in octets.
pub const MAX_CMD_LEN: usize = 32;

/// Advance a txnr, wrapping from [`MAX_TXNR`] back to 1.
pub const fn next_txnr(txnr: Txnr) -> Txnr {
    if txnr >= MAX_TXNR { 1 } else { txnr + 1 }
}

/// One fully received RELP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub txnr: Txnr,
    pub cmd: String,
    pub data: Bytes,
}

/// A parsed `rsp` frame body: status code, human-readable text and whatever
/// data follows the text's LF delimiter (the server offers, for `open`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rsp {
    pub code: u16,
    pub text: String,
    pub body: Bytes,
}

impl Rsp {
    pub fn is_ok(&self) -> bool {
        self.code == 200
    }
}

/// Longest rsp text we accept before requiring the LF delimiter.
const MAX_RSP_TEXT: usize = 80;

impl Frame {
    /// Parse this frame's data area as a `rsp` body.
    ///
    /// The body is `NNN SP text [LF extra]`. An empty data area counts as a
    /// bare success (the response to `close` carries no body at all).
    pub fn parse_rsp(&self) -> RelpResult<Rsp> {
        if self.data.is_empty() {
            return Ok(Rsp {
                code: 200,
                text: String::new(),
                body: Bytes::new(),
            });
        }

        let data = &self.data[..];
        if data.len() < 3 {
            return Err(RelpError::InvalidRspHdr);
        }
        let mut code: u16 = 0;
        for &c in &data[..3] {
            if !c.is_ascii_digit() {
                return Err(RelpError::InvalidRspHdr);
            }
            code = code * 10 + u16::from(c - b'0');
        }

        // the SP separator is mandatory whenever a body is present at all;
        // a bare status code with nothing after it is malformed
        let mut pos = 3;
        if pos >= data.len() || data[pos] != b' ' {
            return Err(RelpError::InvalidRspHdr);
        }
        pos += 1;

        let text_start = pos;
        while pos < data.len() && data[pos] != b'\n' && pos - text_start < MAX_RSP_TEXT {
            pos += 1;
        }
        let text = String::from_utf8_lossy(&data[text_start..pos]).into_owned();

        // everything after the LF delimiter is response payload
        let body = if pos < data.len() && data[pos] == b'\n' {
            self.data.slice(pos + 1..)
        } else {
            Bytes::new()
        };

        Ok(Rsp { code, text, body })
    }
}

/// Receive states of the frame parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    BeginFrame,
    InTxnr,
    InCmd,
    InDatalen,
    InData,
    InTrailer,
}

/// Stateful octet consumer that builds [`Frame`]s from the transport stream.
///
/// The parser enforces the grammar as it goes: digit-count bounds, the
/// alphabetic command rule and the session's `max_data_size` cap are all
/// checked at the earliest octet that can violate them. After an error the
/// parser is useless and the session must be torn down.
#[derive(Debug)]
pub struct FrameParser {
    state: RxState,
    max_data_size: usize,
    txnr: Txnr,
    ndigits: usize,
    cmd: String,
    datalen: usize,
    data: BytesMut,
}

impl FrameParser {
    pub fn new(max_data_size: usize) -> Self {
        FrameParser {
            state: RxState::BeginFrame,
            max_data_size,
            txnr: 0,
            ndigits: 0,
            cmd: String::new(),
            datalen: 0,
            data: BytesMut::new(),
        }
    }

    /// Discard any partially received frame, e.g. on reconnect.
    pub fn reset(&mut self) {
        self.state = RxState::BeginFrame;
        self.txnr = 0;
        self.ndigits = 0;
        self.cmd.clear();
        self.datalen = 0;
        self.data = BytesMut::new();
    }

    /// Feed a chunk of received octets, appending every completed frame to
    /// `out`. Frames may span any number of chunks.
    pub fn consume(&mut self, chunk: &[u8], out: &mut Vec<Frame>) -> RelpResult<()> {
        let mut i = 0;
        while i < chunk.len() {
            // bulk fast path for the data area
            if self.state == RxState::InData {
                let needed = self.datalen - self.data.len();
                let take = needed.min(chunk.len() - i);
                self.data.extend_from_slice(&chunk[i..i + take]);
                i += take;
                if self.data.len() == self.datalen {
                    self.state = RxState::InTrailer;
                }
                continue;
            }
            if let Some(frame) = self.feed(chunk[i])? {
                out.push(frame);
            }
            i += 1;
        }
        Ok(())
    }

    /// Process one received octet, advancing the state machine.
    fn feed(&mut self, c: u8) -> RelpResult<Option<Frame>> {
        match self.state {
            RxState::BeginFrame => {
                if !c.is_ascii_digit() {
                    return Err(RelpError::InvalidFrame(
                        "txnr must start with a digit".into(),
                    ));
                }
                self.state = RxState::InTxnr;
                self.feed(c)
            }
            RxState::InTxnr => {
                if c.is_ascii_digit() {
                    if self.ndigits == MAX_NUMBER_DIGITS {
                        return Err(RelpError::InvalidFrame("txnr longer than 9 digits".into()));
                    }
                    self.ndigits += 1;
                    self.txnr = self.txnr * 10 + Txnr::from(c - b'0');
                    Ok(None)
                } else if c == b' ' {
                    self.state = RxState::InCmd;
                    self.ndigits = 0;
                    Ok(None)
                } else {
                    Err(RelpError::InvalidFrame("non-digit inside txnr".into()))
                }
            }
            RxState::InCmd => {
                if c.is_ascii_alphabetic() {
                    if self.cmd.len() == MAX_CMD_LEN {
                        return Err(RelpError::InvalidFrame(
                            "command longer than 32 octets".into(),
                        ));
                    }
                    self.cmd.push(c as char);
                    Ok(None)
                } else if c == b' ' {
                    if self.cmd.is_empty() {
                        return Err(RelpError::InvalidFrame("empty command".into()));
                    }
                    self.state = RxState::InDatalen;
                    Ok(None)
                } else {
                    Err(RelpError::InvalidFrame("non-alphabetic inside command".into()))
                }
            }
            RxState::InDatalen => {
                if c.is_ascii_digit() {
                    if self.ndigits == MAX_NUMBER_DIGITS {
                        return Err(RelpError::InvalidFrame(
                            "datalen longer than 9 digits".into(),
                        ));
                    }
                    self.ndigits += 1;
                    self.datalen = self.datalen * 10 + usize::from(c - b'0');
                    Ok(None)
                } else if self.datalen == 0 {
                    // no data part at all, this octet already is the trailer
                    self.state = RxState::InTrailer;
                    self.feed(c)
                } else if c == b' ' {
                    if self.datalen > self.max_data_size {
                        return Err(RelpError::DataTooLong {
                            len: self.datalen,
                            max: self.max_data_size,
                        });
                    }
                    self.data = BytesMut::with_capacity(self.datalen);
                    self.state = RxState::InData;
                    Ok(None)
                } else {
                    Err(RelpError::InvalidFrame("invalid datalen terminator".into()))
                }
            }
            RxState::InData => {
                self.data.extend_from_slice(&[c]);
                if self.data.len() == self.datalen {
                    self.state = RxState::InTrailer;
                }
                Ok(None)
            }
            RxState::InTrailer => {
                if c != b'\n' {
                    return Err(RelpError::InvalidFrame("missing LF trailer".into()));
                }
                let frame = Frame {
                    txnr: self.txnr,
                    cmd: std::mem::take(&mut self.cmd),
                    data: std::mem::take(&mut self.data).freeze(),
                };
                self.txnr = 0;
                self.ndigits = 0;
                self.datalen = 0;
                self.state = RxState::BeginFrame;
                Ok(Some(frame))
            }
        }
    }
}
