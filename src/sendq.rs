//! Per-session FIFO of serialized frames awaiting transmission.
//!
//! The queue is mutex-guarded so a sending thread can enqueue while the
//! session task drains. Draining never holds the lock across an await: the
//! drain path pops one buffer, writes as much as the transport accepts, and
//! pushes the remainder back to the front on a partial write.

use crate::sendbuf::SendBuf;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct SendQueue {
    inner: Mutex<VecDeque<SendBuf>>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a frame behind everything already pending.
    pub fn push_back(&self, buf: SendBuf) {
        self.inner.lock().unwrap().push_back(buf);
    }

    /// Return a partially written buffer to the head of the queue so frame
    /// bytes are never interleaved on the wire.
    pub fn push_front(&self, buf: SendBuf) {
        self.inner.lock().unwrap().push_front(buf);
    }

    /// Take the next buffer to transmit, if any.
    pub fn pop_front(&self) -> Option<SendBuf> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Empty means nothing is pending for this session.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
