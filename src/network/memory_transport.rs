//! An in-process, deterministic [`Transport`] pair.
//!
//! [`MemoryTransport::pair`] returns two connected ends backed by shared byte queues. Bytes
//! are delivered reliably and in order, like a TCP stream, but without a kernel: a test
//! decides exactly when the peer reads, how reads are chunked and when the link drops.
//!
//! ```
//! use flagline::{MemoryTransport, Received, Transport};
//!
//! let (mut a, b) = MemoryTransport::pair();
//! let mut b = b.with_max_chunk(3);
//! a.send(b"Reset\n").unwrap();
//! assert_eq!(b.try_receive().unwrap(), Received::Data(b"Res".to_vec()));
//! assert_eq!(b.try_receive().unwrap(), Received::Data(b"et\n".to_vec()));
//! assert_eq!(b.try_receive().unwrap(), Received::Empty);
//! ```

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CtfError;
use crate::{Received, Transport};

#[derive(Debug, Default)]
struct Pipe {
    bytes: VecDeque<u8>,
    // No more bytes will be written; the reader sees EOF once drained.
    closed: bool,
}

type SharedPipe = Arc<Mutex<Pipe>>;

/// One end of an in-memory connection. See the [module docs](self).
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: SharedPipe,
    inbound: SharedPipe,
    max_chunk: usize,
    open: bool,
    close_calls: Arc<AtomicU32>,
}

impl MemoryTransport {
    /// Creates two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a_to_b = SharedPipe::default();
        let b_to_a = SharedPipe::default();
        let a = Self::new(a_to_b.clone(), b_to_a.clone());
        let b = Self::new(b_to_a, a_to_b);
        (a, b)
    }

    fn new(outbound: SharedPipe, inbound: SharedPipe) -> Self {
        Self {
            outbound,
            inbound,
            max_chunk: usize::MAX,
            open: true,
            close_calls: Arc::default(),
        }
    }

    /// Limits every [`try_receive`](Transport::try_receive) to at most `max_chunk` bytes,
    /// so a single message arrives split across several reads. Zero is treated as one.
    #[must_use]
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    /// Returns a probe that can observe and disturb this end after the transport has been
    /// handed to a session.
    #[must_use]
    pub fn probe(&self) -> LinkProbe {
        LinkProbe {
            outbound: self.outbound.clone(),
            inbound: self.inbound.clone(),
            close_calls: self.close_calls.clone(),
        }
    }

    fn shut(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.outbound.lock().closed = true;
        self.inbound.lock().closed = true;
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), CtfError> {
        if !self.open {
            return Err(CtfError::Transport {
                kind: ErrorKind::NotConnected,
                context: "transport already closed".to_string(),
            });
        }
        let mut pipe = self.outbound.lock();
        if pipe.closed {
            return Err(CtfError::Transport {
                kind: ErrorKind::BrokenPipe,
                context: "peer closed the connection".to_string(),
            });
        }
        pipe.bytes.extend(bytes);
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Received, CtfError> {
        if !self.open {
            return Err(CtfError::Transport {
                kind: ErrorKind::NotConnected,
                context: "transport already closed".to_string(),
            });
        }
        let mut pipe = self.inbound.lock();
        if pipe.bytes.is_empty() {
            if pipe.closed {
                return Err(CtfError::Transport {
                    kind: ErrorKind::UnexpectedEof,
                    context: "peer closed the connection".to_string(),
                });
            }
            return Ok(Received::Empty);
        }
        let len = pipe.bytes.len().min(self.max_chunk);
        Ok(Received::Data(pipe.bytes.drain(..len).collect()))
    }

    fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        self.shut();
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.shut();
    }
}

/// Test handle onto one end of a [`MemoryTransport`] pair.
#[derive(Debug, Clone)]
pub struct LinkProbe {
    outbound: SharedPipe,
    inbound: SharedPipe,
    close_calls: Arc<AtomicU32>,
}

impl LinkProbe {
    /// Queues raw bytes as if the peer had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        self.inbound.lock().bytes.extend(bytes);
    }

    /// Drops the link in both directions. Both ends see a transport error once drained.
    pub fn sever(&self) {
        self.outbound.lock().closed = true;
        self.inbound.lock().closed = true;
    }

    /// Number of times [`Transport::close`] was called on the probed end.
    #[must_use]
    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::Relaxed)
    }

    /// `true` once the probed end can no longer send.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.lock().closed
    }

    /// Bytes sent by the probed end that the peer has not read yet.
    #[must_use]
    pub fn unread_outbound(&self) -> usize {
        self.outbound.lock().bytes.len()
    }
}
