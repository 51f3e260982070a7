use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::CtfError;
use crate::report_violation_to;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{Received, Transport};

const RECV_BUFFER_SIZE: usize = 4096;
/// Unsent bytes beyond this point usually mean the peer stopped reading.
const SEND_BACKLOG_WARNING: usize = 64 * 1024;
/// Default for [`TcpTransport::with_backlog_limit`].
pub const DEFAULT_BACKLOG_LIMIT: usize = 1024 * 1024;
/// Reads spent discarding unread input on close.
const CLOSE_DRAIN_READS: usize = 16;

/// A non-blocking TCP connection to the peer.
///
/// Reads never block: [`try_receive`](Transport::try_receive) returns [`Received::Empty`]
/// when nothing is available. Writes that the kernel only partially accepts are kept in
/// an internal buffer and flushed on the next call to [`send`](Transport::send).
///
/// Once the buffer holds more than [`backlog_limit`](Self::with_backlog_limit) bytes the
/// peer is considered gone and `send` fails with [`CtfError::Transport`].
///
/// The stream is shut down on [`close`](Transport::close) or when the transport is dropped.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    recv_buffer: [u8; RECV_BUFFER_SIZE],
    /// Bytes accepted by `send` but not yet written to the socket.
    send_backlog: Vec<u8>,
    backlog_limit: usize,
    /// Set once a growing backlog has been reported. Cleared when it drains.
    backlog_warned: bool,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer_addr", &self.peer_addr())
            .field("backlog", &self.send_backlog.len())
            .field("backlog_limit", &self.backlog_limit)
            .field("has_violation_observer", &self.violation_observer.is_some())
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Connects to the peer at `addr` and switches the stream to non-blocking mode.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, CtfError> {
        let stream = TcpStream::connect(addr).map_err(|e| CtfError::transport(&e, "connect"))?;
        Self::from_stream(stream)
    }

    /// Blocks until one peer connects to `listener`, then wraps that connection.
    pub fn accept_one(listener: &TcpListener) -> Result<Self, CtfError> {
        let (stream, peer) = listener
            .accept()
            .map_err(|e| CtfError::transport(&e, "accept"))?;
        debug!("Accepted connection from {}", peer);
        Self::from_stream(stream)
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self, CtfError> {
        stream
            .set_nonblocking(true)
            .map_err(|e| CtfError::transport(&e, "set_nonblocking"))?;
        stream
            .set_nodelay(true)
            .map_err(|e| CtfError::transport(&e, "set_nodelay"))?;
        Ok(Self {
            stream: Some(stream),
            recv_buffer: [0; RECV_BUFFER_SIZE],
            send_backlog: Vec::new(),
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
            backlog_warned: false,
            violation_observer: None,
        })
    }

    /// Sets how many unsent bytes may pile up before `send` gives up on the peer.
    ///
    /// Defaults to [`DEFAULT_BACKLOG_LIMIT`].
    #[must_use]
    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self
    }

    /// Sets the observer told when the peer falls behind.
    ///
    /// Use the same observer as the session so every violation ends up in one place.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Address of the remote end, if still connected.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    /// `true` until [`close`](Transport::close) has been called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Bytes waiting to be written.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.send_backlog.len()
    }

    fn flush_backlog(&mut self) -> Result<(), CtfError> {
        let Self {
            stream,
            send_backlog,
            ..
        } = self;
        let stream = stream.as_mut().ok_or_else(not_connected)?;
        while !send_backlog.is_empty() {
            match stream.write(send_backlog.as_slice()) {
                Ok(0) => {
                    return Err(CtfError::Transport {
                        kind: ErrorKind::WriteZero,
                        context: "peer stopped accepting data".to_string(),
                    })
                }
                Ok(written) => {
                    send_backlog.drain(..written);
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(CtfError::transport(&err, "write")),
            }
        }
        Ok(())
    }
}

fn not_connected() -> CtfError {
    CtfError::Transport {
        kind: ErrorKind::NotConnected,
        context: "transport already closed".to_string(),
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), CtfError> {
        if self.stream.is_none() {
            return Err(not_connected());
        }
        self.send_backlog.extend_from_slice(bytes);
        self.flush_backlog()?;

        let backlog = self.send_backlog.len();
        if backlog > self.backlog_limit {
            return Err(CtfError::Transport {
                kind: ErrorKind::WouldBlock,
                context: format!(
                    "{backlog} unsent bytes exceed the backlog limit of {}",
                    self.backlog_limit
                ),
            });
        }
        if backlog > SEND_BACKLOG_WARNING.min(self.backlog_limit) {
            if !self.backlog_warned {
                self.backlog_warned = true;
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Warning,
                    ViolationKind::NetworkProtocol,
                    "{} bytes queued for a peer that is not reading",
                    backlog
                );
            }
        } else if backlog == 0 {
            self.backlog_warned = false;
        }
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Received, CtfError> {
        let Self {
            stream,
            recv_buffer,
            ..
        } = self;
        let stream = stream.as_mut().ok_or_else(not_connected)?;
        match stream.read(recv_buffer) {
            Ok(0) => Err(CtfError::Transport {
                kind: ErrorKind::UnexpectedEof,
                context: "peer closed the connection".to_string(),
            }),
            Ok(len) => {
                trace!("Received {} bytes", len);
                Ok(Received::Data(recv_buffer.get(..len).unwrap_or_default().to_vec()))
            }
            Err(ref err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(Received::Empty)
            }
            Err(err) => Err(CtfError::transport(&err, "read")),
        }
    }

    fn close(&mut self) {
        if self.stream.is_none() {
            return;
        }
        if let Err(err) = self.flush_backlog() {
            debug!("Dropping unsent bytes on close: {}", err);
        }
        if !self.send_backlog.is_empty() {
            debug!("Dropping {} unsent bytes on close", self.send_backlog.len());
        }
        if let Some(mut stream) = self.stream.take() {
            // Half-close so the peer reads everything we wrote before it sees EOF.
            if let Err(err) = stream.shutdown(Shutdown::Write) {
                debug!("Shutdown after peer already left: {}", err);
            }
            // Unread input at close time makes the kernel reset the connection.
            for _ in 0..CLOSE_DRAIN_READS {
                match stream.read(&mut self.recv_buffer) {
                    Ok(0) => break,
                    Ok(len) => trace!("Discarded {} unread bytes on close", len),
                    Err(ref err) if err.kind() == ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
            debug!("Transport closed");
        }
        self.send_backlog.clear();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::telemetry::CollectingObserver;
    use std::time::Duration;

    fn loopback_pair() -> (TcpTransport, TcpTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpTransport::connect(addr).unwrap();
        let server = TcpTransport::accept_one(&listener).unwrap();
        (client, server)
    }

    #[track_caller]
    fn receive_with_retry(transport: &mut TcpTransport, expected_len: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for _ in 0..100 {
            if let Received::Data(chunk) = transport.try_receive().unwrap() {
                bytes.extend(chunk);
            }
            if bytes.len() >= expected_len {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        bytes
    }

    #[test]
    #[cfg(not(miri))]
    fn empty_read_does_not_block() {
        let (mut client, _server) = loopback_pair();
        assert_eq!(client.try_receive().unwrap(), Received::Empty);
    }

    #[test]
    #[cfg(not(miri))]
    fn bytes_arrive_in_order() {
        let (mut client, mut server) = loopback_pair();
        client.send(b"Start\n").unwrap();
        client.send(b"2\n").unwrap();
        assert_eq!(receive_with_retry(&mut server, 8), b"Start\n2\n");
    }

    #[test]
    #[cfg(not(miri))]
    fn peer_close_is_a_transport_error() {
        let (mut client, mut server) = loopback_pair();
        server.close();
        let mut outcome = Ok(Received::Empty);
        for _ in 0..100 {
            outcome = client.try_receive();
            if outcome.is_err() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(matches!(outcome, Err(CtfError::Transport { .. })));
    }

    #[test]
    #[cfg(not(miri))]
    #[serial_test::serial]
    fn stalled_peer_fails_the_send_once_the_limit_is_passed() {
        let observer = Arc::new(CollectingObserver::new());
        let (client, _server) = loopback_pair();
        let mut client = client
            .with_backlog_limit(256 * 1024)
            .with_violation_observer(observer.clone());
        let chunk = vec![b'7'; 64 * 1024];

        let mut outcome = Ok(());
        for _ in 0..1024 {
            outcome = client.send(&chunk);
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(
            outcome,
            Err(CtfError::Transport {
                kind: ErrorKind::WouldBlock,
                ..
            })
        ));
        assert!(client.backlog() > 256 * 1024);
        assert_eq!(
            observer
                .violations_of_kind(ViolationKind::NetworkProtocol)
                .len(),
            1
        );
    }

    #[test]
    #[cfg(not(miri))]
    fn close_delivers_the_last_write() {
        let (mut client, mut server) = loopback_pair();
        server.send(b"S2 1.0 2.0\n").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        client.send(b"Exit 1\n").unwrap();
        client.close();

        let mut bytes = Vec::new();
        for _ in 0..100 {
            match server.try_receive() {
                Ok(Received::Data(chunk)) => bytes.extend(chunk),
                Ok(Received::Empty) => std::thread::sleep(Duration::from_millis(10)),
                Err(_) => break,
            }
        }
        assert_eq!(bytes, b"Exit 1\n");
    }

    #[test]
    #[cfg(not(miri))]
    fn close_is_idempotent() {
        let (mut client, _server) = loopback_pair();
        client.close();
        client.close();
        assert!(!client.is_open());
        assert!(matches!(
            client.send(b"Reset\n"),
            Err(CtfError::Transport {
                kind: ErrorKind::NotConnected,
                ..
            })
        ));
    }
}
