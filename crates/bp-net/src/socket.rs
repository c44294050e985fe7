use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use thiserror::Error;
use tracing::debug;

/// Poll granularity for the receive path so a blocked receiver can notice
/// its connection's `unblock` flag without a dedicated wakeup channel.
pub const RECV_POLL_GRANULARITY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("address resolution produced no candidates")]
    NoAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    Ok(usize),
    Timeout,
    Disconnected,
}

/// Ignores SIGPIPE process-wide so a write to a peer that already closed its
/// read side reports as a normal `EPIPE` error instead of killing the
/// process. Call once at process startup before any socket is opened.
#[cfg(unix)]
pub fn init() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
pub fn init() {}

/// A connected, blocking TCP peer.
pub struct Socket {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Socket {
    /// Iterates every address record the resolver returns and connects to
    /// the first that accepts.
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        timeout: Option<Duration>,
    ) -> Result<Self, SocketError> {
        let mut last_err = None;
        for candidate in addr.to_socket_addrs()? {
            let attempt = match timeout {
                Some(t) => TcpStream::connect_timeout(&candidate, t),
                None => TcpStream::connect(candidate),
            };
            match attempt {
                Ok(stream) => return Self::from_stream(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.map(SocketError::Io).unwrap_or(SocketError::NoAddress))
    }

    pub(crate) fn from_stream(stream: TcpStream) -> Result<Self, SocketError> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(RECV_POLL_GRANULARITY))?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn send_bytes(&mut self, buf: &[u8]) -> Result<(), SocketError> {
        self.stream.write_all(buf).map_err(SocketError::Io)
    }

    /// Blocks up to [`RECV_POLL_GRANULARITY`]; `Timeout` means "try the
    /// unblock flag again", not a protocol error.
    pub fn recv_bytes(&mut self, buf: &mut [u8]) -> RecvOutcome {
        match self.stream.read(buf) {
            Ok(0) => RecvOutcome::Disconnected,
            Ok(n) => RecvOutcome::Ok(n),
            Err(ref e)
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                RecvOutcome::Timeout
            }
            Err(err) => {
                debug!(?err, "socket recv error");
                RecvOutcome::Disconnected
            }
        }
    }

    pub fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    /// Duplicates the underlying file descriptor so a receiver thread and a
    /// sender/dispatcher thread can each own a handle: reads on one clone
    /// and writes on the other don't contend, matching a thread-per-role
    /// connection worker pair.
    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(Self { stream: self.stream.try_clone()?, peer: self.peer })
    }
}

pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub fn bind_listen(addr: impl ToSocketAddrs) -> Result<Self, SocketError> {
        Ok(Self { inner: TcpListener::bind(addr)? })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    pub fn accept(&self) -> Result<Socket, SocketError> {
        let (stream, _) = self.inner.accept()?;
        Socket::from_stream(stream)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), SocketError> {
        Ok(self.inner.set_nonblocking(nonblocking)?)
    }

    /// Non-blocking accept for an acceptor loop that must periodically check
    /// a shutdown flag: `Ok(None)` means "no pending connection, try again".
    /// Requires `set_nonblocking(true)` to have been called first.
    pub fn accept_with_poll(&self, poll: Duration) -> Result<Option<Socket>, SocketError> {
        match self.inner.accept() {
            Ok((stream, _)) => Ok(Some(Socket::from_stream(stream)?)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(poll);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}
