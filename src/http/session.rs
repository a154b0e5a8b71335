//! Session operations abstraction
//!
//! Both protocol codecs run over a [`BoxedSession`], so plain TCP, TLS and
//! in-memory pipes are interchangeable underneath them.

use std::fmt;
use std::io;
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

/// Session operations trait
///
/// An async byte stream plus the connection-level queries the pool needs.
pub trait SessionOps: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Whether the peer still has the connection open
    ///
    /// Must not block or consume data.
    fn is_alive(&self) -> bool;

    /// Remote address, when the session runs over a socket
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Type-erased session owned by a pooled connection
pub type BoxedSession = Box<dyn SessionOps>;

impl fmt::Debug for dyn SessionOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer_addr())
            .finish()
    }
}

/// Non-blocking one-byte peek on the socket
///
/// EOF or a hard error means the peer is gone. Pending bytes on an idle
/// plaintext connection mean the peer sent something unsolicited, which
/// also rules out reuse; over TLS they may be post-handshake records, so
/// `allow_pending` accepts them.
fn socket_is_alive(stream: &TcpStream, allow_pending: bool) -> bool {
    let socket = socket2::SockRef::from(stream);
    let mut buf = [MaybeUninit::<u8>::uninit(); 1];
    match socket.peek(&mut buf) {
        Ok(0) => false,
        Ok(_) => allow_pending,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    }
}

impl SessionOps for TcpStream {
    fn is_alive(&self) -> bool {
        socket_is_alive(self, false)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

impl SessionOps for SslStream<TcpStream> {
    fn is_alive(&self) -> bool {
        socket_is_alive(self.get_ref(), true)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.get_ref().peer_addr().ok()
    }
}

/// In-memory pipes have no liveness signal short of reading
impl SessionOps for DuplexStream {
    fn is_alive(&self) -> bool {
        true
    }
}
