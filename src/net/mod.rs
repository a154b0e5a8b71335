//! Connection establishment and pooling
//!
//! A [`Connector`] turns a [`PoolKey`] into a connected byte stream (TCP,
//! then TLS with ALPN for secure keys). The [`ConnectionPool`] keeps those
//! streams for reuse and caps how many exist per key.

pub mod pool;

pub use pool::{ConnectionPermit, ConnectionPool, PoolConfig, PoolKey, PooledConnection};

use crate::config::TransportConfig;
use crate::http::tls::{Protocol, TlsConnector, TlsError, TlsInfo};
use crate::http::BoxedSession;
use futures_util::future::BoxFuture;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Result type for connection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Connection establishment errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Connect to {host}:{port} timed out")]
    ConnectTimeout { host: String, port: u16 },

    #[error("TLS handshake with {host} timed out")]
    HandshakeTimeout { host: String },

    /// Every connection for the key stayed busy past the wait timeout
    #[error("Timed out waiting for a pooled connection to {0}")]
    PoolTimeout(PoolKey),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A freshly established connection
#[derive(Debug)]
pub struct Connected {
    pub session: BoxedSession,
    /// Protocol to speak; HTTP/1.1 unless ALPN selected h2
    pub protocol: Protocol,
    /// Handshake parameters for secure connections
    pub tls: Option<TlsInfo>,
}

/// Opens byte streams for pool keys
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, key: &'a PoolKey) -> BoxFuture<'a, Result<Connected>>;
}

/// TCP connector with TLS for secure keys
#[derive(Clone)]
pub struct TcpConnector {
    tls: TlsConnector,
    protocols: Vec<Protocol>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    nodelay: bool,
    keepalive: Option<Duration>,
}

impl TcpConnector {
    /// Build a connector from the transport configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(TcpConnector {
            tls: TlsConnector::new(config.tls())?,
            protocols: config.alpn_protocols(),
            connect_timeout: config.connect_timeout(),
            handshake_timeout: config.handshake_timeout(),
            nodelay: config.tcp_nodelay(),
            keepalive: config.tcp_keepalive(),
        })
    }

    fn configure_socket(&self, stream: &TcpStream) -> io::Result<()> {
        let socket = SockRef::from(stream);
        socket.set_nodelay(self.nodelay)?;
        if let Some(idle) = self.keepalive {
            socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
        }
        Ok(())
    }

    async fn connect_key(&self, key: &PoolKey) -> Result<Connected> {
        let host = key.host();
        let port = key.port();

        let stream = timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::ConnectTimeout {
                host: host.to_string(),
                port,
            })?
            .map_err(|source| Error::Connect {
                host: host.to_string(),
                port,
                source,
            })?;
        self.configure_socket(&stream)?;
        debug!(%host, port, secure = key.is_secure(), "TCP connected");

        if !key.is_secure() {
            return Ok(Connected {
                session: Box::new(stream),
                protocol: Protocol::Http1,
                tls: None,
            });
        }

        let (session, protocol) = timeout(
            self.handshake_timeout,
            self.tls.negotiate(stream, host, &self.protocols),
        )
        .await
        .map_err(|_| Error::HandshakeTimeout {
            host: host.to_string(),
        })??;

        let info = TlsInfo::from_session(&session);
        Ok(Connected {
            session: Box::new(session),
            protocol: protocol.unwrap_or(Protocol::Http1),
            tls: Some(info),
        })
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, key: &'a PoolKey) -> BoxFuture<'a, Result<Connected>> {
        Box::pin(self.connect_key(key))
    }
}
