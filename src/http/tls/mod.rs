//! TLS support for HTTP connections
//!
//! The secure channel negotiator: an OpenSSL client context with a TLS 1.2
//! floor, the system trust store and hostname verification, driven
//! asynchronously through `tokio-openssl`. ALPN decides whether the
//! connection speaks HTTP/2 or HTTP/1.1.
//!
//! # Examples
//!
//! ```no_run
//! use httpwire::http::tls::{Protocol, TlsConfig, TlsConnector};
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = TlsConnector::new(&TlsConfig::default())?;
//! let tcp = TcpStream::connect("example.com:443").await?;
//! let (session, protocol) = connector
//!     .negotiate(tcp, "example.com", &[Protocol::Http2, Protocol::Http1])
//!     .await?;
//! println!("negotiated {:?}", protocol.unwrap_or(Protocol::Http1));
//! # drop(session);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod handshake;
pub mod session;

pub use config::{TlsConfig, TlsConfigBuilder, TlsError, TlsVersion};
pub use handshake::{encode_alpn, TlsConnector};
pub use session::{TlsInfo, TlsSession};

use std::fmt;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// Application protocol selected over ALPN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http1,
    Http2,
}

impl Protocol {
    /// ALPN protocol id
    pub fn alpn_id(&self) -> &'static [u8] {
        match self {
            Protocol::Http1 => b"http/1.1",
            Protocol::Http2 => b"h2",
        }
    }

    /// Map an ALPN protocol id back to a protocol
    pub fn from_alpn(id: &[u8]) -> Option<Self> {
        match id {
            b"http/1.1" => Some(Protocol::Http1),
            b"h2" => Some(Protocol::Http2),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Http1 => "http/1.1",
            Protocol::Http2 => "h2",
        })
    }
}
