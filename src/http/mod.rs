//! HTTP protocol layers
//!
//! This module holds everything that speaks HTTP on top of an established
//! byte stream:
//!
//! - [`message`], [`headers`]: plain request/response values shared by both
//!   protocol versions
//! - [`parser`], [`chunked`], [`client`]: the HTTP/1.1 codec, one exchange at
//!   a time over a [`BoxedSession`]
//! - [`h2`], [`hpack`]: the HTTP/2 framing layer, header compression and
//!   stream multiplexer
//! - [`tls`]: the secure channel negotiator with ALPN
//!
//! # Architecture
//!
//! Both protocol versions run over the same session abstraction:
//!
//! - `SessionOps` is implemented by every async byte stream (plain TCP,
//!   TLS, in-memory duplex pipes in tests)
//! - `BoxedSession` erases the concrete stream so pooled connections and the
//!   protocol codecs do not care whether the bytes are encrypted
//!
//! # Examples
//!
//! ```no_run
//! use httpwire::http::{Http1Connection, HttpRequest, Method};
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> httpwire::http::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:8080").await?;
//! let mut conn = Http1Connection::new(Box::new(stream));
//!
//! let request = HttpRequest::builder()
//!     .method(Method::Get)
//!     .uri("http://127.0.0.1:8080/")
//!     .build();
//! let exchange = conn.send_request(&request, "127.0.0.1:8080").await?;
//! assert_eq!(exchange.response.status().code(), 200);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod chunked;
pub mod client;
pub mod h2;
pub mod headers;
pub mod hpack;
pub mod message;
pub mod parser;
pub mod session;
pub mod tls;

pub use buffer::BufferPool;
pub use client::{Exchange, Http1Connection};
pub use headers::Headers;
pub use message::{HttpRequest, HttpResponse, Method, Status, Version};
pub use parser::{is_keep_alive, ResponseParser};
pub use session::{BoxedSession, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP/1.1 operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Header section too large: {0}")]
    HeadersTooLarge(String),

    #[error("Incomplete message")]
    Incomplete,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Maximum number of header fields per message
pub const MAX_HEADERS: usize = 128;

/// Maximum size of a status line plus header section
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
