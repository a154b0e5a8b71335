//! HTTP/2 client protocol implementation
//!
//! # Architecture
//!
//! One [`H2Connection`] owns one physical connection and multiplexes any
//! number of concurrent requests over it:
//!
//! - the **reader task** is the only code reading from the socket; it decodes
//!   frames with [`FrameCodec`], owns the HPACK decoder and dispatches each
//!   frame to the owning stream
//! - the **writer task** owns the write half and writes whole frames, in the
//!   order they were queued
//! - callers share the connection state (streams, windows, settings, HPACK
//!   encoder) behind one mutex whose critical sections never await
//!
//! ## Layers
//!
//! - [`frames`]: typed frame values
//! - [`codec`]: the binary frame layout
//! - [`settings`]: SETTINGS values and validation
//! - [`flow_control`]: send and receive windows
//! - [`stream`]: per-stream state and response accumulation
//! - [`connection`]: the multiplexer
//!
//! # Examples
//!
//! ```no_run
//! use httpwire::http::h2::{H2Config, H2Connection};
//! use httpwire::http::{HttpRequest, Method};
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tcp = TcpStream::connect("127.0.0.1:8080").await?;
//! let conn = H2Connection::handshake(tcp, H2Config::default()).await?;
//!
//! let request = HttpRequest::builder()
//!     .method(Method::Get)
//!     .uri("http://127.0.0.1:8080/")
//!     .build();
//! let response = conn
//!     .send_request(&request, "127.0.0.1:8080", std::future::pending())
//!     .await?;
//! println!("Status: {}", response.status());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod settings;
pub mod stream;

pub use codec::FrameCodec;
pub use connection::{H2Config, H2Connection};
pub use error::{Error, ErrorCode, Result};
pub use frames::{DataFrame, Frame, FrameFlags, FrameType, HeadersFrame, SettingsFrame};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 9113 Section 3.4:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Largest flow-control window (2^31 - 1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
