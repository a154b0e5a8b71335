//! httpwire - HTTP client transport engine
//!
//! Wire-level HTTP for clients: a pooled, TLS-secured connection layer with
//! ALPN negotiation, an HTTP/1.1 codec, and an HTTP/2 multiplexer with HPACK
//! header compression and flow control. Callers hand a request to
//! [`Transport::send`] and get a response back.
//!
//! - [`transport`]: the request router and cancellation
//! - [`net`]: connectors and the connection pool
//! - [`http`]: message types and both protocol versions
//! - [`config`]: transport configuration

pub mod config;
pub mod http;
pub mod net;
pub mod transport;

pub use config::{TransportConfig, TransportConfigBuilder};
pub use http::{Headers, HttpRequest, HttpResponse, Method, Status, Version};
pub use transport::{Cancellation, CancellationHandle, Error, Transport};
