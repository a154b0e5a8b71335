//! HTTP/1.1 client connection
//!
//! One request/response exchange at a time over an async byte stream.

use super::{BoxedSession, BufferPool, HttpRequest, HttpResponse, ResponseParser, Result};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Bytes requested from the socket per read
const READ_CHUNK: usize = 8 * 1024;

/// Outcome of one HTTP/1.1 exchange
#[derive(Debug)]
pub struct Exchange {
    pub response: HttpResponse,
    /// Whether the connection may carry another exchange
    pub reusable: bool,
}

/// HTTP/1.1 client connection
///
/// Borrowing works too: `Http1Connection::new(&mut session)` runs an
/// exchange on a session owned elsewhere, such as a pooled connection.
pub struct Http1Connection<S = BoxedSession> {
    session: S,
    buffers: Arc<BufferPool>,
}

impl<S> Http1Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a connection with its own read buffer pool
    pub fn new(session: S) -> Self {
        Self::with_buffers(session, Arc::new(BufferPool::new(1, 64 * 1024)))
    }

    /// Create a connection drawing read buffers from a shared pool
    pub fn with_buffers(session: S, buffers: Arc<BufferPool>) -> Self {
        Http1Connection { session, buffers }
    }

    /// Write the request and read its response
    ///
    /// The caller must not reuse the session if this returns an error or
    /// if the future is dropped before completion.
    pub async fn send_request(&mut self, request: &HttpRequest, authority: &str) -> Result<Exchange> {
        let wire = request.to_wire(authority)?;
        trace!(
            method = %request.method(),
            target = %request.target(),
            bytes = wire.len(),
            "writing request"
        );
        self.session.write_all(&wire).await?;
        self.session.flush().await?;

        let mut parser = ResponseParser::new(request.method());
        let mut buf = self.buffers.get();
        let result = self.read_response(&mut parser, &mut buf).await;
        self.buffers.put(buf);

        let response = result?;
        let reusable = parser.is_reusable();
        debug!(
            status = response.status().code(),
            body_len = response.body().len(),
            reusable,
            "response received"
        );
        Ok(Exchange { response, reusable })
    }

    async fn read_response(
        &mut self,
        parser: &mut ResponseParser,
        buf: &mut BytesMut,
    ) -> Result<HttpResponse> {
        loop {
            buf.clear();
            buf.reserve(READ_CHUNK);
            let n = self.session.read_buf(buf).await?;
            if n == 0 {
                trace!("peer closed connection");
                return parser.finish();
            }
            if let Some(response) = parser.parse(&buf[..n])? {
                return Ok(response);
            }
        }
    }

    /// Shut down the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.session.shutdown().await?;
        Ok(())
    }

    /// Get a mutable reference to the underlying session
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Recover the underlying session
    pub fn into_inner(self) -> S {
        self.session
    }
}
