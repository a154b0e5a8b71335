//! HTTP/2 stream management
//!
//! Client-side stream state as defined in RFC 9113 Section 5.1. Push is
//! never enabled, so the reserved states cannot occur:
//!
//! ```text
//!            send HEADERS
//!   idle ───────────────────▶ open ──── recv ES ───▶ half-closed (remote)
//!     │                         │                            │
//!     │ send HEADERS + ES       │ send ES                    │ send ES
//!     ▼                         ▼                            ▼
//!   half-closed (local) ─────── recv ES ──────────────────▶ closed
//!
//!   any state ── send/recv RST_STREAM ──▶ closed
//! ```
//!
//! A stream accumulates the response (status, headers, body, trailers) and
//! resolves its completion handle exactly once.

use super::error::{Error, Result};
use super::flow_control::FlowControl;
use crate::http::hpack::HeaderField;
use crate::http::message::{HttpResponse, Status, Version};
use crate::http::Headers;
use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

/// Stream ID type
pub type StreamId = u32;

/// Completion handle a caller waits on
pub type ResponseSender = oneshot::Sender<Result<HttpResponse>>;

/// Stream state as defined in RFC 9113 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    /// We have sent END_STREAM
    HalfClosedLocal,
    /// The peer has sent END_STREAM
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Whether we may still send DATA
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Whether the peer may still send frames
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// HTTP/2 client stream
#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    flow: FlowControl,
    status: Option<Status>,
    headers: Headers,
    trailers: Headers,
    body: BytesMut,
    body_limit: usize,
    completion: Option<ResponseSender>,
}

impl H2Stream {
    pub fn new(id: StreamId, send_window: u32, recv_window: u32, completion: ResponseSender) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow: FlowControl::new(send_window, recv_window),
            status: None,
            headers: Headers::new(),
            trailers: Headers::new(),
            body: BytesMut::new(),
            body_limit: usize::MAX,
            completion: Some(completion),
        }
    }

    /// Cap on buffered response body bytes
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn flow(&self) -> &FlowControl {
        &self.flow
    }

    pub fn flow_mut(&mut self) -> &mut FlowControl {
        &mut self.flow
    }

    /// Request HEADERS were sent
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        if self.state != StreamState::Idle {
            return Err(Error::Protocol(format!(
                "cannot send HEADERS on stream {} in state {:?}",
                self.id, self.state
            )));
        }
        self.state = if end_stream {
            StreamState::HalfClosedLocal
        } else {
            StreamState::Open
        };
        Ok(())
    }

    /// The last request DATA frame (END_STREAM) was sent
    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Apply a decoded response header block
    ///
    /// Informational (1xx) blocks are discarded. A block arriving after the
    /// final status is a trailer section and must end the stream.
    pub fn receive_headers(&mut self, fields: Vec<HeaderField>, end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }

        if self.status.is_some() {
            if !end_stream {
                return Err(Error::InvalidHeader(format!(
                    "trailers on stream {} without END_STREAM",
                    self.id
                )));
            }
            for field in fields {
                if field.is_pseudo() {
                    return Err(Error::InvalidHeader(format!(
                        "pseudo-header {} in trailers",
                        field.name_str()
                    )));
                }
                let (name, value) = field_strings(&field)?;
                self.trailers.insert(name, value);
            }
            self.receive_end_stream();
            return Ok(());
        }

        let mut status = None;
        let mut headers = Headers::new();
        let mut regular_seen = false;
        for field in fields {
            if field.is_pseudo() {
                if regular_seen {
                    return Err(Error::InvalidHeader(
                        "pseudo-header after regular header".to_string(),
                    ));
                }
                if field.name.as_ref() != b":status" || status.is_some() {
                    return Err(Error::InvalidHeader(format!(
                        "unexpected response pseudo-header {}",
                        field.name_str()
                    )));
                }
                status = Some(parse_status(&field.value)?);
            } else {
                regular_seen = true;
                let (name, value) = field_strings(&field)?;
                headers.insert(name, value);
            }
        }

        let status = status
            .ok_or_else(|| Error::InvalidHeader("response without :status".to_string()))?;

        if status.is_informational() {
            if end_stream {
                return Err(Error::InvalidHeader(
                    "informational response with END_STREAM".to_string(),
                ));
            }
            return Ok(());
        }

        self.status = Some(status);
        self.headers = headers;
        if end_stream {
            self.receive_end_stream();
        }
        Ok(())
    }

    /// Append response DATA in arrival order
    pub fn receive_data(&mut self, data: &[u8], end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }
        if self.status.is_none() {
            return Err(Error::InvalidHeader(format!(
                "DATA before response headers on stream {}",
                self.id
            )));
        }
        if self.body.len().saturating_add(data.len()) > self.body_limit {
            return Err(Error::BodyTooLarge {
                stream_id: self.id,
                limit: self.body_limit,
            });
        }
        self.body.extend_from_slice(data);
        if end_stream {
            self.receive_end_stream();
        }
        Ok(())
    }

    fn receive_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// Whether the full response has arrived
    pub fn is_response_complete(&self) -> bool {
        matches!(
            self.state,
            StreamState::HalfClosedRemote | StreamState::Closed
        ) && self.status.is_some()
    }

    /// Resolve the caller with the accumulated response
    pub fn complete(&mut self) {
        let Some(tx) = self.completion.take() else {
            return;
        };
        let Some(status) = self.status else {
            let _ = tx.send(Err(Error::Internal(format!(
                "stream {} completed without a status",
                self.id
            ))));
            return;
        };

        let response = HttpResponse::builder()
            .version(Version::Http2)
            .status(status)
            .headers(std::mem::take(&mut self.headers))
            .trailers(std::mem::take(&mut self.trailers))
            .body(std::mem::take(&mut self.body).freeze())
            .build();
        let _ = tx.send(Ok(response));
    }

    /// Move to closed and resolve the caller with an error
    pub fn fail(&mut self, err: Error) {
        self.state = StreamState::Closed;
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Err(err));
        }
    }
}

fn parse_status(value: &Bytes) -> Result<Status> {
    let code = std::str::from_utf8(value)
        .ok()
        .filter(|s| s.len() == 3)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| {
            Error::InvalidHeader(format!(
                "malformed :status {:?}",
                String::from_utf8_lossy(value)
            ))
        })?;
    Status::new(code).map_err(|e| Error::InvalidHeader(e.to_string()))
}

fn field_strings(field: &HeaderField) -> Result<(String, String)> {
    if field.name.iter().any(|b| b.is_ascii_uppercase()) {
        return Err(Error::InvalidHeader(format!(
            "uppercase header name {}",
            field.name_str()
        )));
    }
    let name = std::str::from_utf8(&field.name)
        .map_err(|_| Error::InvalidHeader("header name is not UTF-8".to_string()))?;
    let value = String::from_utf8_lossy(&field.value);
    Ok((name.to_string(), value.into_owned()))
}
