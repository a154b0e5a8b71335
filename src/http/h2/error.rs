//! HTTP/2 error types
//!
//! Errors are split into two scopes (RFC 9113 Section 5.4):
//!
//! - **connection errors** tear down the whole connection and fail every
//!   pending stream on it (protocol, frame size, compression, flow control,
//!   settings timeout, malformed preface, lost transport)
//! - **stream errors** only affect the named stream (refused, cancelled,
//!   reset by the peer, above a GOAWAY boundary)
//!
//! [`Error::is_connection_error`] exposes the classification and
//! [`Error::error_code`] the code put on the wire in GOAWAY or RST_STREAM.

use std::fmt;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Flow control error: {0}")]
    FlowControl(String),

    #[error("Settings timeout")]
    SettingsTimeout,

    #[error("Stream closed: {0}")]
    StreamClosed(u32),

    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// The peer refused the stream before processing it; safe to retry
    #[error("Refused stream: {0}")]
    RefusedStream(u32),

    /// The stream was cancelled locally
    #[error("Stream cancelled: {0}")]
    Cancel(u32),

    #[error("Compression error: {0}")]
    Compression(String),

    /// The response body outgrew the configured limit; the stream was reset
    #[error("Response body on stream {stream_id} exceeds {limit} bytes")]
    BodyTooLarge { stream_id: u32, limit: usize },

    /// The peer reset the stream with RST_STREAM
    #[error("Stream {stream_id} reset by peer: {code}")]
    StreamReset { stream_id: u32, code: ErrorCode },

    /// The stream was opened above the peer's GOAWAY last-stream-id and was
    /// never processed; safe to retry on a new connection
    #[error("Connection going away (last stream {last_stream_id}): {code}")]
    GoAway { last_stream_id: u32, code: ErrorCode },

    /// The connection failed earlier with a connection error
    #[error("Connection lost: {code}: {reason}")]
    ConnectionLost { code: ErrorCode, reason: String },

    /// The byte stream ended in the middle of a frame
    #[error("Truncated frame: connection closed mid-frame")]
    Truncated,

    #[error("Connection closed")]
    ConnectionClosed,

    /// The first frame from the server was not SETTINGS
    #[error("Missing connection preface")]
    MissingPreface,

    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid stream ID: {0}")]
    InvalidStreamId(u32),

    #[error("Timeout")]
    Timeout,
}

impl Error {
    /// Whether the error terminates the whole connection
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Protocol(_)
                | Error::Internal(_)
                | Error::FlowControl(_)
                | Error::SettingsTimeout
                | Error::FrameSize(_)
                | Error::Compression(_)
                | Error::ConnectionLost { .. }
                | Error::Truncated
                | Error::ConnectionClosed
                | Error::MissingPreface
                | Error::InvalidSettings(_)
        )
    }

    /// Whether the request was provably not processed by the peer
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RefusedStream(_) | Error::GoAway { .. } => true,
            Error::StreamReset { code, .. } => *code == ErrorCode::RefusedStream,
            _ => false,
        }
    }

    /// Error code to report to the peer for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_)
            | Error::MissingPreface
            | Error::InvalidHeader(_)
            | Error::InvalidSettings(_)
            | Error::InvalidStreamId(_) => ErrorCode::ProtocolError,
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::SettingsTimeout => ErrorCode::SettingsTimeout,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::RefusedStream(_) => ErrorCode::RefusedStream,
            Error::Cancel(_) | Error::Timeout | Error::BodyTooLarge { .. } => ErrorCode::Cancel,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::StreamReset { code, .. }
            | Error::GoAway { code, .. }
            | Error::ConnectionLost { code, .. } => *code,
            Error::Io(_) | Error::Internal(_) | Error::Truncated | Error::ConnectionClosed => {
                ErrorCode::InternalError
            }
        }
    }
}

/// HTTP/2 error codes (RFC 9113 Section 7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    /// Decode a code received from the peer. Unknown codes carry no special
    /// meaning and are reported as INTERNAL_ERROR.
    pub fn from_wire(code: u32) -> Self {
        Self::from_u32(code).unwrap_or(ErrorCode::InternalError)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
