//! HTTP/2 frame encoding and decoding
//!
//! The codec is the only place that touches the binary frame layout:
//!
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+-------------------------------+
//! |R|                 Stream Identifier (31)                      |
//! +=+=============================================================+
//! |                   Frame Payload (0...)                      ...
//! +---------------------------------------------------------------+
//! ```
//!
//! Encoding is a pure transformation into [`Bytes`]. Reading is async over
//! any [`AsyncRead`]; a stream that ends cleanly between frames yields
//! `Ok(None)`, one that ends inside a frame is always [`Error::Truncated`].
//! The `parse_*` helpers validate the fixed layout of each frame type but
//! know nothing about stream state.

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::settings::Settings;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest payload length the 24-bit length field can express
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header. The reserved stream id bit is always cleared.
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;
        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();
        header[5..9].copy_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
        header
    }

    /// Decode a frame header. The reserved stream id bit is ignored.
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let length =
            ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
        let stream_id =
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & STREAM_ID_MASK;

        FrameHeader {
            length,
            frame_type: FrameType::from_u8(bytes[3]),
            flags: FrameFlags::from_u8(bytes[4]),
            stream_id,
        }
    }

    /// Append a complete frame (header and payload) to `dst`
    pub fn encode_into(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        payload: &[u8],
        dst: &mut BytesMut,
    ) {
        dst.reserve(FRAME_HEADER_SIZE + payload.len());
        dst.put_slice(&Self::encode_header(frame_type, flags, stream_id, payload.len()));
        dst.put_slice(payload);
    }

    /// Encode a raw frame
    pub fn encode(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(
            frame.frame_type,
            frame.flags,
            frame.stream_id,
            &frame.payload,
            &mut buf,
        );
        buf.freeze()
    }

    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let flags = FrameFlags::empty()
            .with(FrameFlags::END_STREAM, frame.end_stream)
            .with(FrameFlags::PADDED, frame.padding.is_some());

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.flow_controlled_len());
        buf.put_slice(&Self::encode_header(
            FrameType::Data,
            flags,
            frame.stream_id,
            frame.flow_controlled_len(),
        ));
        if let Some(pad) = frame.padding {
            buf.put_u8(pad);
        }
        buf.put_slice(&frame.data);
        if let Some(pad) = frame.padding {
            buf.put_bytes(0, pad as usize);
        }
        buf.freeze()
    }

    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let flags = FrameFlags::empty()
            .with(FrameFlags::END_STREAM, frame.end_stream)
            .with(FrameFlags::END_HEADERS, frame.end_headers)
            .with(FrameFlags::PRIORITY, frame.priority.is_some())
            .with(FrameFlags::PADDED, frame.padding.is_some());

        let mut payload_len = frame.header_block.len();
        if frame.priority.is_some() {
            payload_len += 5;
        }
        if let Some(pad) = frame.padding {
            payload_len += 1 + pad as usize;
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(
            FrameType::Headers,
            flags,
            frame.stream_id,
            payload_len,
        ));
        if let Some(pad) = frame.padding {
            buf.put_u8(pad);
        }
        if let Some(priority) = &frame.priority {
            put_priority(&mut buf, priority);
        }
        buf.put_slice(&frame.header_block);
        if let Some(pad) = frame.padding {
            buf.put_bytes(0, pad as usize);
        }
        buf.freeze()
    }

    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let flags = FrameFlags::empty().with(FrameFlags::END_HEADERS, frame.end_headers);
        let mut buf = BytesMut::new();
        Self::encode_into(
            FrameType::Continuation,
            flags,
            frame.stream_id,
            &frame.header_block,
            &mut buf,
        );
        buf.freeze()
    }

    pub fn encode_push_promise_frame(frame: &PushPromiseFrame) -> Bytes {
        let flags = FrameFlags::empty().with(FrameFlags::END_HEADERS, frame.end_headers);
        let mut buf = BytesMut::new();
        buf.put_slice(&Self::encode_header(
            FrameType::PushPromise,
            flags,
            frame.stream_id,
            4 + frame.header_block.len(),
        ));
        buf.put_u32(frame.promised_stream_id & STREAM_ID_MASK);
        buf.put_slice(&frame.header_block);
        buf.freeze()
    }

    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let flags = FrameFlags::empty().with(FrameFlags::ACK, frame.ack);
        let mut payload = BytesMut::new();
        if !frame.ack {
            frame.settings.encode_payload(&mut payload);
        }

        let mut buf = BytesMut::new();
        Self::encode_into(FrameType::Settings, flags, 0, &payload, &mut buf);
        buf.freeze()
    }

    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let flags = FrameFlags::empty().with(FrameFlags::ACK, frame.ack);
        let mut buf = BytesMut::new();
        Self::encode_into(FrameType::Ping, flags, 0, &frame.data, &mut buf);
        buf.freeze()
    }

    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(&Self::encode_header(
            FrameType::Goaway,
            FrameFlags::empty(),
            0,
            8 + frame.debug_data.len(),
        ));
        buf.put_u32(frame.last_stream_id & STREAM_ID_MASK);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);
        buf.freeze()
    }

    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(
            FrameType::WindowUpdate,
            FrameFlags::empty(),
            frame.stream_id,
            &(frame.size_increment & STREAM_ID_MASK).to_be_bytes(),
            &mut buf,
        );
        buf.freeze()
    }

    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(
            FrameType::RstStream,
            FrameFlags::empty(),
            frame.stream_id,
            &frame.error_code.as_u32().to_be_bytes(),
            &mut buf,
        );
        buf.freeze()
    }

    pub fn encode_priority_frame(frame: &PriorityFrame) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(&Self::encode_header(
            FrameType::Priority,
            FrameFlags::empty(),
            frame.stream_id,
            5,
        ));
        put_priority(&mut buf, &frame.priority);
        buf.freeze()
    }

    /// Read one frame
    ///
    /// Returns `Ok(None)` when the stream ends exactly on a frame boundary.
    /// Payloads longer than `max_frame_size` are rejected before they are
    /// read.
    pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        let mut filled = 0;
        while filled < FRAME_HEADER_SIZE {
            let n = reader.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::Truncated);
            }
            filled += n;
        }

        let header = Self::decode_header(&header);
        if header.length > max_frame_size {
            return Err(Error::FrameSize(format!(
                "{} frame of {} bytes exceeds maximum {}",
                header.frame_type.name(),
                header.length,
                max_frame_size
            )));
        }

        let mut payload = BytesMut::zeroed(header.length);
        if header.length > 0 {
            reader.read_exact(&mut payload).await.map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    Error::Truncated
                } else {
                    Error::Io(e)
                }
            })?;
        }

        Ok(Some(Frame::new(
            header.frame_type,
            header.flags,
            header.stream_id,
            payload.freeze(),
        )))
    }

    pub fn parse_data(frame: &Frame) -> Result<DataFrame> {
        require_stream(frame)?;
        let (data, padding) = strip_padding(frame)?;
        Ok(DataFrame {
            stream_id: frame.stream_id,
            data,
            end_stream: frame.flags.is_end_stream(),
            padding,
        })
    }

    pub fn parse_headers(frame: &Frame) -> Result<HeadersFrame> {
        require_stream(frame)?;
        let (mut block, padding) = strip_padding(frame)?;
        let priority = if frame.flags.is_priority() {
            if block.len() < 5 {
                return Err(Error::FrameSize(
                    "HEADERS priority fields truncated".to_string(),
                ));
            }
            Some(get_priority(&mut block))
        } else {
            None
        };

        Ok(HeadersFrame {
            stream_id: frame.stream_id,
            header_block: block,
            end_stream: frame.flags.is_end_stream(),
            end_headers: frame.flags.is_end_headers(),
            priority,
            padding,
        })
    }

    pub fn parse_continuation(frame: &Frame) -> Result<ContinuationFrame> {
        require_stream(frame)?;
        Ok(ContinuationFrame {
            stream_id: frame.stream_id,
            header_block: frame.payload.clone(),
            end_headers: frame.flags.is_end_headers(),
        })
    }

    pub fn parse_push_promise(frame: &Frame) -> Result<PushPromiseFrame> {
        require_stream(frame)?;
        let (mut block, _) = strip_padding(frame)?;
        if block.len() < 4 {
            return Err(Error::FrameSize(
                "PUSH_PROMISE promised stream id truncated".to_string(),
            ));
        }
        let promised_stream_id = block.get_u32() & STREAM_ID_MASK;
        Ok(PushPromiseFrame {
            stream_id: frame.stream_id,
            promised_stream_id,
            header_block: block,
            end_headers: frame.flags.is_end_headers(),
        })
    }

    pub fn parse_priority(frame: &Frame) -> Result<PriorityFrame> {
        require_stream(frame)?;
        if frame.payload.len() != 5 {
            return Err(Error::FrameSize(format!(
                "PRIORITY payload must be 5 bytes, got {}",
                frame.payload.len()
            )));
        }
        let mut payload = frame.payload.clone();
        Ok(PriorityFrame {
            stream_id: frame.stream_id,
            priority: get_priority(&mut payload),
        })
    }

    pub fn parse_rst_stream(frame: &Frame) -> Result<RstStreamFrame> {
        require_stream(frame)?;
        if frame.payload.len() != 4 {
            return Err(Error::FrameSize(format!(
                "RST_STREAM payload must be 4 bytes, got {}",
                frame.payload.len()
            )));
        }
        let mut payload = frame.payload.clone();
        Ok(RstStreamFrame::new(
            frame.stream_id,
            ErrorCode::from_wire(payload.get_u32()),
        ))
    }

    pub fn parse_settings(frame: &Frame) -> Result<SettingsFrame> {
        require_connection(frame)?;
        if frame.flags.is_ack() {
            if !frame.payload.is_empty() {
                return Err(Error::FrameSize(
                    "SETTINGS ACK must have an empty payload".to_string(),
                ));
            }
            return Ok(SettingsFrame::ack());
        }
        Ok(SettingsFrame::new(Settings::decode_payload(&frame.payload)?))
    }

    pub fn parse_ping(frame: &Frame) -> Result<PingFrame> {
        require_connection(frame)?;
        let data: [u8; 8] = frame.payload.as_ref().try_into().map_err(|_| {
            Error::FrameSize(format!(
                "PING payload must be 8 bytes, got {}",
                frame.payload.len()
            ))
        })?;
        Ok(PingFrame {
            ack: frame.flags.is_ack(),
            data,
        })
    }

    pub fn parse_goaway(frame: &Frame) -> Result<GoawayFrame> {
        require_connection(frame)?;
        if frame.payload.len() < 8 {
            return Err(Error::FrameSize(format!(
                "GOAWAY payload must be at least 8 bytes, got {}",
                frame.payload.len()
            )));
        }
        let mut payload = frame.payload.clone();
        let last_stream_id = payload.get_u32() & STREAM_ID_MASK;
        let error_code = ErrorCode::from_wire(payload.get_u32());
        Ok(GoawayFrame::new(last_stream_id, error_code, payload))
    }

    pub fn parse_window_update(frame: &Frame) -> Result<WindowUpdateFrame> {
        if frame.payload.len() != 4 {
            return Err(Error::FrameSize(format!(
                "WINDOW_UPDATE payload must be 4 bytes, got {}",
                frame.payload.len()
            )));
        }
        let mut payload = frame.payload.clone();
        Ok(WindowUpdateFrame::new(
            frame.stream_id,
            payload.get_u32() & STREAM_ID_MASK,
        ))
    }
}

fn put_priority(buf: &mut BytesMut, priority: &PrioritySpec) {
    let mut dep = priority.stream_dependency & STREAM_ID_MASK;
    if priority.exclusive {
        dep |= 0x8000_0000;
    }
    buf.put_u32(dep);
    buf.put_u8(priority.weight);
}

fn get_priority(buf: &mut Bytes) -> PrioritySpec {
    let dep = buf.get_u32();
    let weight = buf.get_u8();
    PrioritySpec::new(dep & STREAM_ID_MASK, dep & 0x8000_0000 != 0, weight)
}

/// Remove the pad length octet and trailing padding from a PADDED payload
pub fn strip_padding(frame: &Frame) -> Result<(Bytes, Option<u8>)> {
    if !frame.flags.is_padded() {
        return Ok((frame.payload.clone(), None));
    }
    let Some(&pad) = frame.payload.first() else {
        return Err(Error::FrameSize(format!(
            "{} frame PADDED without pad length",
            frame.frame_type.name()
        )));
    };
    let body_len = frame.payload.len() - 1;
    if pad as usize > body_len {
        return Err(Error::Protocol(format!(
            "{} padding {} exceeds payload {}",
            frame.frame_type.name(),
            pad,
            body_len
        )));
    }
    Ok((frame.payload.slice(1..1 + body_len - pad as usize), Some(pad)))
}

fn require_stream(frame: &Frame) -> Result<()> {
    if frame.stream_id == 0 {
        return Err(Error::Protocol(format!(
            "{} frame on stream 0",
            frame.frame_type.name()
        )));
    }
    Ok(())
}

fn require_connection(frame: &Frame) -> Result<()> {
    if frame.stream_id != 0 {
        return Err(Error::Protocol(format!(
            "{} frame on stream {}",
            frame.frame_type.name(),
            frame.stream_id
        )));
    }
    Ok(())
}
