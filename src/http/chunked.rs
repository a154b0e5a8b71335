//! Chunked transfer encoding support
//!
//! Encoding and incremental decoding of HTTP/1.1 chunked bodies, including
//! the trailer section.

use super::{Error, Headers, Result, CRLF, MAX_HEADERS, MAX_HEAD_BYTES};
use bytes::BytesMut;

/// Longest chunk-size line accepted (size plus extensions)
const MAX_SIZE_LINE: usize = 4096;

/// Chunked decoder
///
/// Push-based: feed whatever bytes have arrived, the decoder consumes what it
/// can and appends chunk data to the output buffer.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_size: usize,
    chunk_read: usize,
    trailers: Headers,
    trailer_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

impl ChunkedDecoder {
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_size: 0,
            chunk_read: 0,
            trailers: Headers::new(),
            trailer_bytes: 0,
        }
    }

    /// Decode from `input`, appending body bytes to `output`
    ///
    /// Returns (bytes_consumed, is_complete). Bytes after the final CRLF are
    /// left unconsumed.
    pub fn decode(&mut self, input: &[u8], output: &mut BytesMut) -> Result<(usize, bool)> {
        let mut pos = 0;

        while pos < input.len() {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(crlf_pos) = find_crlf(&input[pos..]) else {
                        if input.len() - pos > MAX_SIZE_LINE {
                            return Err(Error::InvalidChunkSize("size line too long".to_string()));
                        }
                        break;
                    };
                    self.chunk_size = parse_chunk_size(&input[pos..pos + crlf_pos])?;
                    self.chunk_read = 0;
                    pos += crlf_pos + 2;

                    self.state = if self.chunk_size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let remaining = self.chunk_size - self.chunk_read;
                    let to_copy = remaining.min(input.len() - pos);
                    output.extend_from_slice(&input[pos..pos + to_copy]);
                    pos += to_copy;
                    self.chunk_read += to_copy;

                    if self.chunk_read == self.chunk_size {
                        self.state = DecoderState::ChunkEnd;
                    }
                }

                DecoderState::ChunkEnd => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                    }
                    pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    let Some(crlf_pos) = find_crlf(&input[pos..]) else {
                        if self.trailer_bytes + input.len() - pos > MAX_HEAD_BYTES {
                            return Err(Error::HeadersTooLarge("trailer section".to_string()));
                        }
                        break;
                    };
                    let line = &input[pos..pos + crlf_pos];
                    pos += crlf_pos + 2;

                    if line.is_empty() {
                        self.state = DecoderState::Complete;
                        return Ok((pos, true));
                    }
                    self.trailer_bytes += line.len() + 2;
                    if self.trailer_bytes > MAX_HEAD_BYTES || self.trailers.len() >= MAX_HEADERS {
                        return Err(Error::HeadersTooLarge("trailer section".to_string()));
                    }
                    let (name, value) =
                        Headers::parse_header_line(&String::from_utf8_lossy(line))?;
                    self.trailers.insert(name, value);
                }

                DecoderState::Complete => break,
            }
        }

        Ok((pos, self.state == DecoderState::Complete))
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }

    /// Trailer fields received after the last chunk
    pub fn take_trailers(&mut self) -> Headers {
        std::mem::take(&mut self.trailers)
    }

    /// Reset the decoder for reuse
    pub fn reset(&mut self) {
        *self = ChunkedDecoder::new();
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let line = std::str::from_utf8(line)
        .map_err(|_| Error::InvalidChunkSize("non-ASCII size line".to_string()))?;
    let size = line.split(';').next().unwrap_or("").trim_end_matches([' ', '\t']);
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidChunkSize(size.to_string()));
    }
    usize::from_str_radix(size, 16)
        .map_err(|_| Error::InvalidChunkSize(format!("{} overflows", size)))
}

/// Find CRLF in buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Decode a complete chunked body
pub fn decode_chunked_body(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ChunkedDecoder::new();
    let mut output = BytesMut::with_capacity(input.len());
    let (_, complete) = decoder.decode(input, &mut output)?;
    if !complete {
        return Err(Error::Incomplete);
    }
    Ok(output.to_vec())
}

/// Encode data as a chunked body; `chunk_size` 0 sends it as one chunk
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Vec<u8> {
    let chunk_size = if chunk_size == 0 { data.len().max(1) } else { chunk_size };
    let mut output = Vec::with_capacity(data.len() + 16);

    for chunk in data.chunks(chunk_size) {
        output.extend_from_slice(format!("{:x}{}", chunk.len(), CRLF).as_bytes());
        output.extend_from_slice(chunk);
        output.extend_from_slice(CRLF.as_bytes());
    }
    output.extend_from_slice(b"0\r\n\r\n");
    output
}
