//! HPACK header compression (RFC 7541)
//!
//! # Architecture
//!
//! - [`table`]: the 61-entry static table and the bounded, connection-scoped
//!   [`DynamicTable`]
//! - [`huffman`]: canonical Huffman coding derived from the fixed code
//!   lengths of Appendix B
//! - [`Encoder`]: turns a header list into a header block, choosing the
//!   smallest representation for each field
//! - [`Decoder`]: rebuilds the header list and mirrors the peer encoder's
//!   table mutations
//!
//! Encoder and decoder each own one dynamic table. Both tables are
//! connection state: any decoding failure leaves the decoder's table out of
//! sync with the peer, so callers must treat [`DecoderError`] as fatal for
//! the connection.

pub mod decoder;
pub mod encoder;
pub mod huffman;
pub mod table;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use table::DynamicTable;

use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;

/// Default dynamic table size (SETTINGS_HEADER_TABLE_SIZE)
pub const DEFAULT_TABLE_SIZE: usize = 4096;

/// Default cap on decoded name + value bytes per header block
pub const DEFAULT_MAX_HEADER_LIST_BYTES: usize = 128 * 1024;

/// Per-entry overhead counted in the table size (RFC 7541 Section 4.1)
pub const ENTRY_OVERHEAD: usize = 32;

/// A header name and value as carried in a header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
    /// Never add to a compression table
    pub sensitive: bool,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        HeaderField {
            name: name.into(),
            value: value.into(),
            sensitive: false,
        }
    }

    /// A field that must use the never-indexed representation
    pub fn sensitive(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        HeaderField {
            sensitive: true,
            ..HeaderField::new(name, value)
        }
    }

    /// Size of the field in a dynamic table
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }

    pub fn name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// HPACK decoding errors. All of them are COMPRESSION_ERROR on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecoderError {
    #[error("header block truncated")]
    Truncated,

    #[error("integer exceeds 32-bit range")]
    IntegerOverflow,

    #[error("invalid table index {0}")]
    InvalidIndex(usize),

    #[error("EOS symbol inside Huffman string")]
    HuffmanEos,

    #[error("Huffman padding longer than 7 bits")]
    HuffmanPaddingTooLong,

    #[error("Huffman padding is not all ones")]
    HuffmanInvalidPadding,

    #[error("dynamic table size update {size} exceeds limit {max}")]
    InvalidTableSizeUpdate { size: usize, max: usize },

    #[error("dynamic table size update after the first header field")]
    LateTableSizeUpdate,

    #[error("decoded header list exceeds {limit} bytes")]
    HeaderListTooLarge { limit: usize },
}

/// Encode `value` with an N-bit prefix (RFC 7541 Section 5.1)
///
/// `flags` carries the representation bits above the prefix.
pub fn encode_integer(dst: &mut BytesMut, value: usize, prefix_bits: u8, flags: u8) {
    let max_prefix = ((1u16 << prefix_bits) - 1) as usize;
    if value < max_prefix {
        dst.put_u8(flags | value as u8);
        return;
    }

    dst.put_u8(flags | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 128 {
        dst.put_u8((rest % 128) as u8 | 0x80);
        rest /= 128;
    }
    dst.put_u8(rest as u8);
}

/// Decode an N-bit prefix integer starting at `*pos`
///
/// Values beyond `u32::MAX` are rejected.
pub fn decode_integer(src: &[u8], pos: &mut usize, prefix_bits: u8) -> Result<usize, DecoderError> {
    let max_prefix = ((1u16 << prefix_bits) - 1) as u8;
    let first = *src.get(*pos).ok_or(DecoderError::Truncated)? & max_prefix;
    *pos += 1;
    if first < max_prefix {
        return Ok(first as usize);
    }

    let mut value = max_prefix as u64;
    let mut shift = 0u32;
    loop {
        let byte = *src.get(*pos).ok_or(DecoderError::Truncated)?;
        *pos += 1;
        value += ((byte & 0x7F) as u64) << shift;
        if value > u32::MAX as u64 {
            return Err(DecoderError::IntegerOverflow);
        }
        if byte & 0x80 == 0 {
            return Ok(value as usize);
        }
        shift += 7;
        if shift > 28 {
            return Err(DecoderError::IntegerOverflow);
        }
    }
}
