//! Canonical Huffman coding for HPACK string literals
//!
//! Only the 257 code lengths of RFC 7541 Appendix B are stored. The HPACK
//! code is canonical: within one length, codes are consecutive and ordered
//! by symbol, and the first code of each length follows the last code of the
//! previous length shifted left. Both the encoding table and the decoding
//! table (first code, count and symbol offset per length) are derived from
//! the lengths at compile time.

use super::DecoderError;
use bytes::{BufMut, BytesMut};

/// Code length in bits for symbols 0..=255 and EOS (256)
const CODE_LENGTHS: [u8; 257] = [
    13, 23, 28, 28, 28, 28, 28, 28, 28, 24, 30, 28, 28, 30, 28, 28,
    28, 28, 28, 28, 28, 28, 30, 28, 28, 28, 28, 28, 28, 28, 28, 28,
    6, 10, 10, 12, 13, 6, 8, 11, 10, 10, 8, 11, 8, 6, 6, 6,
    5, 5, 5, 6, 6, 6, 6, 6, 6, 6, 7, 8, 15, 6, 12, 10,
    13, 6, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 8, 7, 8, 13, 19, 13, 14, 6,
    15, 5, 6, 5, 6, 5, 6, 6, 6, 5, 7, 7, 6, 6, 6, 5,
    6, 7, 6, 5, 5, 6, 7, 7, 7, 7, 7, 15, 11, 14, 13, 28,
    20, 22, 20, 20, 22, 22, 22, 23, 22, 23, 23, 23, 23, 23, 24, 23,
    24, 24, 22, 23, 24, 23, 23, 23, 23, 21, 22, 23, 22, 23, 23, 24,
    22, 21, 20, 22, 22, 23, 23, 21, 23, 22, 22, 24, 21, 22, 23, 23,
    21, 21, 22, 21, 23, 22, 23, 23, 20, 22, 22, 22, 23, 22, 22, 23,
    26, 26, 20, 19, 22, 23, 22, 25, 26, 26, 26, 27, 27, 26, 24, 25,
    19, 21, 26, 27, 27, 26, 27, 24, 21, 21, 26, 26, 28, 27, 27, 27,
    20, 24, 20, 21, 22, 21, 21, 23, 22, 22, 25, 25, 24, 24, 26, 23,
    26, 27, 26, 26, 27, 27, 27, 27, 27, 28, 27, 27, 27, 27, 27, 26,
    30,
];

const EOS: u16 = 256;
const MAX_CODE_LEN: usize = 30;

struct HuffmanTable {
    codes: [u32; 257],
    first_code: [u32; MAX_CODE_LEN + 1],
    counts: [u32; MAX_CODE_LEN + 1],
    offsets: [u16; MAX_CODE_LEN + 1],
    symbols: [u16; 257],
}

impl HuffmanTable {
    const fn build() -> Self {
        let mut table = HuffmanTable {
            codes: [0; 257],
            first_code: [0; MAX_CODE_LEN + 1],
            counts: [0; MAX_CODE_LEN + 1],
            offsets: [0; MAX_CODE_LEN + 1],
            symbols: [0; 257],
        };

        let mut code: u32 = 0;
        let mut assigned = 0usize;
        let mut len = 1;
        while len <= MAX_CODE_LEN {
            table.first_code[len] = code;
            table.offsets[len] = assigned as u16;
            let mut sym = 0;
            while sym < 257 {
                if CODE_LENGTHS[sym] as usize == len {
                    table.codes[sym] = code;
                    table.symbols[assigned] = sym as u16;
                    table.counts[len] += 1;
                    assigned += 1;
                    code += 1;
                }
                sym += 1;
            }
            code <<= 1;
            len += 1;
        }
        table
    }
}

static TABLE: HuffmanTable = HuffmanTable::build();

/// Number of bytes `src` occupies once Huffman-coded
pub fn encoded_len(src: &[u8]) -> usize {
    let bits: usize = src.iter().map(|&b| CODE_LENGTHS[b as usize] as usize).sum();
    (bits + 7) / 8
}

/// Huffman-code `src` into `dst`, padding the last octet with EOS bits
pub fn encode(src: &[u8], dst: &mut BytesMut) {
    dst.reserve(encoded_len(src));
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;

    for &byte in src {
        let len = CODE_LENGTHS[byte as usize] as u32;
        acc = (acc << len) | TABLE.codes[byte as usize] as u64;
        bits += len;
        while bits >= 8 {
            bits -= 8;
            dst.put_u8((acc >> bits) as u8);
        }
        acc &= (1u64 << bits) - 1;
    }

    if bits > 0 {
        let pad = 8 - bits;
        dst.put_u8(((acc << pad) | ((1u64 << pad) - 1)) as u8);
    }
}

/// Decode a Huffman-coded string
pub fn decode(src: &[u8]) -> Result<Vec<u8>, DecoderError> {
    let mut out = Vec::with_capacity(src.len() * 8 / 5);
    let mut code: u32 = 0;
    let mut len: usize = 0;

    for &byte in src {
        for shift in (0..8).rev() {
            code = (code << 1) | ((byte >> shift) & 1) as u32;
            len += 1;

            let count = TABLE.counts[len];
            let first = TABLE.first_code[len];
            if count > 0 && code >= first && code - first < count {
                let sym = TABLE.symbols[TABLE.offsets[len] as usize + (code - first) as usize];
                if sym == EOS {
                    return Err(DecoderError::HuffmanEos);
                }
                out.push(sym as u8);
                code = 0;
                len = 0;
            } else if len == MAX_CODE_LEN {
                // the code is complete, so 30 bits always match a symbol
                return Err(DecoderError::HuffmanEos);
            }
        }
    }

    if len > 7 {
        return Err(DecoderError::HuffmanPaddingTooLong);
    }
    if code != (1u32 << len) - 1 {
        return Err(DecoderError::HuffmanInvalidPadding);
    }
    Ok(out)
}
