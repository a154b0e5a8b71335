//! HPACK decoder
//!
//! Decodes header blocks while applying the same dynamic table mutations as
//! the peer's encoder. The cumulative size of decoded names and values in one
//! block is bounded; exceeding it aborts the block without returning any
//! fields.

use super::table::{self, DynamicTable};
use super::{
    decode_integer, huffman, DecoderError, HeaderField, DEFAULT_MAX_HEADER_LIST_BYTES,
    DEFAULT_TABLE_SIZE,
};
use bytes::Bytes;

/// HPACK decoder with its own dynamic table
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Table size we advertised; size updates may not exceed it
    max_table_size: usize,
    max_header_list_bytes: usize,
}

impl Decoder {
    pub fn new(max_table_size: usize, max_header_list_bytes: usize) -> Self {
        Decoder {
            table: DynamicTable::new(max_table_size),
            max_table_size,
            max_header_list_bytes,
        }
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Decode a complete header block
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, DecoderError> {
        let mut fields = Vec::new();
        let mut pos = 0;
        let mut budget = Budget {
            used: 0,
            limit: self.max_header_list_bytes,
        };

        while pos < block.len() {
            let first = block[pos];

            if first & 0x80 != 0 {
                // indexed field
                let index = decode_integer(block, &mut pos, 7)?;
                let (name, value) = self.indexed(index)?;
                budget.charge(name.len() + value.len())?;
                fields.push(HeaderField::new(name, value));
            } else if first & 0xC0 == 0x40 {
                // literal with incremental indexing
                let field = self.literal(block, &mut pos, 6, &mut budget)?;
                self.table.insert(field.name.clone(), field.value.clone());
                fields.push(field);
            } else if first & 0xE0 == 0x20 {
                // dynamic table size update
                if !fields.is_empty() {
                    return Err(DecoderError::LateTableSizeUpdate);
                }
                let size = decode_integer(block, &mut pos, 5)?;
                if size > self.max_table_size {
                    return Err(DecoderError::InvalidTableSizeUpdate {
                        size,
                        max: self.max_table_size,
                    });
                }
                self.table.set_max_size(size);
            } else {
                // literal without indexing (0000) or never indexed (0001)
                let never_indexed = first & 0x10 != 0;
                let mut field = self.literal(block, &mut pos, 4, &mut budget)?;
                field.sensitive = never_indexed;
                fields.push(field);
            }
        }

        Ok(fields)
    }

    fn indexed(&self, index: usize) -> Result<(Bytes, Bytes), DecoderError> {
        table::get(&self.table, index).ok_or(DecoderError::InvalidIndex(index))
    }

    fn literal(
        &self,
        block: &[u8],
        pos: &mut usize,
        prefix_bits: u8,
        budget: &mut Budget,
    ) -> Result<HeaderField, DecoderError> {
        let name_index = decode_integer(block, pos, prefix_bits)?;
        let name = if name_index == 0 {
            read_string(block, pos, budget)?
        } else {
            let (name, _) = self.indexed(name_index)?;
            budget.charge(name.len())?;
            name
        };
        let value = read_string(block, pos, budget)?;
        Ok(HeaderField::new(name, value))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new(DEFAULT_TABLE_SIZE, DEFAULT_MAX_HEADER_LIST_BYTES)
    }
}

struct Budget {
    used: usize,
    limit: usize,
}

impl Budget {
    fn check(&self, len: usize) -> Result<(), DecoderError> {
        if self.used.saturating_add(len) > self.limit {
            return Err(DecoderError::HeaderListTooLarge { limit: self.limit });
        }
        Ok(())
    }

    fn charge(&mut self, len: usize) -> Result<(), DecoderError> {
        self.check(len)?;
        self.used += len;
        Ok(())
    }
}

fn read_string(block: &[u8], pos: &mut usize, budget: &mut Budget) -> Result<Bytes, DecoderError> {
    let huffman_coded = *block.get(*pos).ok_or(DecoderError::Truncated)? & 0x80 != 0;
    let len = decode_integer(block, pos, 7)?;
    let end = pos.checked_add(len).ok_or(DecoderError::Truncated)?;
    let raw = block.get(*pos..end).ok_or(DecoderError::Truncated)?;
    *pos = end;

    if huffman_coded {
        // the shortest code is 5 bits, so the output is at least len * 8 / 30
        // bytes; reject early once even that lower bound is over budget
        budget.check(len * 8 / 30)?;
        let decoded = huffman::decode(raw)?;
        budget.charge(decoded.len())?;
        Ok(Bytes::from(decoded))
    } else {
        budget.charge(len)?;
        Ok(Bytes::copy_from_slice(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::hpack::Encoder;
    use bytes::BytesMut;

    fn field(name: &str, value: &str) -> HeaderField {
        HeaderField::new(name.as_bytes().to_vec(), value.as_bytes().to_vec())
    }

    fn hex(s: &str) -> Vec<u8> {
        let s: String = s.split_whitespace().collect();
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_rfc_c3_requests_share_table() {
        let mut decoder = Decoder::default();

        let first = decoder
            .decode(&hex("8286 8441 0f77 7777 2e65 7861 6d70 6c65 2e63 6f6d"))
            .unwrap();
        assert_eq!(
            first,
            vec![
                field(":method", "GET"),
                field(":scheme", "http"),
                field(":path", "/"),
                field(":authority", "www.example.com"),
            ]
        );
        assert_eq!(decoder.table().size(), 57);

        let second = decoder
            .decode(&hex("8286 84be 5808 6e6f 2d63 6163 6865"))
            .unwrap();
        assert_eq!(second[3], field(":authority", "www.example.com"));
        assert_eq!(second[4], field("cache-control", "no-cache"));
        assert_eq!(decoder.table().size(), 110);
    }

    #[test]
    fn test_rfc_c4_huffman_request() {
        let mut decoder = Decoder::default();
        let fields = decoder
            .decode(&hex("8286 8441 8cf1 e3c2 e5f2 3a6b a0ab 90f4 ff"))
            .unwrap();
        assert_eq!(fields[3], field(":authority", "www.example.com"));
    }

    #[test]
    fn test_pseudo_header_roundtrip() {
        let headers = vec![
            field(":method", "GET"),
            field(":path", "/"),
            field(":scheme", "https"),
            field(":authority", "example.com"),
        ];
        let mut encoder = Encoder::default();
        let mut decoder = Decoder::default();

        for _ in 0..3 {
            let mut block = BytesMut::new();
            encoder.encode(&headers, &mut block);
            assert_eq!(decoder.decode(&block).unwrap(), headers);
        }
        assert_eq!(encoder.table().size(), decoder.table().size());
    }

    #[test]
    fn test_static_only_headers_do_not_grow_table() {
        let mut decoder = Decoder::default();
        let fields = decoder.decode(&[0x82, 0x84, 0x87, 0x88]).unwrap();
        assert_eq!(fields.len(), 4);
        assert!(decoder.table().is_empty());
    }

    #[test]
    fn test_never_indexed_flag_preserved() {
        let mut encoder = Encoder::default();
        let mut decoder = Decoder::default();
        let mut block = BytesMut::new();
        encoder.encode(&[field("cookie", "session=1")], &mut block);

        let fields = decoder.decode(&block).unwrap();
        assert!(fields[0].sensitive);
        assert!(decoder.table().is_empty());
    }

    #[test]
    fn test_invalid_index() {
        let mut decoder = Decoder::default();
        assert_eq!(decoder.decode(&[0x80]), Err(DecoderError::InvalidIndex(0)));
        assert_eq!(decoder.decode(&[0xBE]), Err(DecoderError::InvalidIndex(62)));
    }

    #[test]
    fn test_truncated_string() {
        let mut decoder = Decoder::default();
        assert_eq!(
            decoder.decode(&[0x40, 0x05, b'a', b'b']),
            Err(DecoderError::Truncated)
        );
    }

    #[test]
    fn test_size_update_rules() {
        // 8192 exceeds the advertised 4096
        let mut decoder = Decoder::default();
        assert_eq!(
            decoder.decode(&[0x3f, 0xe1, 0x3f]),
            Err(DecoderError::InvalidTableSizeUpdate { size: 8192, max: 4096 })
        );

        let mut decoder = Decoder::default();
        assert_eq!(
            decoder.decode(&[0x82, 0x20]),
            Err(DecoderError::LateTableSizeUpdate)
        );

        let mut decoder = Decoder::default();
        decoder.decode(&[0x20, 0x82]).unwrap();
        assert_eq!(decoder.table().max_size(), 0);
    }

    #[test]
    fn test_header_list_cap_rejects_without_partial_output() {
        let mut encoder = Encoder::default();
        encoder.set_use_huffman(false);
        let big = vec![b'x'; 40 * 1024];
        let headers: Vec<HeaderField> = (0..4)
            .map(|i| HeaderField::new(format!("x-big-{}", i), big.clone()))
            .collect();
        let mut block = BytesMut::new();
        encoder.encode(&headers, &mut block);

        let mut decoder = Decoder::default();
        assert_eq!(
            decoder.decode(&block),
            Err(DecoderError::HeaderListTooLarge { limit: 128 * 1024 })
        );
    }

    #[test]
    fn test_indexed_repetition_counts_against_cap() {
        // one small literal then many indexed references to it
        let mut block = vec![0x40, 0x01, b'a', 0x7f, 0xe9, 0x06];
        block.extend_from_slice(&[b'v'; 1000]);
        block.extend(std::iter::repeat(0x80 | 62).take(200));

        let mut decoder = Decoder::new(4096, 128 * 1024);
        assert!(matches!(
            decoder.decode(&block),
            Err(DecoderError::HeaderListTooLarge { .. })
        ));
    }
}
