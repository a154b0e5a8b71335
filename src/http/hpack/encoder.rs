//! HPACK encoder
//!
//! Representation choice per field (RFC 7541 Section 6):
//!
//! | lookup result | sensitive | fits table | representation |
//! |---|---|---|---|
//! | exact match | no | - | indexed |
//! | name match or none | yes | - | literal never indexed |
//! | name match or none | no | no | literal without indexing |
//! | name match or none | no | yes | literal with incremental indexing |
//!
//! String literals are Huffman-coded when that is strictly shorter.

use super::table::{self, DynamicTable, TableMatch};
use super::{encode_integer, huffman, HeaderField, DEFAULT_TABLE_SIZE};
use bytes::{BufMut, BytesMut};

/// Field names that are always sent never-indexed
const NEVER_INDEXED: [&str; 4] = ["authorization", "proxy-authorization", "cookie", "set-cookie"];

/// HPACK encoder with its own dynamic table
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    /// Smallest and latest table size set since the last header block
    pending_resize: Option<(usize, usize)>,
    use_huffman: bool,
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Encoder {
            table: DynamicTable::new(max_table_size),
            pending_resize: None,
            use_huffman: true,
        }
    }

    pub fn set_use_huffman(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    /// Apply a new maximum table size (peer SETTINGS_HEADER_TABLE_SIZE)
    ///
    /// The change is announced with size-update instructions at the start
    /// of the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.pending_resize = Some(match self.pending_resize {
            Some((smallest, _)) => (smallest.min(size), size),
            None => (size, size),
        });
        self.table.set_max_size(size);
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Encode one header block into `dst`
    pub fn encode<'a, I>(&mut self, headers: I, dst: &mut BytesMut)
    where
        I: IntoIterator<Item = &'a HeaderField>,
    {
        if let Some((smallest, latest)) = self.pending_resize.take() {
            if smallest < latest {
                encode_integer(dst, smallest, 5, 0x20);
            }
            encode_integer(dst, latest, 5, 0x20);
        }

        for field in headers {
            self.encode_field(field, dst);
        }
    }

    fn encode_field(&mut self, field: &HeaderField, dst: &mut BytesMut) {
        let sensitive = field.sensitive || is_never_indexed(&field.name);
        let found = table::lookup(&self.table, field);

        let name_index = match found {
            Some(TableMatch::Full(index)) if !sensitive => {
                encode_integer(dst, index, 7, 0x80);
                return;
            }
            Some(TableMatch::Full(index)) | Some(TableMatch::Name(index)) => index,
            None => 0,
        };

        let index_it = !sensitive && field.size() <= self.table.max_size();
        if sensitive {
            encode_integer(dst, name_index, 4, 0x10);
        } else if index_it {
            encode_integer(dst, name_index, 6, 0x40);
        } else {
            encode_integer(dst, name_index, 4, 0x00);
        }

        if name_index == 0 {
            self.encode_string(&field.name, dst);
        }
        self.encode_string(&field.value, dst);

        if index_it {
            self.table.insert(field.name.clone(), field.value.clone());
        }
    }

    fn encode_string(&self, value: &[u8], dst: &mut BytesMut) {
        if self.use_huffman {
            let huffman_len = huffman::encoded_len(value);
            if huffman_len < value.len() {
                encode_integer(dst, huffman_len, 7, 0x80);
                huffman::encode(value, dst);
                return;
            }
        }
        encode_integer(dst, value.len(), 7, 0x00);
        dst.put_slice(value);
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder::new(DEFAULT_TABLE_SIZE)
    }
}

fn is_never_indexed(name: &[u8]) -> bool {
    NEVER_INDEXED.iter().any(|n| n.as_bytes() == name)
}
