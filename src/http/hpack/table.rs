//! HPACK static and dynamic tables
//!
//! Indexes follow RFC 7541 Section 2.3.3: 1..=61 address the static table,
//! 62 and above address the dynamic table, most recent entry first.

use super::{HeaderField, DEFAULT_TABLE_SIZE, ENTRY_OVERHEAD};
use bytes::Bytes;
use std::collections::VecDeque;

/// Static table entries (RFC 7541 Appendix A)
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Result of looking a field up in both tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMatch {
    /// Name and value match the entry at this index
    Full(usize),
    /// Only the name matches
    Name(usize),
}

/// Bounded FIFO of header fields
///
/// The tracked size is always the sum of `name + value + 32` over the
/// entries and never exceeds the maximum.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<(Bytes, Bytes)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        DynamicTable {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at a 0-based dynamic index (0 is the most recent)
    pub fn get(&self, index: usize) -> Option<(&Bytes, &Bytes)> {
        self.entries.get(index).map(|(n, v)| (n, v))
    }

    /// Add an entry, evicting the oldest entries until it fits
    ///
    /// An entry larger than the whole table empties the table and is not
    /// stored.
    pub fn insert(&mut self, name: Bytes, value: Bytes) {
        let entry_size = name.len() + value.len() + ENTRY_OVERHEAD;
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }

        self.evict_to(self.max_size - entry_size);
        self.size += entry_size;
        self.entries.push_front((name, value));
    }

    /// Change the maximum size, evicting as needed
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    fn evict_to(&mut self, target: usize) {
        while self.size > target {
            let Some((name, value)) = self.entries.pop_back() else {
                break;
            };
            self.size -= name.len() + value.len() + ENTRY_OVERHEAD;
        }
    }

    /// 0-based dynamic indexes of an exact match and of a name match
    pub fn find(&self, name: &[u8], value: &[u8]) -> (Option<usize>, Option<usize>) {
        let mut name_only = None;
        for (i, (n, v)) in self.entries.iter().enumerate() {
            if n.as_ref() == name {
                if v.as_ref() == value {
                    return (Some(i), name_only.or(Some(i)));
                }
                name_only.get_or_insert(i);
            }
        }
        (None, name_only)
    }
}

impl Default for DynamicTable {
    fn default() -> Self {
        DynamicTable::new(DEFAULT_TABLE_SIZE)
    }
}

/// Look a field up in the static table and then the dynamic table
///
/// Exact matches win over name matches; within a kind the static table wins.
pub fn lookup(dynamic: &DynamicTable, field: &HeaderField) -> Option<TableMatch> {
    let mut static_name = None;
    for (i, (name, value)) in STATIC_TABLE.iter().enumerate() {
        if name.as_bytes() == field.name.as_ref() {
            if value.as_bytes() == field.value.as_ref() {
                return Some(TableMatch::Full(i + 1));
            }
            static_name.get_or_insert(i + 1);
        }
    }

    let (dyn_full, dyn_name) = dynamic.find(&field.name, &field.value);
    if let Some(i) = dyn_full {
        return Some(TableMatch::Full(STATIC_TABLE.len() + 1 + i));
    }
    static_name
        .or(dyn_name.map(|i| STATIC_TABLE.len() + 1 + i))
        .map(TableMatch::Name)
}

/// Resolve a 1-based HPACK index
pub fn get(dynamic: &DynamicTable, index: usize) -> Option<(Bytes, Bytes)> {
    match index {
        0 => None,
        i if i <= STATIC_TABLE.len() => {
            let (name, value) = STATIC_TABLE[i - 1];
            Some((Bytes::from_static(name.as_bytes()), Bytes::from_static(value.as_bytes())))
        }
        i => dynamic
            .get(i - STATIC_TABLE.len() - 1)
            .map(|(n, v)| (n.clone(), v.clone())),
    }
}
