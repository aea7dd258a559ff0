//! HPACK header compression (RFC 7541).
//!
//! The encoder never inserts into the dynamic table, so the peer's decoder
//! table stays empty and no table size updates are ever needed. Credentials
//! are sent as never-indexed literals. The decoder is complete.

use std::collections::VecDeque;

use crate::error::H2Error;
use crate::header_block::HeaderBlock;
use crate::huffman;

pub const DEFAULT_TABLE_SIZE: usize = 4096;

/// Per-entry overhead counted against the dynamic table size.
const ENTRY_OVERHEAD: usize = 32;

static STATIC_TABLE: [(&str, &str); 61] = [
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

/// Headers whose values must never be stored by intermediaries.
const SENSITIVE: [&[u8]; 3] = [b"authorization", b"proxy-authorization", b"cookie"];

fn encode_int(dst: &mut Vec<u8>, value: usize, prefix_bits: u8, pattern: u8) {
    let max = (1usize << prefix_bits) - 1;
    if value < max {
        dst.push(pattern | value as u8);
        return;
    }
    dst.push(pattern | max as u8);
    let mut rest = value - max;
    while rest >= 0x80 {
        dst.push(0x80 | (rest & 0x7f) as u8);
        rest >>= 7;
    }
    dst.push(rest as u8);
}

/// Decodes a prefix integer, returning the value and the bytes consumed.
fn decode_int(src: &[u8], prefix_bits: u8) -> Result<(usize, usize), H2Error> {
    let first = *src
        .first()
        .ok_or(H2Error::Compression("truncated integer"))?;
    let max = (1usize << prefix_bits) - 1;
    let mut value = first as usize & max;
    if value < max {
        return Ok((value, 1));
    }
    let mut shift = 0u32;
    for (i, &byte) in src[1..].iter().enumerate() {
        if shift > 28 {
            return Err(H2Error::Compression("integer overflow"));
        }
        value += ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 2));
        }
    }
    Err(H2Error::Compression("truncated integer"))
}

fn encode_string(dst: &mut Vec<u8>, data: &[u8]) {
    let huffman_len = huffman::encoded_len(data);
    if huffman_len < data.len() {
        encode_int(dst, huffman_len, 7, 0x80);
        huffman::encode(data, dst);
    } else {
        encode_int(dst, data.len(), 7, 0x00);
        dst.extend_from_slice(data);
    }
}

fn decode_string(src: &[u8]) -> Result<(Vec<u8>, usize), H2Error> {
    let huffman_coded = src.first().map(|b| b & 0x80 != 0).unwrap_or(false);
    let (len, consumed) = decode_int(src, 7)?;
    let end = consumed
        .checked_add(len)
        .filter(|&end| end <= src.len())
        .ok_or(H2Error::Compression("truncated string literal"))?;
    let raw = &src[consumed..end];
    let value = if huffman_coded {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };
    Ok((value, end))
}

fn static_match(name: &[u8], value: &[u8]) -> (Option<usize>, Option<usize>) {
    let mut name_index = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.as_bytes() == name {
            if v.as_bytes() == value {
                return (Some(i + 1), Some(i + 1));
            }
            name_index.get_or_insert(i + 1);
        }
    }
    (None, name_index)
}

/// Stateless HPACK encoder.
#[derive(Debug, Default, Clone)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Encodes every field of `block`, lowercasing names as HTTP/2 requires.
    pub fn encode(&self, block: &HeaderBlock, dst: &mut Vec<u8>) {
        for (name, value) in block.iter() {
            let name = name.to_ascii_lowercase();
            self.encode_field(&name, value, dst);
        }
    }

    fn encode_field(&self, name: &[u8], value: &[u8], dst: &mut Vec<u8>) {
        let sensitive = SENSITIVE.contains(&name);
        let (full, name_only) = static_match(name, value);

        if let (Some(index), false) = (full, sensitive) {
            encode_int(dst, index, 7, 0x80);
            return;
        }

        // 0001xxxx never indexed, 0000xxxx without indexing
        let pattern = if sensitive { 0x10 } else { 0x00 };
        match name_only {
            Some(index) => encode_int(dst, index, 4, pattern),
            None => {
                dst.push(pattern);
                encode_string(dst, name);
            }
        }
        encode_string(dst, value);
    }
}

#[derive(Debug)]
struct DynamicTable {
    entries: VecDeque<(Vec<u8>, Vec<u8>)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    fn insert(&mut self, name: Vec<u8>, value: Vec<u8>) {
        let entry_size = name.len() + value.len() + ENTRY_OVERHEAD;
        if entry_size > self.max_size {
            // An oversized entry empties the table (RFC 7541 section 4.4).
            self.entries.clear();
            self.size = 0;
            return;
        }
        while self.size + entry_size > self.max_size {
            self.evict();
        }
        self.size += entry_size;
        self.entries.push_front((name, value));
    }

    fn resize(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.size > self.max_size {
            self.evict();
        }
    }

    fn evict(&mut self) {
        if let Some((name, value)) = self.entries.pop_back() {
            self.size -= name.len() + value.len() + ENTRY_OVERHEAD;
        }
    }
}

/// HPACK decoder holding the connection's dynamic table.
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    max_allowed: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl Decoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            max_allowed: max_table_size,
        }
    }

    /// Number of entries currently in the dynamic table.
    pub fn table_len(&self) -> usize {
        self.table.entries.len()
    }

    /// Decodes one complete header block.
    pub fn decode(&mut self, src: &[u8]) -> Result<HeaderBlock, H2Error> {
        let mut block = HeaderBlock::with_capacity(src.len() * 2);
        let mut pos = 0;

        while pos < src.len() {
            let first = src[pos];

            if first & 0x80 != 0 {
                let (index, n) = decode_int(&src[pos..], 7)?;
                pos += n;
                let (name, value) = self.lookup(index)?;
                block.write_header(&name, &value);
            } else if first & 0x40 != 0 {
                let (name, value, n) = self.decode_literal(&src[pos..], 6)?;
                pos += n;
                block.write_header(&name, &value);
                self.table.insert(name, value);
            } else if first & 0x20 != 0 {
                let (size, n) = decode_int(&src[pos..], 5)?;
                pos += n;
                if size > self.max_allowed {
                    return Err(H2Error::Compression("table size update above limit"));
                }
                self.table.resize(size);
            } else {
                // Literal without indexing or never indexed, both 4-bit prefix
                let (name, value, n) = self.decode_literal(&src[pos..], 4)?;
                pos += n;
                block.write_header(&name, &value);
            }
        }

        Ok(block)
    }

    fn decode_literal(
        &self,
        src: &[u8],
        prefix_bits: u8,
    ) -> Result<(Vec<u8>, Vec<u8>, usize), H2Error> {
        let (index, mut pos) = decode_int(src, prefix_bits)?;
        let name = if index == 0 {
            let (name, n) = decode_string(&src[pos..])?;
            pos += n;
            name
        } else {
            self.lookup(index)?.0
        };
        let (value, n) = decode_string(&src[pos..])?;
        Ok((name, value, pos + n))
    }

    fn lookup(&self, index: usize) -> Result<(Vec<u8>, Vec<u8>), H2Error> {
        match index {
            0 => Err(H2Error::Compression("index 0")),
            i if i <= STATIC_TABLE.len() => {
                let (name, value) = STATIC_TABLE[i - 1];
                Ok((name.as_bytes().to_vec(), value.as_bytes().to_vec()))
            }
            i => self
                .table
                .entries
                .get(i - STATIC_TABLE.len() - 1)
                .cloned()
                .ok_or(H2Error::Compression("index out of range")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(block: &HeaderBlock) -> Vec<(String, String)> {
        block
            .iter()
            .map(|(n, v)| {
                (
                    String::from_utf8(n.to_vec()).unwrap(),
                    String::from_utf8(v.to_vec()).unwrap(),
                )
            })
            .collect()
    }

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn integer_prefix_examples() {
        // RFC 7541 C.1
        let mut out = Vec::new();
        encode_int(&mut out, 10, 5, 0);
        assert_eq!(out, [0x0a]);

        out.clear();
        encode_int(&mut out, 1337, 5, 0);
        assert_eq!(out, [0x1f, 0x9a, 0x0a]);
        assert_eq!(decode_int(&out, 5).unwrap(), (1337, 3));
    }

    #[test]
    fn decodes_requests_without_huffman() {
        // RFC 7541 C.3
        let mut decoder = Decoder::default();
        let first = hex::decode("828684410f7777772e6578616d706c652e636f6d").unwrap();
        let block = decoder.decode(&first).unwrap();
        assert_eq!(
            fields(&block),
            pairs(&[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
            ])
        );
        assert_eq!(decoder.table_len(), 1);

        let second = hex::decode("828684be58086e6f2d6361636865").unwrap();
        let block = decoder.decode(&second).unwrap();
        assert_eq!(
            fields(&block),
            pairs(&[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
                ("cache-control", "no-cache"),
            ])
        );
        assert_eq!(decoder.table_len(), 2);
    }

    #[test]
    fn decodes_requests_with_huffman() {
        // RFC 7541 C.4
        let mut decoder = Decoder::default();
        let first = hex::decode("828684418cf1e3c2e5f23a6ba0ab90f4ff").unwrap();
        decoder.decode(&first).unwrap();

        let second = hex::decode("828684be5886a8eb10649cbf").unwrap();
        let block = decoder.decode(&second).unwrap();
        assert_eq!(
            fields(&block).last().unwrap(),
            &("cache-control".to_string(), "no-cache".to_string())
        );
    }

    #[test]
    fn encoder_output_decodes() {
        let mut block = HeaderBlock::default();
        block.write_header(b":method", b"POST");
        block.write_header(b":path", b"/3/device/abc");
        block.write_header(b"Authorization", b"bearer secret");
        block.write_header(b"x-custom", b"one");
        block.write_header(b"x-custom", b"two");

        let mut wire = Vec::new();
        Encoder::new().encode(&block, &mut wire);
        // :method POST is a full static match
        assert_eq!(wire[0], 0x83);

        let decoded = Decoder::default().decode(&wire).unwrap();
        assert_eq!(
            fields(&decoded),
            pairs(&[
                (":method", "POST"),
                (":path", "/3/device/abc"),
                ("authorization", "bearer secret"),
                ("x-custom", "one"),
                ("x-custom", "two"),
            ])
        );
    }

    #[test]
    fn authorization_is_never_indexed() {
        let mut block = HeaderBlock::default();
        block.write_header(b"authorization", b"bearer abc");
        let mut wire = Vec::new();
        Encoder::new().encode(&block, &mut wire);
        // never-indexed literal with static name index 23 (15 + 8)
        assert_eq!(&wire[..2], &[0x1f, 0x08]);
    }

    #[test]
    fn rejects_index_zero_and_truncation() {
        let mut decoder = Decoder::default();
        assert!(decoder.decode(&[0x80]).is_err());
        assert!(decoder.decode(&[0x04, 0x05, b'a']).is_err());
        assert!(decoder.decode(&[0xbe]).is_err());
    }

    #[test]
    fn table_size_update_evicts() {
        let mut decoder = Decoder::default();
        let first = hex::decode("828684410f7777772e6578616d706c652e636f6d").unwrap();
        decoder.decode(&first).unwrap();
        assert_eq!(decoder.table_len(), 1);

        decoder.decode(&[0x20]).unwrap();
        assert_eq!(decoder.table_len(), 0);

        // above the advertised limit
        let mut over = Vec::new();
        encode_int(&mut over, DEFAULT_TABLE_SIZE + 1, 5, 0x20);
        assert!(decoder.decode(&over).is_err());
    }
}
