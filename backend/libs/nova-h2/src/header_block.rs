//! Translation between abstract message heads and contiguous header blocks.
//!
//! A [`HeaderBlock`] is one byte buffer plus an index of
//! `(name offset, name length, value offset, value length)` tuples. Outbound
//! blocks carry pseudo-headers first; inbound blocks have their
//! pseudo-headers lifted into a [`RequestHead`] or [`ResponseHead`].

use crate::error::ProtocolViolation;
use crate::message::{Headers, RequestHead, ResponseHead, Version};
use crate::method::Method;

pub const METHOD: &str = ":method";
pub const PATH: &str = ":path";
pub const SCHEME: &str = ":scheme";
pub const AUTHORITY: &str = ":authority";
pub const STATUS: &str = ":status";

/// Headers that only have meaning on an HTTP/1 connection (RFC 7540 8.1.2.2).
const CONNECTION_SPECIFIC: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

pub fn is_pseudo(name: &[u8]) -> bool {
    name.first() == Some(&b':')
}

fn is_connection_specific(name: &str) -> bool {
    CONNECTION_SPECIFIC
        .iter()
        .any(|c| c.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderIndex {
    pub name_offset: usize,
    pub name_len: usize,
    pub value_offset: usize,
    pub value_len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    buffer: Vec<u8>,
    indices: Vec<HeaderIndex>,
}

impl HeaderBlock {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(bytes),
            indices: Vec::new(),
        }
    }

    /// Appends one field to the buffer and records its offsets.
    pub fn write_header(&mut self, name: &[u8], value: &[u8]) {
        let name_offset = self.buffer.len();
        self.buffer.extend_from_slice(name);
        let value_offset = self.buffer.len();
        self.buffer.extend_from_slice(value);
        self.indices.push(HeaderIndex {
            name_offset,
            name_len: name.len(),
            value_offset,
            value_len: value.len(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.indices.iter().map(move |idx| {
            (
                &self.buffer[idx.name_offset..idx.name_offset + idx.name_len],
                &self.buffer[idx.value_offset..idx.value_offset + idx.value_len],
            )
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn indices(&self) -> &[HeaderIndex] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Size as counted by SETTINGS_MAX_HEADER_LIST_SIZE.
    pub fn list_size(&self) -> usize {
        self.buffer.len() + 32 * self.indices.len()
    }

    fn write_regular(&mut self, headers: &Headers) {
        for (name, value) in headers.iter() {
            if is_pseudo(name.as_bytes()) || is_connection_specific(name) {
                continue;
            }
            self.write_header(name.as_bytes(), value.as_bytes());
        }
    }

    /// Splits the block into pseudo-headers and regular headers.
    fn split(&self) -> Result<(Vec<(String, String)>, Headers), ProtocolViolation> {
        let mut pseudo = Vec::new();
        let mut regular = Headers::with_capacity(self.len());

        for (name, value) in self.iter() {
            let name = std::str::from_utf8(name)
                .map_err(|_| ProtocolViolation::new("header name is not valid UTF-8"))?;
            let value = std::str::from_utf8(value).map_err(|_| {
                ProtocolViolation::new(format!("value of {name} is not valid UTF-8"))
            })?;

            if is_pseudo(name.as_bytes()) {
                if !regular.is_empty() {
                    return Err(ProtocolViolation::new(format!(
                        "pseudo-header {name} after regular headers"
                    )));
                }
                pseudo.push((name.to_string(), value.to_string()));
            } else {
                regular.add(name, value);
            }
        }

        Ok((pseudo, regular))
    }
}

/// Removes the single value of a pseudo-header.
fn take_pseudo(
    pseudo: &mut Vec<(String, String)>,
    name: &str,
) -> Result<Option<String>, ProtocolViolation> {
    let mut found = None;
    let mut error = None;
    pseudo.retain(|(n, v)| {
        if n != name {
            return true;
        }
        if found.replace(v.clone()).is_some() {
            error = Some(ProtocolViolation::new(format!("duplicate {name}")));
        }
        false
    });
    match error {
        Some(err) => Err(err),
        None => Ok(found),
    }
}

fn reject_leftover(pseudo: &[(String, String)]) -> Result<(), ProtocolViolation> {
    match pseudo.first() {
        Some((name, _)) => Err(ProtocolViolation::new(format!(
            "unexpected pseudo-header {name}"
        ))),
        None => Ok(()),
    }
}

/// Builds an outbound request block.
///
/// `:method`, `:path`, `:scheme` and `:authority` are written first in that
/// order. Other pseudo-headers supplied by the caller follow, then regular
/// headers in their original order. Caller-supplied copies of the four
/// structured pseudo-headers are dropped, as are connection-specific headers.
pub fn request_block(
    method: &Method,
    path: &str,
    scheme: &str,
    authority: &str,
    headers: &Headers,
) -> HeaderBlock {
    let mut block = HeaderBlock::with_capacity(128 + headers.len() * 48);
    block.write_header(METHOD.as_bytes(), method.as_str().as_bytes());
    block.write_header(PATH.as_bytes(), path.as_bytes());
    block.write_header(SCHEME.as_bytes(), scheme.as_bytes());
    block.write_header(AUTHORITY.as_bytes(), authority.as_bytes());

    for (name, value) in headers.iter() {
        if is_pseudo(name.as_bytes()) && ![METHOD, PATH, SCHEME, AUTHORITY].contains(&name) {
            block.write_header(name.as_bytes(), value.as_bytes());
        }
    }
    block.write_regular(headers);
    block
}

/// Builds an outbound response block with `:status` first.
pub fn response_block(status: u16, headers: &Headers) -> HeaderBlock {
    let mut block = HeaderBlock::with_capacity(64 + headers.len() * 48);
    block.write_header(STATUS.as_bytes(), status.to_string().as_bytes());
    block.write_regular(headers);
    block
}

impl RequestHead {
    /// Lifts the request pseudo-headers out of an inbound block.
    ///
    /// A missing `host` header is synthesized from `:authority`.
    pub fn from_header_block(block: &HeaderBlock) -> Result<Self, ProtocolViolation> {
        let (mut pseudo, mut headers) = block.split()?;

        let method = take_pseudo(&mut pseudo, METHOD)?
            .ok_or_else(|| ProtocolViolation::new("missing :method"))?;
        let path = take_pseudo(&mut pseudo, PATH)?
            .ok_or_else(|| ProtocolViolation::new("missing :path"))?;
        let scheme = take_pseudo(&mut pseudo, SCHEME)?;
        let authority = take_pseudo(&mut pseudo, AUTHORITY)?;
        reject_leftover(&pseudo)?;

        if let Some(authority) = &authority {
            if !headers.contains("host") {
                headers.add("host", authority.clone());
            }
        }

        Ok(RequestHead {
            method: Method::from_wire(&method),
            path,
            scheme,
            authority,
            version: Version::HTTP_2,
            headers,
        })
    }
}

impl ResponseHead {
    /// Lifts `:status` out of an inbound block.
    pub fn from_header_block(block: &HeaderBlock) -> Result<Self, ProtocolViolation> {
        let (mut pseudo, headers) = block.split()?;

        let status = take_pseudo(&mut pseudo, STATUS)?
            .ok_or_else(|| ProtocolViolation::new("missing :status"))?;
        reject_leftover(&pseudo)?;

        let status = status
            .parse::<u16>()
            .ok()
            .filter(|code| (100..=999).contains(code))
            .ok_or_else(|| ProtocolViolation::new(format!("invalid :status {status:?}")))?;

        Ok(ResponseHead {
            status,
            version: Version::HTTP_2,
            headers,
        })
    }
}

/// Parses a trailer block, which must not carry pseudo-headers.
pub fn trailers_from_header_block(block: &HeaderBlock) -> Result<Headers, ProtocolViolation> {
    let (pseudo, headers) = block.split()?;
    reject_leftover(&pseudo)?;
    Ok(headers)
}
