//! HTTP/2 frame codec (RFC 7540 section 4 and 6).
//!
//! Every frame starts with a 9-byte header: 24-bit payload length, type,
//! flags, and a 31-bit stream identifier.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::H2Error;

pub const HEADER_LEN: usize = 9;

/// Client connection preface (RFC 7540 section 3.5).
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_FRAME_SIZE_LIMIT: u32 = 16_777_215;
pub const DEFAULT_WINDOW_SIZE: u32 = 65_535;
pub const MAX_WINDOW_SIZE: u32 = 0x7fff_ffff;

pub mod kind {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// RST_STREAM and GOAWAY error codes (RFC 7540 section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    Other(u32),
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            other => ErrorCode::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::SettingsTimeout => 0x4,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::CompressionError => 0x9,
            ErrorCode::ConnectError => 0xa,
            ErrorCode::EnhanceYourCalm => 0xb,
            ErrorCode::InadequateSecurity => 0xc,
            ErrorCode::Http11Required => 0xd,
            ErrorCode::Other(code) => code,
        }
    }
}

/// One SETTINGS parameter (RFC 7540 section 6.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    HeaderTableSize(u32),
    EnablePush(bool),
    MaxConcurrentStreams(u32),
    InitialWindowSize(u32),
    MaxFrameSize(u32),
    MaxHeaderListSize(u32),
    Unknown(u16, u32),
}

impl Setting {
    fn decode(id: u16, value: u32) -> Result<Self, H2Error> {
        Ok(match id {
            0x1 => Setting::HeaderTableSize(value),
            0x2 => match value {
                0 => Setting::EnablePush(false),
                1 => Setting::EnablePush(true),
                _ => return Err(H2Error::Protocol("SETTINGS_ENABLE_PUSH must be 0 or 1")),
            },
            0x3 => Setting::MaxConcurrentStreams(value),
            0x4 => {
                if value > MAX_WINDOW_SIZE {
                    return Err(H2Error::FlowControl);
                }
                Setting::InitialWindowSize(value)
            }
            0x5 => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_LIMIT).contains(&value) {
                    return Err(H2Error::Protocol("SETTINGS_MAX_FRAME_SIZE out of range"));
                }
                Setting::MaxFrameSize(value)
            }
            0x6 => Setting::MaxHeaderListSize(value),
            other => Setting::Unknown(other, value),
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        let (id, value) = match *self {
            Setting::HeaderTableSize(v) => (0x1, v),
            Setting::EnablePush(v) => (0x2, u32::from(v)),
            Setting::MaxConcurrentStreams(v) => (0x3, v),
            Setting::InitialWindowSize(v) => (0x4, v),
            Setting::MaxFrameSize(v) => (0x5, v),
            Setting::MaxHeaderListSize(v) => (0x6, v),
            Setting::Unknown(id, v) => (id, v),
        };
        dst.put_u16(id);
        dst.put_u32(value);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
        /// Bytes counted against flow control, padding included.
        flow_len: u32,
    },
    Headers {
        stream_id: u32,
        fragment: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
    },
    RstStream {
        stream_id: u32,
        code: ErrorCode,
    },
    Settings {
        ack: bool,
        settings: Vec<Setting>,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
    /// Frames of unknown type are skipped.
    Unknown {
        frame_type: u8,
        stream_id: u32,
    },
}

fn put_header(dst: &mut BytesMut, len: usize, frame_type: u8, flags: u8, stream_id: u32) {
    dst.reserve(HEADER_LEN + len);
    dst.put_uint(len as u64, 3);
    dst.put_u8(frame_type);
    dst.put_u8(flags);
    dst.put_u32(stream_id & MAX_WINDOW_SIZE);
}

/// Strips the pad length byte and trailing padding of a PADDED frame.
fn strip_padding(payload: &mut Bytes, padded: bool) -> Result<(), H2Error> {
    if !padded {
        return Ok(());
    }
    if payload.is_empty() {
        return Err(H2Error::FrameSize);
    }
    let pad = payload.get_u8() as usize;
    if pad > payload.len() {
        return Err(H2Error::Protocol("padding exceeds frame payload"));
    }
    payload.truncate(payload.len() - pad);
    Ok(())
}

impl Frame {
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    pub fn data(stream_id: u32, payload: Bytes, end_stream: bool) -> Self {
        let flow_len = payload.len() as u32;
        Frame::Data {
            stream_id,
            payload,
            end_stream,
            flow_len,
        }
    }

    /// Appends the wire encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
                ..
            } => {
                let f = if *end_stream { flags::END_STREAM } else { 0 };
                put_header(dst, payload.len(), kind::DATA, f, *stream_id);
                dst.put_slice(payload);
            }
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
            } => {
                let mut f = 0;
                if *end_stream {
                    f |= flags::END_STREAM;
                }
                if *end_headers {
                    f |= flags::END_HEADERS;
                }
                put_header(dst, fragment.len(), kind::HEADERS, f, *stream_id);
                dst.put_slice(fragment);
            }
            Frame::Priority { stream_id } => {
                put_header(dst, 5, kind::PRIORITY, 0, *stream_id);
                dst.put_u32(0);
                dst.put_u8(15);
            }
            Frame::RstStream { stream_id, code } => {
                put_header(dst, 4, kind::RST_STREAM, 0, *stream_id);
                dst.put_u32(code.as_u32());
            }
            Frame::Settings { ack, settings } => {
                let f = if *ack { flags::ACK } else { 0 };
                put_header(dst, settings.len() * 6, kind::SETTINGS, f, 0);
                for setting in settings {
                    setting.encode(dst);
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
            } => {
                put_header(dst, 4, kind::PUSH_PROMISE, flags::END_HEADERS, *stream_id);
                dst.put_u32(*promised_stream_id & MAX_WINDOW_SIZE);
            }
            Frame::Ping { ack, payload } => {
                let f = if *ack { flags::ACK } else { 0 };
                put_header(dst, 8, kind::PING, f, 0);
                dst.put_slice(payload);
            }
            Frame::GoAway {
                last_stream_id,
                code,
                debug_data,
            } => {
                put_header(dst, 8 + debug_data.len(), kind::GOAWAY, 0, 0);
                dst.put_u32(*last_stream_id & MAX_WINDOW_SIZE);
                dst.put_u32(code.as_u32());
                dst.put_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                put_header(dst, 4, kind::WINDOW_UPDATE, 0, *stream_id);
                dst.put_u32(*increment & MAX_WINDOW_SIZE);
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let f = if *end_headers { flags::END_HEADERS } else { 0 };
                put_header(dst, fragment.len(), kind::CONTINUATION, f, *stream_id);
                dst.put_slice(fragment);
            }
            Frame::Unknown { .. } => {}
        }
    }

    /// Parses one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched while the frame is
    /// incomplete.
    pub fn decode(src: &mut BytesMut, max_frame_size: u32) -> Result<Option<Frame>, H2Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = ((src[0] as usize) << 16) | ((src[1] as usize) << 8) | src[2] as usize;
        if len > max_frame_size as usize {
            return Err(H2Error::FrameSize);
        }
        if src.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let mut head = src.split_to(HEADER_LEN);
        head.advance(3);
        let frame_type = head.get_u8();
        let f = head.get_u8();
        let stream_id = head.get_u32() & MAX_WINDOW_SIZE;
        let mut payload = src.split_to(len).freeze();

        let frame = match frame_type {
            kind::DATA => {
                if stream_id == 0 {
                    return Err(H2Error::Protocol("DATA on stream 0"));
                }
                strip_padding(&mut payload, f & flags::PADDED != 0)?;
                Frame::Data {
                    stream_id,
                    payload,
                    end_stream: f & flags::END_STREAM != 0,
                    flow_len: len as u32,
                }
            }
            kind::HEADERS => {
                if stream_id == 0 {
                    return Err(H2Error::Protocol("HEADERS on stream 0"));
                }
                strip_padding(&mut payload, f & flags::PADDED != 0)?;
                if f & flags::PRIORITY != 0 {
                    if payload.len() < 5 {
                        return Err(H2Error::FrameSize);
                    }
                    payload.advance(5);
                }
                Frame::Headers {
                    stream_id,
                    fragment: payload,
                    end_stream: f & flags::END_STREAM != 0,
                    end_headers: f & flags::END_HEADERS != 0,
                }
            }
            kind::PRIORITY => {
                if len != 5 {
                    return Err(H2Error::FrameSize);
                }
                Frame::Priority { stream_id }
            }
            kind::RST_STREAM => {
                if len != 4 {
                    return Err(H2Error::FrameSize);
                }
                if stream_id == 0 {
                    return Err(H2Error::Protocol("RST_STREAM on stream 0"));
                }
                Frame::RstStream {
                    stream_id,
                    code: ErrorCode::from_u32(payload.get_u32()),
                }
            }
            kind::SETTINGS => {
                if stream_id != 0 {
                    return Err(H2Error::Protocol("SETTINGS on a stream"));
                }
                let ack = f & flags::ACK != 0;
                if (ack && len != 0) || len % 6 != 0 {
                    return Err(H2Error::FrameSize);
                }
                let mut settings = Vec::with_capacity(len / 6);
                while payload.has_remaining() {
                    let id = payload.get_u16();
                    let value = payload.get_u32();
                    settings.push(Setting::decode(id, value)?);
                }
                Frame::Settings { ack, settings }
            }
            kind::PUSH_PROMISE => {
                strip_padding(&mut payload, f & flags::PADDED != 0)?;
                if payload.len() < 4 {
                    return Err(H2Error::FrameSize);
                }
                Frame::PushPromise {
                    stream_id,
                    promised_stream_id: payload.get_u32() & MAX_WINDOW_SIZE,
                }
            }
            kind::PING => {
                if len != 8 {
                    return Err(H2Error::FrameSize);
                }
                if stream_id != 0 {
                    return Err(H2Error::Protocol("PING on a stream"));
                }
                let mut data = [0u8; 8];
                payload.copy_to_slice(&mut data);
                Frame::Ping {
                    ack: f & flags::ACK != 0,
                    payload: data,
                }
            }
            kind::GOAWAY => {
                if len < 8 {
                    return Err(H2Error::FrameSize);
                }
                if stream_id != 0 {
                    return Err(H2Error::Protocol("GOAWAY on a stream"));
                }
                let last_stream_id = payload.get_u32() & MAX_WINDOW_SIZE;
                let code = ErrorCode::from_u32(payload.get_u32());
                Frame::GoAway {
                    last_stream_id,
                    code,
                    debug_data: payload,
                }
            }
            kind::WINDOW_UPDATE => {
                if len != 4 {
                    return Err(H2Error::FrameSize);
                }
                let increment = payload.get_u32() & MAX_WINDOW_SIZE;
                if increment == 0 {
                    return Err(H2Error::Protocol("WINDOW_UPDATE with zero increment"));
                }
                Frame::WindowUpdate {
                    stream_id,
                    increment,
                }
            }
            kind::CONTINUATION => {
                if stream_id == 0 {
                    return Err(H2Error::Protocol("CONTINUATION on stream 0"));
                }
                Frame::Continuation {
                    stream_id,
                    fragment: payload,
                    end_headers: f & flags::END_HEADERS != 0,
                }
            }
            other => Frame::Unknown {
                frame_type: other,
                stream_id,
            },
        };

        Ok(Some(frame))
    }
}
