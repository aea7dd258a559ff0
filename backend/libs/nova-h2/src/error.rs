use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::frame::ErrorCode;

/// A header block that cannot be mapped onto a request or response head.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("protocol violation: {0}")]
pub struct ProtocolViolation(pub String);

impl ProtocolViolation {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Framing and header compression errors raised while driving a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum H2Error {
    #[error("frame size error")]
    FrameSize,

    #[error("protocol error: {0}")]
    Protocol(&'static str),

    #[error("header compression error: {0}")]
    Compression(&'static str),

    #[error("flow control error")]
    FlowControl,
}

impl H2Error {
    /// Error code sent to the peer in GOAWAY.
    pub fn code(&self) -> ErrorCode {
        match self {
            H2Error::FrameSize => ErrorCode::FrameSizeError,
            H2Error::Protocol(_) => ErrorCode::ProtocolError,
            H2Error::Compression(_) => ErrorCode::CompressionError,
            H2Error::FlowControl => ErrorCode::FlowControlError,
        }
    }
}

/// Failure to establish a connection.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP/2 handshake failed: {0}")]
    Handshake(String),
}

impl From<rustls::Error> for ConnectError {
    fn from(err: rustls::Error) -> Self {
        ConnectError::Tls(err.to_string())
    }
}

/// Failure of a single request/response exchange.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection closed before the exchange completed")]
    ConnectionClosed,

    #[error(transparent)]
    ProtocolViolation(#[from] ProtocolViolation),

    #[error("stream reset by peer: {0:?}")]
    StreamReset(ErrorCode),

    #[error("network error: {0}")]
    Network(#[from] io::Error),
}

impl From<H2Error> for ClientError {
    fn from(err: H2Error) -> Self {
        ClientError::ProtocolViolation(ProtocolViolation(err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
