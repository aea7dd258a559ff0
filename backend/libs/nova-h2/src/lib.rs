//! Nova HTTP/2 client
//!
//! A small multiplexed HTTP/2 client for provider gateways that speak h2
//! only. It owns the framing (RFC 7540), header compression (RFC 7541) and
//! TLS setup, and exposes a request/response contract on top.
//!
//! # Example
//!
//! ```rust,ignore
//! use nova_h2::{ClientConfig, Connection, Method, Request, Scheme};
//!
//! let conn = Connection::connect(Scheme::Https, "api.push.apple.com", 443, &ClientConfig::default()).await?;
//! let response = conn.send(Request::new(Method::Post, "/3/device/abc").body("{}")).await?;
//! ```
//!
//! Responses are paired with requests in completion order. Callers that
//! need each response matched to its own request submit one at a time.

pub mod config;
pub mod connection;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod header_block;
pub mod hpack;
mod huffman;
pub mod message;
pub mod method;
pub mod tls;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{CertificateVerification, ClientConfig, Scheme};
pub use connection::Connection;
pub use error::{ClientError, ConnectError, H2Error, ProtocolViolation};
pub use header_block::{HeaderBlock, HeaderIndex};
pub use message::{Headers, Request, RequestHead, Response, ResponseHead, Version};
pub use method::Method;
