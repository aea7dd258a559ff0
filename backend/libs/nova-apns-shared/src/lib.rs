/// Nova APNs Shared Library
///
/// This library provides the Apple Push Notification Service (APNs) client
/// used across the Nova platform to reach iOS and macOS devices.
///
/// It handles:
/// - Provider token authentication (ES256, refreshed before expiry)
/// - A persistent HTTP/2 connection to the APNs gateway
/// - Payload building and request headers
/// - Mapping responses into success, rejection or network results
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod payload;
pub mod result;

pub use client::{ApnsClient, ApnsEndpoint};
pub use config::ApnsConfig;
pub use error::ApnsError;
pub use message::{ApnsMessage, ApnsPriority, ApnsPushType};
pub use payload::{Alert, ApnsBody, ApnsPayload};
pub use result::{ApnsReason, ApnsResult};
