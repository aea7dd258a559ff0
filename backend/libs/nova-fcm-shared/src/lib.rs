/// Nova FCM Shared Library
///
/// This library provides a unified Firebase Cloud Messaging (FCM) client
/// for sending push notifications to Android and Web devices across the Nova platform.
///
/// It handles:
/// - OAuth2 token generation using Google service accounts
/// - Token caching with automatic refresh
/// - HTTP v1 and legacy server-key delivery
/// - Default platform configs and error code mapping

pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod result;

pub use client::FCMClient;
pub use config::{FcmConfig, FcmProfile};
pub use errors::FCMError;
pub use models::{FcmMessage, FcmNotification, FcmTarget, ServiceAccountKey};
pub use result::{FcmErrorCode, FcmResult};
