use nova_apns_shared::ApnsError;
use nova_fcm_shared::FCMError;
use thiserror::Error;

use crate::platform::Platform;

/// Push gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("APNs error: {0}")]
    Apns(#[from] ApnsError),

    #[error("FCM error: {0}")]
    Fcm(#[from] FCMError),

    #[error("No push provider configured for {0}")]
    ProviderUnavailable(Platform),

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
