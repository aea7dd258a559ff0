use std::sync::Arc;

use nova_apns_shared::{ApnsClient, ApnsMessage, ApnsPayload, ApnsResult};
use nova_fcm_shared::{FCMClient, FcmErrorCode, FcmMessage, FcmResult};
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::GatewayError;

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the provider; `id` is the provider's message id
    Sent { id: String },
    /// Refused by the provider. `unregistered` means the device token
    /// should be dropped.
    Rejected { reason: String, unregistered: bool },
    /// The provider could not be reached
    Unreachable(String),
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent { .. })
    }
}

/// Trait for push notification providers
#[async_trait::async_trait]
pub trait PushProvider: Send + Sync {
    /// Sends a push notification to a device
    ///
    /// # Arguments
    /// * `device_token` - Device token (APNs device token or FCM registration token)
    /// * `title` - Notification title
    /// * `body` - Notification body text
    /// * `badge` - Optional badge count to display on app icon
    async fn send(
        &self,
        device_token: String,
        title: String,
        body: String,
        badge: Option<u32>,
    ) -> Result<Delivery, GatewayError>;

    /// Short provider name for logs
    fn name(&self) -> &'static str;
}

pub type DynPushProvider = Arc<dyn PushProvider>;

fn token_prefix(device_token: &str) -> String {
    device_token.chars().take(8).collect()
}

/// Apple Push Notification Service (APNs) provider
#[derive(Clone)]
pub struct ApnsPush {
    client: Arc<ApnsClient>,
}

impl ApnsPush {
    pub fn new(client: ApnsClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

#[async_trait::async_trait]
impl PushProvider for ApnsPush {
    async fn send(
        &self,
        device_token: String,
        title: String,
        body: String,
        badge: Option<u32>,
    ) -> Result<Delivery, GatewayError> {
        let device_token_prefix = token_prefix(&device_token);

        let mut payload = ApnsPayload::new().title(title).body(body).sound("default");
        if let Some(badge_count) = badge {
            payload = payload.badge(badge_count);
        }

        let message = ApnsMessage::new(device_token, payload);
        let delivery = match self.client.send(&message).await? {
            ApnsResult::Success { apns_id, .. } => Delivery::Sent { id: apns_id },
            ApnsResult::Error { reason, status, .. } => {
                warn!(
                    "APNs rejected notification for token {}: {} ({})",
                    device_token_prefix, reason, status
                );
                Delivery::Rejected {
                    reason: reason.to_string(),
                    unregistered: reason.is_permanent_token_failure(),
                }
            }
            ApnsResult::NetworkError { error: e, .. } => {
                error!("APNs send failed for token {}: {}", device_token_prefix, e);
                Delivery::Unreachable(e.to_string())
            }
        };

        if let Delivery::Sent { id } = &delivery {
            info!(
                "APNs notification sent successfully to token {} (apns_id: {})",
                device_token_prefix, id
            );
        }
        Ok(delivery)
    }

    fn name(&self) -> &'static str {
        "apns"
    }
}

/// Firebase Cloud Messaging provider for Android and Web devices
#[derive(Clone)]
pub struct FcmPush {
    client: Arc<FCMClient>,
}

impl FcmPush {
    pub fn new(client: FCMClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

#[async_trait::async_trait]
impl PushProvider for FcmPush {
    async fn send(
        &self,
        device_token: String,
        title: String,
        body: String,
        badge: Option<u32>,
    ) -> Result<Delivery, GatewayError> {
        let device_token_prefix = token_prefix(&device_token);

        let mut message = FcmMessage::to_token(device_token).notification(title, body);
        if let Some(badge_count) = badge {
            // Only iOS devices registered through FCM show a badge
            message = message.apns(json!({"payload": {"aps": {"badge": badge_count}}}));
        }

        let delivery = match self.client.send(message).await? {
            FcmResult::Success { message_id } => {
                info!(
                    "FCM notification sent successfully to token {} (message_id: {})",
                    device_token_prefix, message_id
                );
                Delivery::Sent { id: message_id }
            }
            FcmResult::Error { status, code, .. } => {
                warn!(
                    "FCM rejected notification for token {}: {} ({})",
                    device_token_prefix, code, status
                );
                Delivery::Rejected {
                    reason: code.to_string(),
                    unregistered: code == FcmErrorCode::Unregistered,
                }
            }
            FcmResult::NetworkError(e) => {
                error!("FCM send failed for token {}: {}", device_token_prefix, e);
                Delivery::Unreachable(e.to_string())
            }
        };
        Ok(delivery)
    }

    fn name(&self) -> &'static str {
        "fcm"
    }
}
