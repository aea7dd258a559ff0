use chrono::{DateTime, Utc};
use nova_h2::{Method, Request};
use uuid::Uuid;

use crate::error::ApnsError;
use crate::payload::ApnsBody;

/// Delivery priority sent as `apns-priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApnsPriority {
    /// Deliver right away
    #[default]
    Immediately,
    /// Deliver when convenient for the device's battery
    EnergyEfficient,
}

impl ApnsPriority {
    pub fn as_u8(self) -> u8 {
        match self {
            ApnsPriority::Immediately => 10,
            ApnsPriority::EnergyEfficient => 5,
        }
    }
}

impl TryFrom<u8> for ApnsPriority {
    type Error = ApnsError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(ApnsPriority::Immediately),
            5 => Ok(ApnsPriority::EnergyEfficient),
            other => Err(ApnsError::Config(format!(
                "APNs priority must be 10 or 5, got {other}"
            ))),
        }
    }
}

/// Value of the `apns-push-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApnsPushType {
    Alert,
    Background,
    Location,
    Voip,
    Complication,
    FileProvider,
    Mdm,
    LiveActivity,
}

impl ApnsPushType {
    pub fn as_str(self) -> &'static str {
        match self {
            ApnsPushType::Alert => "alert",
            ApnsPushType::Background => "background",
            ApnsPushType::Location => "location",
            ApnsPushType::Voip => "voip",
            ApnsPushType::Complication => "complication",
            ApnsPushType::FileProvider => "fileprovider",
            ApnsPushType::Mdm => "mdm",
            ApnsPushType::LiveActivity => "liveactivity",
        }
    }
}

/// A notification addressed to one device.
#[derive(Debug, Clone)]
pub struct ApnsMessage {
    /// Sent as `apns-id` and echoed back by APNs
    pub id: Uuid,
    pub device_token: String,
    pub body: ApnsBody,
    /// Falls back to the client's default
    pub priority: Option<ApnsPriority>,
    pub push_type: Option<ApnsPushType>,
    /// APNs drops the notification after this instant
    pub expiration: Option<DateTime<Utc>>,
    pub collapse_id: Option<String>,
    pub thread_id: Option<String>,
    /// Overrides the client's topic
    pub topic: Option<String>,
}

impl ApnsMessage {
    pub fn new(device_token: impl Into<String>, body: impl Into<ApnsBody>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_token: device_token.into(),
            body: body.into(),
            priority: None,
            push_type: None,
            expiration: None,
            collapse_id: None,
            thread_id: None,
            topic: None,
        }
    }

    pub fn with_priority(mut self, priority: ApnsPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_push_type(mut self, push_type: ApnsPushType) -> Self {
        self.push_type = Some(push_type);
        self
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_collapse_id(mut self, collapse_id: impl Into<String>) -> Self {
        self.collapse_id = Some(collapse_id.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Request path, `/3/device/{device token}`.
    pub fn path(&self) -> String {
        format!("/3/device/{}", self.device_token)
    }

    /// First 8 characters of the device token, for logs.
    pub fn token_prefix(&self) -> String {
        self.device_token.chars().take(8).collect()
    }

    /// Builds the HTTP/2 request for this message.
    pub fn to_request(
        &self,
        default_topic: &str,
        default_priority: ApnsPriority,
        bearer: &str,
    ) -> Result<Request, ApnsError> {
        if self.device_token.is_empty() {
            return Err(ApnsError::Payload("device token is empty".to_string()));
        }

        let priority = self.priority.unwrap_or(default_priority);
        let topic = self.topic.as_deref().unwrap_or(default_topic);

        let mut request = Request::new(Method::Post, self.path())
            .header("apns-id", self.id.to_string());
        if let Some(expiration) = self.expiration {
            request = request.header("apns-expiration", expiration.timestamp().max(0).to_string());
        }
        request = request
            .header("apns-priority", priority.as_u8().to_string())
            .header("apns-topic", topic);
        if let Some(push_type) = self.push_type {
            request = request.header("apns-push-type", push_type.as_str());
        }
        if let Some(collapse_id) = &self.collapse_id {
            request = request.header("apns-collapse-id", collapse_id.as_str());
        }
        if let Some(thread_id) = &self.thread_id {
            request = request.header("thread-id", thread_id.as_str());
        }

        Ok(request
            .header("authorization", format!("bearer {bearer}"))
            .body(self.body.encode()?))
    }
}
