use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Firebase Service Account Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub private_key_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub auth_uri: String,
    pub token_uri: String,
}

/// OAuth2 Token Cache
#[derive(Debug, Clone)]
pub struct TokenCache {
    pub access_token: String,
    pub expires_at: i64,
}

/// JWT Claims for Google OAuth2
#[derive(Debug, Serialize)]
pub struct JwtClaims {
    pub iss: String,
    pub sub: String,
    pub scope: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

/// Google OAuth2 Token Response
#[derive(Debug, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
}

/// Who receives a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FcmTarget {
    Token(String),
    Topic(String),
    Condition(String),
}

/// FCM HTTP v1 message
#[derive(Debug, Clone, Serialize)]
pub struct FcmMessage {
    #[serde(flatten)]
    pub target: FcmTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<FcmNotification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpush: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns: Option<serde_json::Value>,
}

impl FcmMessage {
    pub fn to_token(device_token: impl Into<String>) -> Self {
        Self::new(FcmTarget::Token(device_token.into()))
    }

    pub fn to_topic(topic: impl Into<String>) -> Self {
        Self::new(FcmTarget::Topic(topic.into()))
    }

    pub fn to_condition(condition: impl Into<String>) -> Self {
        Self::new(FcmTarget::Condition(condition.into()))
    }

    fn new(target: FcmTarget) -> Self {
        Self {
            target,
            notification: None,
            data: None,
            android: None,
            webpush: None,
            apns: None,
        }
    }

    pub fn notification(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.notification = Some(FcmNotification {
            title: Some(title.into()),
            body: Some(body.into()),
            image: None,
        });
        self
    }

    pub fn data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn android(mut self, config: serde_json::Value) -> Self {
        self.android = Some(config);
        self
    }

    pub fn webpush(mut self, config: serde_json::Value) -> Self {
        self.webpush = Some(config);
        self
    }

    pub fn apns(mut self, config: serde_json::Value) -> Self {
        self.apns = Some(config);
        self
    }
}

/// FCM Notification Payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FcmNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Body of `POST /v1/projects/{project}/messages:send`
#[derive(Debug, Serialize)]
pub struct SendRequest<'a> {
    pub validate_only: bool,
    pub message: &'a FcmMessage,
}

/// FCM API Response
#[derive(Debug, Deserialize)]
pub struct FcmApiResponse {
    pub name: Option<String>,
}

/// Error envelope returned by the v1 API
#[derive(Debug, Deserialize)]
pub struct FcmErrorEnvelope {
    pub error: FcmErrorResponse,
}

#[derive(Debug, Deserialize)]
pub struct FcmErrorResponse {
    pub code: Option<u16>,
    pub message: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct FcmErrorDetail {
    #[serde(rename = "@type", default)]
    pub kind: Option<String>,
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<String>,
}

/// Legacy `POST /fcm/send` message
#[derive(Debug, Serialize)]
pub struct LegacyMessage {
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    pub priority: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<FcmNotification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,
}

impl LegacyMessage {
    /// Maps a v1 message onto the legacy format. Conditions have no legacy
    /// equivalent and are rejected.
    pub fn from_message(message: &FcmMessage) -> Option<Self> {
        let to = match &message.target {
            FcmTarget::Token(token) => token.clone(),
            FcmTarget::Topic(topic) => format!("/topics/{topic}"),
            FcmTarget::Condition(_) => return None,
        };
        Some(Self {
            to,
            collapse_key: None,
            priority: "high",
            notification: message.notification.clone(),
            data: message.data.clone(),
        })
    }
}

/// Legacy API response
#[derive(Debug, Deserialize)]
pub struct LegacyResponse {
    #[serde(default)]
    pub multicast_id: Option<i64>,
    /// Set instead of `results` for topic sends
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub failure: u32,
    #[serde(default)]
    pub results: Vec<LegacyResult>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyResult {
    pub message_id: Option<String>,
    pub error: Option<String>,
}
