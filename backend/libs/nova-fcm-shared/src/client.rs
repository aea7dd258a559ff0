use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{FcmConfig, FcmProfile, DEFAULT_API_BASE_URL};
use crate::errors::FCMError;
use crate::models::*;
use crate::result::{FcmErrorCode, FcmResult};

const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Firebase Cloud Messaging Client
///
/// Handles Firebase Cloud Messaging (FCM) for Android and Web push notifications.
/// Manages OAuth2 token generation, caching, and message delivery.
pub struct FCMClient {
    profile: FcmProfile,
    api_base_url: String,
    validate_only: bool,
    token_cache: Arc<Mutex<Option<TokenCache>>>,
    http_client: reqwest::Client,
    android_default: Option<serde_json::Value>,
    webpush_default: Option<serde_json::Value>,
    apns_default: Option<serde_json::Value>,
}

impl FCMClient {
    /// Create new FCM client
    ///
    /// # Arguments
    /// * `project_id` - Firebase project ID
    /// * `credentials` - Service account key with OAuth2 credentials
    pub fn new(project_id: String, credentials: ServiceAccountKey) -> Self {
        Self::with_profile(FcmProfile::ServiceAccount {
            project_id,
            key: credentials,
        })
    }

    /// Create a client for the legacy API authenticated by a server key
    pub fn with_server_key(server_key: impl Into<String>) -> Self {
        Self::with_profile(FcmProfile::ServerKey(server_key.into()))
    }

    pub fn with_profile(profile: FcmProfile) -> Self {
        Self {
            profile,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            validate_only: false,
            token_cache: Arc::new(Mutex::new(None)),
            http_client: reqwest::Client::new(),
            android_default: None,
            webpush_default: None,
            apns_default: None,
        }
    }

    pub fn from_config(cfg: &FcmConfig) -> Result<Self, FCMError> {
        let client = Self::with_profile(cfg.profile()?)
            .with_api_base_url(cfg.api_base_url.clone())
            .with_validate_only(cfg.validate_only);
        info!(
            "Initialized FCM client for project={}, legacy={}",
            client.project_id().unwrap_or("-"),
            matches!(client.profile, FcmProfile::ServerKey(_))
        );
        Ok(client)
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }

    /// Android config applied to messages that carry none
    pub fn with_default_android(mut self, config: serde_json::Value) -> Self {
        self.android_default = Some(config);
        self
    }

    /// Webpush config applied to messages that carry none
    pub fn with_default_webpush(mut self, config: serde_json::Value) -> Self {
        self.webpush_default = Some(config);
        self
    }

    /// APNs config applied to messages that carry none
    pub fn with_default_apns(mut self, config: serde_json::Value) -> Self {
        self.apns_default = Some(config);
        self
    }

    pub fn project_id(&self) -> Option<&str> {
        match &self.profile {
            FcmProfile::ServiceAccount { project_id, .. } => Some(project_id),
            FcmProfile::ServerKey(_) => None,
        }
    }

    /// Send notification via FCM to a single device
    pub async fn send_notification(
        &self,
        device_token: &str,
        title: &str,
        body: &str,
        data: Option<HashMap<String, String>>,
    ) -> Result<FcmResult, FCMError> {
        let mut message = FcmMessage::to_token(device_token).notification(title, body);
        message.data = data;
        self.send(message).await
    }

    /// Sends a message through the API the profile selects.
    ///
    /// FCM rejections and transport failures come back as `Ok` results.
    /// `Err` covers credential, token exchange and encoding failures.
    pub async fn send(&self, mut message: FcmMessage) -> Result<FcmResult, FCMError> {
        self.apply_defaults(&mut message);

        let result = match &self.profile {
            FcmProfile::ServiceAccount { project_id, .. } => {
                self.send_v1(project_id, &message).await?
            }
            FcmProfile::ServerKey(server_key) => self.send_legacy(server_key, &message).await?,
        };

        let target = target_prefix(&message.target);
        match &result {
            FcmResult::Success { message_id } => info!(
                "FCM notification sent successfully to {} (message_id: {})",
                target, message_id
            ),
            FcmResult::Error { status, code, .. } => warn!(
                status = *status,
                code = %code,
                "FCM rejected notification for {}", target
            ),
            FcmResult::NetworkError(e) => error!("FCM send failed for {}: {}", target, e),
        }
        Ok(result)
    }

    /// Validate device token format
    pub fn validate_token(&self, device_token: &str) -> bool {
        // FCM tokens are typically 100-200 characters
        device_token.len() >= 10 && device_token.len() <= 1000
    }

    fn apply_defaults(&self, message: &mut FcmMessage) {
        if message.android.is_none() {
            message.android = self.android_default.clone();
        }
        if message.webpush.is_none() {
            message.webpush = self.webpush_default.clone();
        }
        if message.apns.is_none() {
            message.apns = self.apns_default.clone();
        }
    }

    async fn send_v1(&self, project_id: &str, message: &FcmMessage) -> Result<FcmResult, FCMError> {
        let access_token = self.get_access_token().await?;

        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.api_base_url, project_id
        );
        let request = SendRequest {
            validate_only: self.validate_only,
            message,
        };

        let response = match self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(FcmResult::NetworkError(FCMError::SendRequestError(e.to_string()))),
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Ok(FcmResult::NetworkError(FCMError::SendRequestError(e.to_string()))),
        };

        if status.is_success() {
            return Ok(match serde_json::from_slice::<FcmApiResponse>(&body) {
                Ok(parsed) => FcmResult::Success {
                    message_id: parsed.name.unwrap_or_default(),
                },
                Err(e) => FcmResult::Error {
                    status: status.as_u16(),
                    code: FcmErrorCode::UnspecifiedError,
                    message: Some(format!("Failed to parse FCM response: {e}")),
                },
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_access_token().await;
        }
        Ok(FcmResult::from_v1_error(status.as_u16(), &body))
    }

    async fn send_legacy(&self, server_key: &str, message: &FcmMessage) -> Result<FcmResult, FCMError> {
        let legacy = LegacyMessage::from_message(message).ok_or_else(|| {
            FCMError::EncodeError("condition targets need the HTTP v1 API".to_string())
        })?;

        let url = format!("{}/fcm/send", self.api_base_url);
        let response = match self
            .http_client
            .post(&url)
            .header("Authorization", format!("key={}", server_key))
            .json(&legacy)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(FcmResult::NetworkError(FCMError::SendRequestError(e.to_string()))),
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.ok().filter(|text| !text.is_empty());
            return Ok(FcmResult::Error {
                status: status.as_u16(),
                code: FcmErrorCode::from_status(status.as_u16()),
                message,
            });
        }

        match response.json::<LegacyResponse>().await {
            Ok(parsed) => Ok(FcmResult::from_legacy(parsed)),
            Err(e) => Ok(FcmResult::Error {
                status: status.as_u16(),
                code: FcmErrorCode::UnspecifiedError,
                message: Some(format!("Failed to parse FCM response: {e}")),
            }),
        }
    }

    /// Get access token from service account (with caching)
    ///
    /// The cache lock is held across the exchange, so concurrent callers
    /// with an expired token wait for a single refresh.
    pub async fn get_access_token(&self) -> Result<String, FCMError> {
        let FcmProfile::ServiceAccount { key, .. } = &self.profile else {
            return Err(FCMError::Config(
                "server key profiles do not use access tokens".to_string(),
            ));
        };

        let mut cache = self.token_cache.lock().await;

        // Check if we have a cached token that's still valid
        if let Some(cached) = cache.as_ref() {
            let now = Utc::now().timestamp();
            if cached.expires_at > now + 60 {
                // Token is still valid for at least 60 more seconds
                return Ok(cached.access_token.clone());
            }
        }

        // Generate new JWT and exchange for access token
        let now = Utc::now();
        let claims = JwtClaims {
            iss: key.client_email.clone(),
            sub: key.client_email.clone(),
            scope: OAUTH_SCOPE.to_string(),
            aud: key.token_uri.clone(),
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };

        // Sign JWT with private key
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| FCMError::KeyParseError(e.to_string()))?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.private_key_id.clone());

        let assertion = encode(&header, &claims, &encoding_key)
            .map_err(|e| FCMError::JwtEncodeError(e.to_string()))?;

        // Exchange JWT for access token
        let params = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];

        let response = self
            .http_client
            .post(&key.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| FCMError::TokenError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FCMError::TokenRequestFailed(response.status().to_string()));
        }

        let token_response: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| FCMError::TokenParseError(e.to_string()))?;

        // Cache the token
        let expires_at = Utc::now().timestamp() + token_response.expires_in;
        *cache = Some(TokenCache {
            access_token: token_response.access_token.clone(),
            expires_at,
        });
        info!(client_email = %key.client_email, "Obtained FCM access token");

        Ok(token_response.access_token)
    }

    async fn invalidate_access_token(&self) {
        *self.token_cache.lock().await = None;
    }
}

/// Target for logs; device tokens are cut to 8 characters.
fn target_prefix(target: &FcmTarget) -> String {
    match target {
        FcmTarget::Token(token) => format!("token {}", token.chars().take(8).collect::<String>()),
        FcmTarget::Topic(topic) => format!("topic {topic}"),
        FcmTarget::Condition(_) => "condition".to_string(),
    }
}
