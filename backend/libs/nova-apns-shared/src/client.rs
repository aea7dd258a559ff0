use std::sync::Arc;

use nova_h2::{ClientConfig, Connection, Response, Scheme};
use nova_push_auth::TokenManager;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::ApnsConfig;
use crate::error::ApnsError;
use crate::message::{ApnsMessage, ApnsPriority};
use crate::result::{ApnsReason, ApnsResult};

/// Where the client connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnsEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl ApnsEndpoint {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }
}

/// Apple Push Notification Service (APNs) client
///
/// Holds one HTTP/2 connection, opened on first use and reopened after it
/// drops. Sends are serialized on that connection so every response is
/// paired with its own request. `close` never waits for an in-flight send.
pub struct ApnsClient {
    endpoint: ApnsEndpoint,
    h2_config: ClientConfig,
    tokens: Arc<TokenManager>,
    topic: String,
    default_priority: ApnsPriority,
    connection: Mutex<Option<Connection>>,
    /// Held for a whole exchange; the connection slot is only held briefly.
    submission: Mutex<()>,
}

impl ApnsClient {
    /// Creates a client from configuration, loading the signing key.
    pub fn new(cfg: &ApnsConfig) -> Result<Self, ApnsError> {
        cfg.validate()?;
        let profile = cfg.credential_profile()?;
        let tokens = Arc::new(TokenManager::new(profile));

        info!(
            "Initialized APNs client for topic={}, production={}",
            cfg.topic, cfg.is_production
        );

        Ok(Self::with_token_manager(
            ApnsEndpoint::new(Scheme::Https, cfg.endpoint(), cfg.port),
            cfg.client_config(),
            tokens,
            cfg.topic.clone(),
        )
        .with_default_priority(cfg.priority()?))
    }

    /// Creates a client around an existing token manager, e.g. one shared
    /// with another client for the same key.
    pub fn with_token_manager(
        endpoint: ApnsEndpoint,
        h2_config: ClientConfig,
        tokens: Arc<TokenManager>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            h2_config,
            tokens,
            topic: topic.into(),
            default_priority: ApnsPriority::Immediately,
            connection: Mutex::new(None),
            submission: Mutex::new(()),
        }
    }

    pub fn with_default_priority(mut self, priority: ApnsPriority) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn endpoint(&self) -> &ApnsEndpoint {
        &self.endpoint
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Sends a notification and maps the response.
    ///
    /// APNs rejections and transport failures come back as `Ok` results.
    /// `Err` is reserved for failures before anything was sent: bad key
    /// material or an unencodable payload.
    pub async fn send(&self, message: &ApnsMessage) -> Result<ApnsResult, ApnsError> {
        let apns_id = message.id.to_string();
        let device_token_prefix = message.token_prefix();

        let response = match self.send_raw(message).await {
            Ok(response) => response,
            Err(e) if e.is_network() => {
                error!(
                    "APNs send failed for token {}: {}",
                    device_token_prefix, e
                );
                return Ok(ApnsResult::NetworkError {
                    apns_id,
                    device_token: message.device_token.clone(),
                    error: e,
                });
            }
            Err(e) => return Err(e),
        };

        let result = ApnsResult::from_response(&apns_id, &message.device_token, &response);
        match &result {
            ApnsResult::Success { apns_id, .. } => {
                info!(
                    "APNs notification sent successfully to token {} (apns_id: {})",
                    device_token_prefix, apns_id
                );
            }
            ApnsResult::Error { status, reason, .. } => {
                if *reason == ApnsReason::ExpiredProviderToken {
                    self.tokens.invalidate();
                }
                warn!(
                    status = *status,
                    reason = %reason,
                    "APNs rejected notification for token {}", device_token_prefix
                );
            }
            ApnsResult::NetworkError { .. } => {}
        }
        Ok(result)
    }

    /// Sends a notification and returns the response as received.
    pub async fn send_raw(&self, message: &ApnsMessage) -> Result<Response, ApnsError> {
        let token = self.tokens.token()?;
        let request = message.to_request(&self.topic, self.default_priority, token.as_str())?;

        let _submission = self.submission.lock().await;
        let connection = self.current_connection().await?;

        match connection.send(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                let mut slot = self.connection.lock().await;
                if slot.as_ref().is_some_and(|c| !c.is_connected()) {
                    *slot = None;
                }
                Err(e.into())
            }
        }
    }

    /// Closes the current connection, if any. An exchange still in flight
    /// fails with `ConnectionClosed`. The next send reconnects.
    pub async fn close(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            connection.close().await;
        }
    }

    async fn current_connection(&self) -> Result<Connection, ApnsError> {
        {
            let slot = self.connection.lock().await;
            if let Some(connection) = slot.as_ref().filter(|c| c.is_connected()) {
                return Ok(connection.clone());
            }
        }

        let connection = self.connect().await?;
        *self.connection.lock().await = Some(connection.clone());
        Ok(connection)
    }

    async fn connect(&self) -> Result<Connection, ApnsError> {
        let connection = Connection::connect(
            self.endpoint.scheme,
            &self.endpoint.host,
            self.endpoint.port,
            &self.h2_config,
        )
        .await?;
        info!(host = %self.endpoint.host, port = self.endpoint.port, "Connected to APNs");
        Ok(connection)
    }
}

impl std::fmt::Debug for ApnsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApnsClient")
            .field("endpoint", &self.endpoint)
            .field("topic", &self.topic)
            .field("default_priority", &self.default_priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_from_config() {
        let cfg = ApnsConfig::new("TEAM1", "KEY1", "com.example.app", true)
            .with_key_hex("11".repeat(32))
            .with_port(crate::config::ALTERNATE_PORT);

        let client = ApnsClient::new(&cfg).unwrap();
        assert_eq!(
            client.endpoint(),
            &ApnsEndpoint::new(Scheme::Https, "api.push.apple.com", 2197)
        );
        assert_eq!(client.token_manager().profile().issuer(), "TEAM1");
    }

    #[test]
    fn test_client_requires_key() {
        let cfg = ApnsConfig::new("TEAM1", "KEY1", "com.example.app", false);
        assert!(matches!(ApnsClient::new(&cfg), Err(ApnsError::Config(_))));
    }
}
