use std::path::PathBuf;

use nova_h2::{CertificateVerification, ClientConfig};
use nova_push_auth::CredentialProfile;
use serde::Deserialize;

use crate::error::ApnsError;
use crate::message::ApnsPriority;

pub const PRODUCTION_HOST: &str = "api.push.apple.com";
pub const DEVELOPMENT_HOST: &str = "api.sandbox.push.apple.com";
pub const DEFAULT_PORT: u16 = 443;
pub const ALTERNATE_PORT: u16 = 2197;

/// APNs Configuration
///
/// Loaded from `APNS_*` environment variables by [`ApnsConfig::from_env`].
#[derive(Debug, Clone, Deserialize)]
pub struct ApnsConfig {
    /// Developer team id, the token issuer
    pub team_id: String,
    pub key_id: String,
    /// Path to the `.p8` auth key
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Hex-encoded private scalar, used when no key path is set
    #[serde(default)]
    pub key_hex: Option<String>,
    /// Bundle id sent as `apns-topic`
    pub topic: String,
    #[serde(default)]
    pub is_production: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_priority")]
    pub default_priority: u8,
    /// Skips server certificate verification. Local testing only.
    #[serde(default)]
    pub insecure_tls: bool,
    /// Replaces the environment host, e.g. for a local gateway
    #[serde(default)]
    pub host: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_priority() -> u8 {
    ApnsPriority::Immediately.as_u8()
}

impl ApnsConfig {
    pub fn new(
        team_id: impl Into<String>,
        key_id: impl Into<String>,
        topic: impl Into<String>,
        is_production: bool,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            key_id: key_id.into(),
            key_path: None,
            key_hex: None,
            topic: topic.into(),
            is_production,
            port: DEFAULT_PORT,
            default_priority: default_priority(),
            insecure_tls: false,
            host: None,
        }
    }

    pub fn from_env() -> Result<Self, ApnsError> {
        Ok(envy::prefixed("APNS_").from_env::<ApnsConfig>()?)
    }

    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn with_key_hex(mut self, key_hex: impl Into<String>) -> Self {
        self.key_hex = Some(key_hex.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Get APNs API endpoint based on environment
    pub fn endpoint(&self) -> &str {
        if let Some(host) = self.host.as_deref() {
            return host;
        }
        if self.is_production {
            PRODUCTION_HOST
        } else {
            DEVELOPMENT_HOST
        }
    }

    pub fn priority(&self) -> Result<ApnsPriority, ApnsError> {
        ApnsPriority::try_from(self.default_priority)
    }

    pub fn validate(&self) -> Result<(), ApnsError> {
        if self.port != DEFAULT_PORT && self.port != ALTERNATE_PORT && self.host.is_none() {
            return Err(ApnsError::Config(format!(
                "APNs listens on {DEFAULT_PORT} or {ALTERNATE_PORT}, got {}",
                self.port
            )));
        }
        if self.topic.is_empty() {
            return Err(ApnsError::Config("topic must not be empty".to_string()));
        }
        self.priority()?;
        Ok(())
    }

    /// Loads the signing key from the key file, or from `key_hex` when no
    /// file is configured.
    pub fn credential_profile(&self) -> Result<CredentialProfile, ApnsError> {
        let profile = match (&self.key_path, &self.key_hex) {
            (Some(path), _) => CredentialProfile::from_pem_file(&self.team_id, &self.key_id, path)?,
            (None, Some(key_hex)) => CredentialProfile::from_hex(&self.team_id, &self.key_id, key_hex)?,
            (None, None) => {
                return Err(ApnsError::Config(
                    "either APNS_KEY_PATH or APNS_KEY_HEX must be set".to_string(),
                ))
            }
        };
        Ok(profile)
    }

    pub fn client_config(&self) -> ClientConfig {
        let verification = if self.insecure_tls {
            CertificateVerification::Insecure
        } else {
            CertificateVerification::Verify
        };
        ClientConfig::default().with_verification(verification)
    }
}
