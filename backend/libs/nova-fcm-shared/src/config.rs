use std::path::PathBuf;

use serde::Deserialize;

use crate::errors::FCMError;
use crate::models::ServiceAccountKey;

pub const DEFAULT_API_BASE_URL: &str = "https://fcm.googleapis.com";

/// FCM Configuration
///
/// Loaded from `FCM_*` environment variables by [`FcmConfig::from_env`].
/// A service account selects the HTTP v1 API; a server key alone selects
/// the legacy API.
#[derive(Debug, Clone, Deserialize)]
pub struct FcmConfig {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub service_account_path: Option<PathBuf>,
    #[serde(default)]
    pub server_key: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Ask FCM to validate messages without delivering them
    #[serde(default)]
    pub validate_only: bool,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

/// Credentials the client authenticates with.
#[derive(Debug, Clone)]
pub enum FcmProfile {
    ServiceAccount {
        project_id: String,
        key: ServiceAccountKey,
    },
    ServerKey(String),
}

impl FcmConfig {
    pub fn from_env() -> Result<Self, FCMError> {
        Ok(envy::prefixed("FCM_").from_env::<FcmConfig>()?)
    }

    /// Resolves the credentials, reading the service account file if one is
    /// configured. The project id defaults to the one in the key file.
    pub fn profile(&self) -> Result<FcmProfile, FCMError> {
        if let Some(path) = &self.service_account_path {
            let raw = std::fs::read_to_string(path).map_err(|source| FCMError::CredentialFile {
                path: path.clone(),
                source,
            })?;
            let key: ServiceAccountKey = serde_json::from_str(&raw)
                .map_err(|e| FCMError::KeyParseError(format!("invalid service account JSON: {e}")))?;
            let project_id = self
                .project_id
                .clone()
                .unwrap_or_else(|| key.project_id.clone());
            return Ok(FcmProfile::ServiceAccount { project_id, key });
        }

        match &self.server_key {
            Some(server_key) if !server_key.is_empty() => {
                Ok(FcmProfile::ServerKey(server_key.clone()))
            }
            _ => Err(FCMError::Config(
                "either FCM_SERVICE_ACCOUNT_PATH or FCM_SERVER_KEY must be set".to_string(),
            )),
        }
    }
}
