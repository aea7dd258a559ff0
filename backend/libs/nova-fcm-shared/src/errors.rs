use std::path::PathBuf;

use thiserror::Error;

/// FCM Client Error Types
///
/// Rejections by FCM itself are reported through
/// [`FcmResult`](crate::FcmResult), not as errors.
#[derive(Error, Debug)]
pub enum FCMError {
    #[error("Failed to parse private key: {0}")]
    KeyParseError(String),

    #[error("Failed to read service account file {path}: {source}")]
    CredentialFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode JWT: {0}")]
    JwtEncodeError(String),

    #[error("Failed to get access token: {0}")]
    TokenError(String),

    #[error("Token request failed with status: {0}")]
    TokenRequestFailed(String),

    #[error("Failed to parse token response: {0}")]
    TokenParseError(String),

    #[error("FCM send request failed: {0}")]
    SendRequestError(String),

    #[error("Failed to encode FCM message: {0}")]
    EncodeError(String),

    #[error("FCM configuration error: {0}")]
    Config(String),
}

impl FCMError {
    /// Whether the failure happened on the wire while sending the message.
    pub fn is_network(&self) -> bool {
        matches!(self, FCMError::SendRequestError(_))
    }
}

impl From<envy::Error> for FCMError {
    fn from(err: envy::Error) -> Self {
        FCMError::Config(err.to_string())
    }
}

impl From<FCMError> for String {
    fn from(err: FCMError) -> Self {
        err.to_string()
    }
}
