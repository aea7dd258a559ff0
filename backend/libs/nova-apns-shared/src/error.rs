use nova_h2::{ClientError, ConnectError};
use nova_push_auth::CredentialError;
use thiserror::Error;

/// APNs client errors
///
/// Rejections by APNs itself are not errors; they come back as
/// [`ApnsResult::Error`](crate::ApnsResult::Error).
#[derive(Error, Debug)]
pub enum ApnsError {
    #[error("APNs credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid APNs payload: {0}")]
    Payload(String),

    #[error("APNs configuration error: {0}")]
    Config(String),

    #[error("Failed to connect to APNs: {0}")]
    Connect(#[from] ConnectError),

    #[error("APNs request failed: {0}")]
    Transport(#[from] ClientError),
}

impl ApnsError {
    /// Whether the failure happened on the wire rather than while building
    /// the request.
    pub fn is_network(&self) -> bool {
        matches!(self, ApnsError::Connect(_) | ApnsError::Transport(_))
    }
}

impl From<serde_json::Error> for ApnsError {
    fn from(err: serde_json::Error) -> Self {
        ApnsError::Payload(err.to_string())
    }
}

impl From<envy::Error> for ApnsError {
    fn from(err: envy::Error) -> Self {
        ApnsError::Config(err.to_string())
    }
}
