use std::path::PathBuf;

use thiserror::Error;

/// Credential loading and token signing errors
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Invalid key material: {0}")]
    Key(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Failed to read key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Token encoding error: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for CredentialError {
    fn from(err: serde_json::Error) -> Self {
        CredentialError::Encoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CredentialError>;
