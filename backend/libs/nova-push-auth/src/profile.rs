use std::fmt;
use std::path::Path;

use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;

use crate::error::{CredentialError, Result};

const SCALAR_LEN: usize = 32;

/// Signing identity: private key, key id and issuer.
///
/// The public key is derived once at construction.
#[derive(Clone)]
pub struct CredentialProfile {
    issuer: String,
    key_id: String,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl CredentialProfile {
    /// Builds a profile from a raw big-endian private scalar.
    ///
    /// Leading zero bytes beyond 32 are ignored and shorter scalars are
    /// left-padded, so DER-style encodings of the scalar are accepted.
    pub fn from_raw_scalar(
        issuer: impl Into<String>,
        key_id: impl Into<String>,
        scalar: &[u8],
    ) -> Result<Self> {
        let first_nonzero = scalar.iter().position(|b| *b != 0).unwrap_or(scalar.len());
        let trimmed = &scalar[first_nonzero..];
        if trimmed.is_empty() || trimmed.len() > SCALAR_LEN {
            return Err(CredentialError::Key(format!(
                "expected a {SCALAR_LEN}-byte P-256 scalar, got {} significant bytes",
                trimmed.len()
            )));
        }

        let mut padded = [0u8; SCALAR_LEN];
        padded[SCALAR_LEN - trimmed.len()..].copy_from_slice(trimmed);
        let signing_key = SigningKey::from_slice(&padded)
            .map_err(|e| CredentialError::Key(e.to_string()))?;

        Ok(Self::from_signing_key(issuer, key_id, signing_key))
    }

    /// Builds a profile from a hex-encoded private scalar.
    pub fn from_hex(
        issuer: impl Into<String>,
        key_id: impl Into<String>,
        scalar_hex: &str,
    ) -> Result<Self> {
        let scalar = hex::decode(scalar_hex.trim())
            .map_err(|e| CredentialError::Key(format!("invalid hex scalar: {e}")))?;
        Self::from_raw_scalar(issuer, key_id, &scalar)
    }

    /// Builds a profile from a PKCS#8 PEM document, the format of Apple's
    /// `.p8` auth keys.
    pub fn from_pkcs8_pem(
        issuer: impl Into<String>,
        key_id: impl Into<String>,
        pem: &str,
    ) -> Result<Self> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| CredentialError::Key(format!("invalid PKCS#8 key: {e}")))?;
        Ok(Self::from_signing_key(issuer, key_id, signing_key))
    }

    /// Reads a `.p8` key file.
    pub fn from_pem_file(
        issuer: impl Into<String>,
        key_id: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pkcs8_pem(issuer, key_id, &pem)
    }

    fn from_signing_key(
        issuer: impl Into<String>,
        key_id: impl Into<String>,
        signing_key: SigningKey,
    ) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            issuer: issuer.into(),
            key_id: key_id.into(),
            signing_key,
            verifying_key,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Uncompressed SEC1 encoding of the public key.
    pub fn public_key_sec1(&self) -> Vec<u8> {
        self.verifying_key.to_encoded_point(false).as_bytes().to_vec()
    }
}

impl fmt::Debug for CredentialProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProfile")
            .field("issuer", &self.issuer)
            .field("key_id", &self.key_id)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}
