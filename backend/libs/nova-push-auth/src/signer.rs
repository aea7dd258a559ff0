//! ES256 compact JWS signing and verification.
//!
//! The signature segment is the raw `r || s` encoding (64 bytes) required by
//! JWS. [`verify`] takes a DER signature over an arbitrary message.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, Result};
use crate::profile::CredentialProfile;

pub const ALGORITHM: &str = "ES256";

/// Provider token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer (team id)
    pub iss: String,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwsHeader {
    alg: String,
    kid: String,
}

/// Signs `claims` with the profile's key, producing
/// `b64url(header).b64url(claims).b64url(signature)`.
pub fn sign_token(claims: &Claims, profile: &CredentialProfile) -> Result<String> {
    sign_with_key(claims, profile.key_id(), profile.signing_key())
}

pub fn sign_with_key(claims: &Claims, key_id: &str, key: &SigningKey) -> Result<String> {
    let header = JwsHeader {
        alg: ALGORITHM.to_string(),
        kid: key_id.to_string(),
    };
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?)
    );

    let signature: Signature = key
        .try_sign(signing_input.as_bytes())
        .map_err(|e| CredentialError::Signing(e.to_string()))?;

    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

/// Checks a DER-encoded ECDSA P-256/SHA-256 signature over `payload`
/// against an SEC1-encoded public key. Malformed inputs verify as `false`.
pub fn verify(signature_der: &[u8], payload: &[u8], public_key_sec1: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_sec1_bytes(public_key_sec1) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(signature_der) else {
        return false;
    };
    key.verify(payload, &signature).is_ok()
}

/// Verifies a compact ES256 token and returns its claims.
///
/// Expiry is not checked here.
pub fn verify_token(token: &str, public_key: &VerifyingKey) -> Result<Claims> {
    let mut segments = token.split('.');
    let (Some(header), Some(claims), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(CredentialError::Encoding(
            "token must have three segments".to_string(),
        ));
    };

    let decode = |segment: &str| {
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| CredentialError::Encoding(e.to_string()))
    };

    let parsed: JwsHeader = serde_json::from_slice(&decode(header)?)?;
    if parsed.alg != ALGORITHM {
        return Err(CredentialError::Encoding(format!(
            "unexpected algorithm {}",
            parsed.alg
        )));
    }

    let signature = Signature::from_slice(&decode(signature)?)
        .map_err(|e| CredentialError::Encoding(e.to_string()))?;
    let signing_input = &token[..header.len() + 1 + claims.len()];
    public_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|e| CredentialError::Signing(e.to_string()))?;

    Ok(serde_json::from_slice(&decode(claims)?)?)
}
