//! Provider credentials for Nova push delivery
//!
//! ES256 signing of APNs provider tokens and a cache that keeps one token
//! alive for most of its lifetime.

pub mod error;
pub mod profile;
pub mod signer;
pub mod token;

pub use error::{CredentialError, Result};
pub use profile::CredentialProfile;
pub use signer::{sign_token, verify, verify_token, Claims, ALGORITHM};
pub use token::{Clock, ManualClock, SystemClock, Token, TokenManager, TokenPolicy};
