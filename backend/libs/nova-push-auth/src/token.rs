//! Cached provider tokens.
//!
//! A [`TokenManager`] hands out the same signed token until it is close to
//! expiry, then signs a fresh one. Providers reject tokens regenerated too
//! often, so callers should share one manager per credential.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::profile::CredentialProfile;
use crate::signer::{sign_token, Claims};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Token lifetime and refresh window.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    /// Time between `iat` and `exp`
    pub lifetime: Duration,
    /// How long before `exp` a new token is signed
    pub refresh_margin: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        // APNs accepts tokens for an hour; stay just under it
        Self {
            lifetime: Duration::seconds(3500),
            refresh_margin: Duration::minutes(5),
        }
    }
}

/// A signed token and its validity window.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Token {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

pub struct TokenManager {
    profile: CredentialProfile,
    policy: TokenPolicy,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Token>>,
    regenerations: AtomicU64,
}

impl TokenManager {
    pub fn new(profile: CredentialProfile) -> Self {
        Self {
            profile,
            policy: TokenPolicy::default(),
            clock: Arc::new(SystemClock),
            current: Mutex::new(None),
            regenerations: AtomicU64::new(0),
        }
    }

    pub fn with_policy(mut self, policy: TokenPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the cached token, signing a new one when there is none or the
    /// cached one is inside the refresh margin.
    ///
    /// A signing failure clears the cache and is returned to the caller.
    pub fn token(&self) -> Result<Token> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();

        if let Some(token) = current.as_ref() {
            if now < token.expires_at - self.policy.refresh_margin {
                return Ok(token.clone());
            }
            debug!(
                key_id = %self.profile.key_id(),
                expires_at = %token.expires_at,
                "Provider token due for refresh"
            );
        }

        let issued_at = now;
        let expires_at = issued_at + self.policy.lifetime;
        let claims = Claims {
            iss: self.profile.issuer().to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        match sign_token(&claims, &self.profile) {
            Ok(value) => {
                let token = Token {
                    value,
                    issued_at,
                    expires_at,
                };
                *current = Some(token.clone());
                let count = self.regenerations.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    key_id = %self.profile.key_id(),
                    expires_at = %expires_at,
                    regenerations = count,
                    "Signed new provider token"
                );
                Ok(token)
            }
            Err(e) => {
                *current = None;
                warn!(key_id = %self.profile.key_id(), error = %e, "Failed to sign provider token");
                Err(e)
            }
        }
    }

    /// Drops the cached token so the next call signs a new one.
    pub fn invalidate(&self) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.take().is_some() {
            info!(key_id = %self.profile.key_id(), "Provider token invalidated");
        }
    }

    /// Number of tokens signed so far.
    pub fn regenerations(&self) -> u64 {
        self.regenerations.load(Ordering::Relaxed)
    }

    pub fn profile(&self) -> &CredentialProfile {
        &self.profile
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("profile", &self.profile)
            .field("policy", &self.policy)
            .field("regenerations", &self.regenerations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manager() -> (TokenManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let profile = CredentialProfile::from_raw_scalar("TEAM1", "KEY1", &[0x22; 32]).unwrap();
        let manager = TokenManager::new(profile).with_clock(clock.clone());
        (manager, clock)
    }

    #[test]
    fn token_is_cached_while_valid() {
        let (manager, clock) = manager();
        let first = manager.token().unwrap();
        clock.advance(Duration::minutes(30));
        let second = manager.token().unwrap();

        assert_eq!(first, second);
        assert_eq!(manager.regenerations(), 1);
    }

    #[test]
    fn token_is_refreshed_inside_margin() {
        let (manager, clock) = manager();
        let first = manager.token().unwrap();
        assert_eq!(first.expires_at() - first.issued_at(), Duration::seconds(3500));

        clock.advance(Duration::seconds(3500) - Duration::minutes(5));
        let second = manager.token().unwrap();
        let third = manager.token().unwrap();

        assert_ne!(first, second);
        assert_eq!(second, third);
        assert_eq!(manager.regenerations(), 2);
    }

    #[test]
    fn expired_token_regenerates_once() {
        let (manager, clock) = manager();
        manager.token().unwrap();
        clock.advance(Duration::hours(2));

        for _ in 0..5 {
            let token = manager.token().unwrap();
            assert!(!token.is_expired_at(clock.now()));
        }
        assert_eq!(manager.regenerations(), 2);
    }

    #[test]
    fn invalidate_forces_new_token() {
        let (manager, clock) = manager();
        let first = manager.token().unwrap();
        manager.invalidate();
        clock.advance(Duration::seconds(1));
        let second = manager.token().unwrap();

        assert_ne!(first, second);
        assert_eq!(manager.regenerations(), 2);
    }

    #[test]
    fn claims_carry_issuer_and_window() {
        let (manager, _clock) = manager();
        let token = manager.token().unwrap();
        let claims =
            crate::signer::verify_token(token.as_str(), manager.profile().verifying_key()).unwrap();

        assert_eq!(claims.iss, "TEAM1");
        assert_eq!(claims.iat, token.issued_at().timestamp());
        assert_eq!(claims.exp, claims.iat + 3500);
    }

    #[test]
    fn debug_does_not_leak_token() {
        let (manager, _clock) = manager();
        let token = manager.token().unwrap();
        assert!(!format!("{token:?}").contains(token.as_str()));
    }
}
