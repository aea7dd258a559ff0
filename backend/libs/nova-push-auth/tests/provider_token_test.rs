use std::io::Write;
use std::sync::{Arc, Barrier};
use std::thread;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use nova_push_auth::{Claims, Clock, CredentialProfile, ManualClock, TokenManager};
use p256::ecdsa::SigningKey;
use p256::pkcs8::{EncodePrivateKey, LineEnding};

const SCALAR: [u8; 32] = [0x5a; 32];

fn decoding_key(profile: &CredentialProfile) -> DecodingKey {
    let point = profile.verifying_key().to_encoded_point(false);
    let x = URL_SAFE_NO_PAD.encode(point.x().unwrap());
    let y = URL_SAFE_NO_PAD.encode(point.y().unwrap());
    DecodingKey::from_ec_components(&x, &y).unwrap()
}

#[test]
fn provider_token_is_a_standard_es256_jwt() {
    let profile = CredentialProfile::from_raw_scalar("TEAM123456", "ABC123DEFG", &SCALAR).unwrap();
    let manager = TokenManager::new(profile.clone());
    let token = manager.token().unwrap();

    let header = jsonwebtoken::decode_header(token.as_str()).unwrap();
    assert_eq!(header.alg, Algorithm::ES256);
    assert_eq!(header.kid.as_deref(), Some("ABC123DEFG"));

    let mut validation = Validation::new(Algorithm::ES256);
    validation.set_issuer(&["TEAM123456"]);
    let decoded =
        jsonwebtoken::decode::<Claims>(token.as_str(), &decoding_key(&profile), &validation)
            .unwrap();
    assert_eq!(decoded.claims.iss, "TEAM123456");
    assert_eq!(decoded.claims.exp - decoded.claims.iat, 3500);
}

#[test]
fn repeated_requests_share_one_token_until_expiry() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let profile = CredentialProfile::from_raw_scalar("TEAM123456", "ABC123DEFG", &SCALAR).unwrap();
    let manager = TokenManager::new(profile).with_clock(clock.clone());

    let first = manager.token().unwrap();
    for _ in 0..10 {
        assert_eq!(manager.token().unwrap(), first);
    }
    assert_eq!(manager.regenerations(), 1);

    clock.advance(Duration::seconds(3600));
    let refreshed = manager.token().unwrap();
    assert_ne!(refreshed, first);
    assert_eq!(manager.token().unwrap(), refreshed);
    assert_eq!(manager.regenerations(), 2);
}

#[test]
fn concurrent_callers_after_expiry_trigger_one_regeneration() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let profile = CredentialProfile::from_raw_scalar("TEAM123456", "ABC123DEFG", &SCALAR).unwrap();
    let manager = Arc::new(TokenManager::new(profile).with_clock(clock.clone()));

    manager.token().unwrap();
    clock.advance(Duration::hours(2));

    let callers = 32;
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                manager.token().unwrap()
            })
        })
        .collect();
    let tokens: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(manager.regenerations(), 2);
    assert!(tokens.iter().all(|t| t == &tokens[0]));
    assert!(!tokens[0].is_expired_at(clock.now()));
}

#[test]
fn profile_loads_from_p8_file() {
    let key = SigningKey::from_slice(&SCALAR).unwrap();
    let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(pem.as_bytes()).unwrap();

    let from_file = CredentialProfile::from_pem_file("TEAM123456", "ABC123DEFG", file.path()).unwrap();
    let from_scalar = CredentialProfile::from_raw_scalar("TEAM123456", "ABC123DEFG", &SCALAR).unwrap();
    assert_eq!(from_file.public_key_sec1(), from_scalar.public_key_sec1());
}
