use std::fmt;

use nova_h2::Response;
use serde::Deserialize;

use crate::error::ApnsError;

macro_rules! reasons {
    ($($variant:ident,)+) => {
        /// Rejection reasons documented by APNs.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ApnsReason {
            $($variant,)+
            /// Reason missing, undecodable, or not in the table
            Unknown,
        }

        impl ApnsReason {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(ApnsReason::$variant => stringify!($variant),)+
                    ApnsReason::Unknown => "Unknown",
                }
            }

            pub fn parse(text: &str) -> Self {
                match text {
                    $(stringify!($variant) => ApnsReason::$variant,)+
                    _ => ApnsReason::Unknown,
                }
            }
        }
    };
}

reasons! {
    BadCollapseId,
    BadDeviceToken,
    BadExpirationDate,
    BadMessageId,
    BadPriority,
    BadTopic,
    DeviceTokenNotForTopic,
    DuplicateHeaders,
    IdleTimeout,
    InvalidPushType,
    MissingDeviceToken,
    MissingTopic,
    PayloadEmpty,
    TopicDisallowed,
    BadCertificate,
    BadCertificateEnvironment,
    ExpiredProviderToken,
    Forbidden,
    InvalidProviderToken,
    MissingProviderToken,
    BadPath,
    MethodNotAllowed,
    ExpiredToken,
    Unregistered,
    PayloadTooLarge,
    TooManyProviderTokenUpdates,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    Shutdown,
}

impl ApnsReason {
    /// Best guess for a failed response that carried no body.
    pub fn from_status(status: u16) -> Self {
        match status {
            403 => ApnsReason::Forbidden,
            404 => ApnsReason::BadPath,
            405 => ApnsReason::MethodNotAllowed,
            410 => ApnsReason::Unregistered,
            413 => ApnsReason::PayloadTooLarge,
            429 => ApnsReason::TooManyRequests,
            500 => ApnsReason::InternalServerError,
            503 => ApnsReason::ServiceUnavailable,
            _ => ApnsReason::Unknown,
        }
    }

    /// The device token will never be valid again.
    pub fn is_permanent_token_failure(self) -> bool {
        matches!(
            self,
            ApnsReason::BadDeviceToken | ApnsReason::Unregistered | ApnsReason::ExpiredToken
        )
    }
}

impl fmt::Display for ApnsReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body of a rejected request.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    reason: String,
    /// Milliseconds since the epoch; only sent with 410
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Outcome of one dispatch.
#[derive(Debug)]
pub enum ApnsResult {
    Success {
        apns_id: String,
        device_token: String,
    },
    Error {
        apns_id: String,
        device_token: String,
        status: u16,
        reason: ApnsReason,
        /// When APNs last saw the token as invalid
        timestamp: Option<i64>,
    },
    NetworkError {
        apns_id: String,
        device_token: String,
        error: ApnsError,
    },
}

impl ApnsResult {
    /// Maps a response: an empty 2xx body is success, any other body is
    /// decoded as a provider error. The result always carries the id the
    /// message was sent with, whatever `apns-id` the server echoes.
    pub fn from_response(apns_id: &str, device_token: &str, response: &Response) -> Self {
        let apns_id = apns_id.to_string();
        let device_token = device_token.to_string();

        if response.body.is_empty() {
            if response.is_success() {
                return ApnsResult::Success {
                    apns_id,
                    device_token,
                };
            }
            return ApnsResult::Error {
                apns_id,
                device_token,
                status: response.status,
                reason: ApnsReason::from_status(response.status),
                timestamp: None,
            };
        }

        let (reason, timestamp) = match serde_json::from_slice::<ErrorBody>(&response.body) {
            Ok(body) => (ApnsReason::parse(&body.reason), body.timestamp),
            Err(_) => (ApnsReason::Unknown, None),
        };
        ApnsResult::Error {
            apns_id,
            device_token,
            status: response.status,
            reason,
            timestamp,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApnsResult::Success { .. })
    }

    pub fn apns_id(&self) -> &str {
        match self {
            ApnsResult::Success { apns_id, .. }
            | ApnsResult::Error { apns_id, .. }
            | ApnsResult::NetworkError { apns_id, .. } => apns_id,
        }
    }

    pub fn device_token(&self) -> &str {
        match self {
            ApnsResult::Success { device_token, .. }
            | ApnsResult::Error { device_token, .. }
            | ApnsResult::NetworkError { device_token, .. } => device_token,
        }
    }

    pub fn reason(&self) -> Option<ApnsReason> {
        match self {
            ApnsResult::Error { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use nova_h2::{Headers, ResponseHead, Version};

    fn response(status: u16, headers: &[(&str, &str)], body: &'static str) -> Response {
        let head = ResponseHead {
            status,
            version: Version::HTTP_2,
            headers: headers.iter().copied().collect::<Headers>(),
        };
        Response::new(head, Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn test_empty_success() {
        let result = ApnsResult::from_response("id-1", "token", &response(200, &[], ""));
        assert!(result.is_success());
        assert_eq!(result.apns_id(), "id-1");
        assert_eq!(result.device_token(), "token");
    }

    #[test]
    fn test_message_id_survives_server_apns_id() {
        let result =
            ApnsResult::from_response("id-1", "token", &response(200, &[("apns-id", "id-2")], ""));
        assert!(result.is_success());
        assert_eq!(result.apns_id(), "id-1");

        let rejected = ApnsResult::from_response(
            "id-1",
            "token",
            &response(400, &[("apns-id", "id-2")], r#"{"reason":"BadTopic"}"#),
        );
        assert_eq!(rejected.apns_id(), "id-1");
    }

    #[test]
    fn test_reason_decoded() {
        let result = ApnsResult::from_response(
            "id-1",
            "token",
            &response(400, &[], r#"{"reason":"BadDeviceToken"}"#),
        );
        assert_eq!(result.reason(), Some(ApnsReason::BadDeviceToken));
        assert!(ApnsReason::BadDeviceToken.is_permanent_token_failure());
    }

    #[test]
    fn test_unregistered_timestamp() {
        let result = ApnsResult::from_response(
            "id-1",
            "token",
            &response(410, &[], r#"{"reason":"Unregistered","timestamp":1700000000000}"#),
        );
        match result {
            ApnsResult::Error {
                status,
                reason,
                timestamp,
                ..
            } => {
                assert_eq!(status, 410);
                assert_eq!(reason, ApnsReason::Unregistered);
                assert_eq!(timestamp, Some(1_700_000_000_000));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_undecodable_body_is_unknown() {
        let garbage = ApnsResult::from_response("i", "t", &response(400, &[], "<html>"));
        assert_eq!(garbage.reason(), Some(ApnsReason::Unknown));

        let unlisted =
            ApnsResult::from_response("i", "t", &response(400, &[], r#"{"reason":"NewThing"}"#));
        assert_eq!(unlisted.reason(), Some(ApnsReason::Unknown));
    }

    #[test]
    fn test_empty_failure_uses_status_table() {
        let result = ApnsResult::from_response("i", "t", &response(503, &[], ""));
        assert_eq!(result.reason(), Some(ApnsReason::ServiceUnavailable));
        let result = ApnsResult::from_response("i", "t", &response(418, &[], ""));
        assert_eq!(result.reason(), Some(ApnsReason::Unknown));
    }

    #[test]
    fn test_reason_names_round_trip() {
        for reason in [
            ApnsReason::ExpiredProviderToken,
            ApnsReason::TooManyProviderTokenUpdates,
            ApnsReason::Shutdown,
        ] {
            assert_eq!(ApnsReason::parse(reason.as_str()), reason);
        }
    }
}
