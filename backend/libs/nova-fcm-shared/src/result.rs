use std::fmt;

use crate::errors::FCMError;
use crate::models::{FcmErrorEnvelope, LegacyResponse};

/// Error codes reported by FCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FcmErrorCode {
    UnspecifiedError,
    InvalidArgument,
    Unregistered,
    SenderIdMismatch,
    QuotaExceeded,
    ApnsAuthError,
    Unavailable,
    Internal,
    ThirdPartyAuthError,
}

impl FcmErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FcmErrorCode::UnspecifiedError => "UNSPECIFIED_ERROR",
            FcmErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            FcmErrorCode::Unregistered => "UNREGISTERED",
            FcmErrorCode::SenderIdMismatch => "SENDER_ID_MISMATCH",
            FcmErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            FcmErrorCode::ApnsAuthError => "APNS_AUTH_ERROR",
            FcmErrorCode::Unavailable => "UNAVAILABLE",
            FcmErrorCode::Internal => "INTERNAL",
            FcmErrorCode::ThirdPartyAuthError => "THIRD_PARTY_AUTH_ERROR",
        }
    }

    /// Unrecognized codes map to `UnspecifiedError`.
    pub fn parse(code: &str) -> Self {
        match code {
            "INVALID_ARGUMENT" => FcmErrorCode::InvalidArgument,
            "UNREGISTERED" => FcmErrorCode::Unregistered,
            "SENDER_ID_MISMATCH" => FcmErrorCode::SenderIdMismatch,
            "QUOTA_EXCEEDED" => FcmErrorCode::QuotaExceeded,
            "APNS_AUTH_ERROR" => FcmErrorCode::ApnsAuthError,
            "UNAVAILABLE" => FcmErrorCode::Unavailable,
            "INTERNAL" => FcmErrorCode::Internal,
            "THIRD_PARTY_AUTH_ERROR" => FcmErrorCode::ThirdPartyAuthError,
            _ => FcmErrorCode::UnspecifiedError,
        }
    }

    /// Maps the legacy API's per-result error strings.
    pub fn from_legacy(error: &str) -> Self {
        match error {
            "InvalidRegistration" | "MissingRegistration" | "InvalidParameters" => {
                FcmErrorCode::InvalidArgument
            }
            "NotRegistered" => FcmErrorCode::Unregistered,
            "MismatchSenderId" => FcmErrorCode::SenderIdMismatch,
            "MessageRateExceeded" | "DeviceMessageRateExceeded" | "TopicsMessageRateExceeded" => {
                FcmErrorCode::QuotaExceeded
            }
            "InvalidApnsCredential" => FcmErrorCode::ApnsAuthError,
            "Unavailable" => FcmErrorCode::Unavailable,
            "InternalServerError" => FcmErrorCode::Internal,
            _ => FcmErrorCode::UnspecifiedError,
        }
    }

    /// Best guess from the HTTP status when the body has no error code.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => FcmErrorCode::InvalidArgument,
            401 => FcmErrorCode::ThirdPartyAuthError,
            403 => FcmErrorCode::SenderIdMismatch,
            404 => FcmErrorCode::Unregistered,
            429 => FcmErrorCode::QuotaExceeded,
            500 => FcmErrorCode::Internal,
            503 => FcmErrorCode::Unavailable,
            _ => FcmErrorCode::UnspecifiedError,
        }
    }
}

impl fmt::Display for FcmErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one send.
#[derive(Debug)]
pub enum FcmResult {
    /// `message_id` is the resource name FCM assigned
    Success { message_id: String },
    Error {
        status: u16,
        code: FcmErrorCode,
        message: Option<String>,
    },
    NetworkError(FCMError),
}

impl FcmResult {
    /// Maps a failed v1 response.
    pub fn from_v1_error(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<FcmErrorEnvelope>(body) {
            Ok(envelope) => {
                let code = envelope
                    .error
                    .details
                    .iter()
                    .find_map(|detail| detail.error_code.as_deref())
                    .map(FcmErrorCode::parse)
                    .unwrap_or_else(|| FcmErrorCode::from_status(status));
                FcmResult::Error {
                    status,
                    code,
                    message: envelope.error.message,
                }
            }
            Err(_) => FcmResult::Error {
                status,
                code: FcmErrorCode::from_status(status),
                message: None,
            },
        }
    }

    /// Maps a legacy response. Only the first result is considered since
    /// every legacy send here has a single recipient.
    pub fn from_legacy(response: LegacyResponse) -> Self {
        let first = response.results.into_iter().next();
        match first {
            Some(result) if result.error.is_none() => FcmResult::Success {
                message_id: result.message_id.unwrap_or_default(),
            },
            Some(result) => {
                let error = result.error.unwrap_or_default();
                FcmResult::Error {
                    status: 200,
                    code: FcmErrorCode::from_legacy(&error),
                    message: Some(error),
                }
            }
            None if response.failure == 0 => FcmResult::Success {
                message_id: response
                    .message_id
                    .or(response.multicast_id)
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            },
            None => FcmResult::Error {
                status: 200,
                code: FcmErrorCode::UnspecifiedError,
                message: None,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FcmResult::Success { .. })
    }

    pub fn code(&self) -> Option<FcmErrorCode> {
        match self {
            FcmResult::Error { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LegacyResult;

    #[test]
    fn test_v1_error_prefers_detail_code() {
        let body = br#"{"error":{"code":404,"message":"gone","status":"NOT_FOUND",
            "details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"UNREGISTERED"}]}}"#;
        let result = FcmResult::from_v1_error(404, body);
        assert_eq!(result.code(), Some(FcmErrorCode::Unregistered));
    }

    #[test]
    fn test_v1_error_falls_back_to_status() {
        let body = br#"{"error":{"code":400,"message":"bad","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(
            FcmResult::from_v1_error(400, body).code(),
            Some(FcmErrorCode::InvalidArgument)
        );
        assert_eq!(
            FcmResult::from_v1_error(503, b"upstream down").code(),
            Some(FcmErrorCode::Unavailable)
        );
    }

    #[test]
    fn test_legacy_results() {
        let ok = LegacyResponse {
            multicast_id: Some(1),
            message_id: None,
            success: 1,
            failure: 0,
            results: vec![LegacyResult {
                message_id: Some("0:123".to_string()),
                error: None,
            }],
        };
        assert!(FcmResult::from_legacy(ok).is_success());

        let failed = LegacyResponse {
            multicast_id: Some(1),
            message_id: None,
            success: 0,
            failure: 1,
            results: vec![LegacyResult {
                message_id: None,
                error: Some("NotRegistered".to_string()),
            }],
        };
        assert_eq!(
            FcmResult::from_legacy(failed).code(),
            Some(FcmErrorCode::Unregistered)
        );
    }

    #[test]
    fn test_code_names() {
        assert_eq!(FcmErrorCode::parse("QUOTA_EXCEEDED"), FcmErrorCode::QuotaExceeded);
        assert_eq!(FcmErrorCode::parse("NEW_CODE"), FcmErrorCode::UnspecifiedError);
        assert_eq!(FcmErrorCode::ApnsAuthError.to_string(), "APNS_AUTH_ERROR");
    }
}
