//! Notification payloads.
//!
//! [`ApnsPayload`] builds the `aps` dictionary plus any custom top-level
//! keys. Callers with a prebuilt JSON document use [`ApnsBody::Raw`].

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ApnsError;

/// APNs rejects payloads above 4 KB (5 KB for VoIP).
pub const MAX_PAYLOAD_SIZE: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Alert {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_image: Option<String>,
}

impl Alert {
    fn is_empty(&self) -> bool {
        *self == Alert::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
struct Aps {
    #[serde(skip_serializing_if = "Alert::is_empty")]
    alert: Alert,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_available: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mutable_content: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
}

/// Builder for the standard APNs JSON document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApnsPayload {
    aps: Aps,
    custom: Map<String, Value>,
}

impl ApnsPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.aps.alert.title = Some(title.into());
        self
    }

    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.aps.alert.subtitle = Some(subtitle.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.aps.alert.body = Some(body.into());
        self
    }

    /// Localized title: a key in the app's strings file and its arguments.
    pub fn title_loc(mut self, key: impl Into<String>, args: Vec<String>) -> Self {
        self.aps.alert.title_loc_key = Some(key.into());
        self.aps.alert.title_loc_args = (!args.is_empty()).then_some(args);
        self
    }

    /// Localized body.
    pub fn body_loc(mut self, key: impl Into<String>, args: Vec<String>) -> Self {
        self.aps.alert.loc_key = Some(key.into());
        self.aps.alert.loc_args = (!args.is_empty()).then_some(args);
        self
    }

    pub fn action_loc_key(mut self, key: impl Into<String>) -> Self {
        self.aps.alert.action_loc_key = Some(key.into());
        self
    }

    pub fn launch_image(mut self, image: impl Into<String>) -> Self {
        self.aps.alert.launch_image = Some(image.into());
        self
    }

    pub fn badge(mut self, badge: u32) -> Self {
        self.aps.badge = Some(badge);
        self
    }

    pub fn sound(mut self, sound: impl Into<String>) -> Self {
        self.aps.sound = Some(sound.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.aps.category = Some(category.into());
        self
    }

    /// Marks a background update.
    pub fn content_available(mut self) -> Self {
        self.aps.content_available = Some(1);
        self
    }

    /// Lets a notification service extension modify the content.
    pub fn mutable_content(mut self) -> Self {
        self.aps.mutable_content = Some(1);
        self
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.aps.thread_id = Some(thread_id.into());
        self
    }

    /// Adds a top-level key next to `aps`. A key named `aps` is ignored.
    pub fn custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "aps" {
            self.custom.insert(key, value.into());
        }
        self
    }

    pub fn to_value(&self) -> Result<Value, ApnsError> {
        let mut document = Map::with_capacity(self.custom.len() + 1);
        document.insert("aps".to_string(), serde_json::to_value(&self.aps)?);
        for (key, value) in &self.custom {
            document.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(document))
    }
}

/// Request body of a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ApnsBody {
    Payload(ApnsPayload),
    /// Sent verbatim
    Raw(String),
}

impl ApnsBody {
    pub fn encode(&self) -> Result<String, ApnsError> {
        let encoded = match self {
            ApnsBody::Payload(payload) => serde_json::to_string(&payload.to_value()?)?,
            ApnsBody::Raw(raw) => raw.clone(),
        };
        if encoded.len() > MAX_PAYLOAD_SIZE {
            return Err(ApnsError::Payload(format!(
                "payload is {} bytes, limit is {MAX_PAYLOAD_SIZE}",
                encoded.len()
            )));
        }
        Ok(encoded)
    }
}

impl From<ApnsPayload> for ApnsBody {
    fn from(payload: ApnsPayload) -> Self {
        ApnsBody::Payload(payload)
    }
}

impl From<String> for ApnsBody {
    fn from(raw: String) -> Self {
        ApnsBody::Raw(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alert_payload() {
        let payload = ApnsPayload::new()
            .title("New follower")
            .body("alice followed you")
            .badge(3)
            .sound("default");

        assert_eq!(
            payload.to_value().unwrap(),
            json!({
                "aps": {
                    "alert": {"title": "New follower", "body": "alice followed you"},
                    "badge": 3,
                    "sound": "default"
                }
            })
        );
    }

    #[test]
    fn test_background_payload_omits_alert() {
        let payload = ApnsPayload::new()
            .content_available()
            .custom("post_id", "p-42");

        assert_eq!(
            payload.to_value().unwrap(),
            json!({"aps": {"content-available": 1}, "post_id": "p-42"})
        );
    }

    #[test]
    fn test_localized_keys_use_apns_names() {
        let value = ApnsPayload::new()
            .title_loc("FOLLOW_TITLE", vec![])
            .body_loc("FOLLOW_BODY", vec!["alice".to_string()])
            .mutable_content()
            .thread_id("follows")
            .to_value()
            .unwrap();

        let aps = &value["aps"];
        assert_eq!(aps["alert"]["title-loc-key"], "FOLLOW_TITLE");
        assert!(aps["alert"].get("title-loc-args").is_none());
        assert_eq!(aps["alert"]["loc-args"], json!(["alice"]));
        assert_eq!(aps["mutable-content"], 1);
        assert_eq!(aps["thread-id"], "follows");
    }

    #[test]
    fn test_custom_cannot_replace_aps() {
        let value = ApnsPayload::new()
            .badge(1)
            .custom("aps", json!({"badge": 99}))
            .to_value()
            .unwrap();
        assert_eq!(value["aps"]["badge"], 1);
    }

    #[test]
    fn test_raw_body_and_size_limit() {
        let raw = ApnsBody::Raw(r#"{"aps":{"alert":"hi"}}"#.to_string());
        assert_eq!(raw.encode().unwrap(), r#"{"aps":{"alert":"hi"}}"#);

        let huge = ApnsBody::Raw("x".repeat(MAX_PAYLOAD_SIZE + 1));
        assert!(matches!(huge.encode(), Err(ApnsError::Payload(_))));
    }
}
