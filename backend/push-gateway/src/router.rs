use std::sync::Arc;

use nova_apns_shared::ApnsClient;
use nova_fcm_shared::FCMClient;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::platform::Platform;
use crate::provider::{ApnsPush, Delivery, DynPushProvider, FcmPush};

/// Picks the provider for a device's platform. iOS goes through APNs,
/// Android and Web go through FCM.
#[derive(Clone, Default)]
pub struct PushRouter {
    apns: Option<DynPushProvider>,
    fcm: Option<DynPushProvider>,
}

impl PushRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the providers that have configuration.
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self> {
        let mut router = Self::new();
        if let Some(apns) = &cfg.apns {
            router = router.with_apns(Arc::new(ApnsPush::new(ApnsClient::new(apns)?)));
        }
        if let Some(fcm) = &cfg.fcm {
            router = router.with_fcm(Arc::new(FcmPush::new(FCMClient::from_config(fcm)?)));
        }
        Ok(router)
    }

    pub fn with_apns(mut self, provider: DynPushProvider) -> Self {
        self.apns = Some(provider);
        self
    }

    pub fn with_fcm(mut self, provider: DynPushProvider) -> Self {
        self.fcm = Some(provider);
        self
    }

    pub fn provider(&self, platform: Platform) -> Result<&DynPushProvider> {
        let provider = match platform {
            Platform::Ios => self.apns.as_ref(),
            Platform::Android | Platform::Web => self.fcm.as_ref(),
        };
        provider.ok_or(GatewayError::ProviderUnavailable(platform))
    }

    pub async fn send(
        &self,
        platform: Platform,
        device_token: &str,
        title: &str,
        body: &str,
        badge: Option<u32>,
    ) -> Result<Delivery> {
        let provider = self.provider(platform)?;
        debug!(platform = %platform, provider = provider.name(), "routing notification");
        provider
            .send(
                device_token.to_string(),
                title.to_string(),
                body.to_string(),
                badge,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PushProvider;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        sent: Mutex<Vec<(String, Option<u32>)>>,
    }

    impl Recorder {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl PushProvider for Recorder {
        async fn send(
            &self,
            device_token: String,
            _title: String,
            _body: String,
            badge: Option<u32>,
        ) -> std::result::Result<Delivery, GatewayError> {
            self.sent.lock().unwrap().push((device_token, badge));
            Ok(Delivery::Sent {
                id: format!("{}-1", self.name),
            })
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    #[tokio::test]
    async fn test_routes_by_platform() {
        let apns = Recorder::new("apns");
        let fcm = Recorder::new("fcm");
        let router = PushRouter::new()
            .with_apns(apns.clone())
            .with_fcm(fcm.clone());

        let ios = router
            .send(Platform::Ios, "ios-token", "Hi", "There", Some(3))
            .await
            .unwrap();
        assert_eq!(ios, Delivery::Sent { id: "apns-1".into() });

        router
            .send(Platform::Android, "android-token", "Hi", "There", None)
            .await
            .unwrap();
        router
            .send(Platform::Web, "web-token", "Hi", "There", None)
            .await
            .unwrap();

        assert_eq!(
            *apns.sent.lock().unwrap(),
            vec![("ios-token".to_string(), Some(3))]
        );
        assert_eq!(fcm.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let router = PushRouter::new().with_fcm(Recorder::new("fcm"));
        let err = router
            .send(Platform::Ios, "ios-token", "Hi", "There", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::ProviderUnavailable(Platform::Ios)
        ));
    }
}
