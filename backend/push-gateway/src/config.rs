use std::env;

use nova_apns_shared::ApnsConfig;
use nova_fcm_shared::FcmConfig;
use tracing::info;

use crate::error::Result;

/// Provider configuration for the gateway.
///
/// A provider is configured only when its credentials are present in the
/// environment: `APNS_TEAM_ID` for APNs, `FCM_SERVICE_ACCOUNT_PATH` or
/// `FCM_SERVER_KEY` for FCM.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub apns: Option<ApnsConfig>,
    pub fcm: Option<FcmConfig>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let apns = if is_set("APNS_TEAM_ID") {
            let cfg = ApnsConfig::from_env()?;
            cfg.validate()?;
            Some(cfg)
        } else {
            None
        };

        let fcm = if is_set("FCM_SERVICE_ACCOUNT_PATH") || is_set("FCM_SERVER_KEY") {
            Some(FcmConfig::from_env()?)
        } else {
            None
        };

        info!(
            apns = apns.is_some(),
            fcm = fcm.is_some(),
            "loaded push gateway configuration"
        );
        Ok(Self { apns, fcm })
    }
}

fn is_set(name: &str) -> bool {
    env::var(name).map(|v| !v.is_empty()).unwrap_or(false)
}
