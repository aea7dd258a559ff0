/// Nova Push Gateway
///
/// Routes notifications to the provider that serves a device's platform:
/// APNs for iOS, FCM for Android and Web.
pub mod config;
pub mod error;
pub mod platform;
pub mod provider;
pub mod router;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use platform::Platform;
pub use provider::{ApnsPush, Delivery, DynPushProvider, FcmPush, PushProvider};
pub use router::PushRouter;
