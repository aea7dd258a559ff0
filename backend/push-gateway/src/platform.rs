use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::GatewayError;

/// Device platform, as stored with a device registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        }
    }
}

impl FromStr for Platform {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" | "apns" => Ok(Platform::Ios),
            "android" | "fcm" => Ok(Platform::Android),
            "web" => Ok(Platform::Web),
            other => Err(GatewayError::UnknownPlatform(other.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_platform() {
        assert_eq!("iOS".parse::<Platform>().unwrap(), Platform::Ios);
        assert_eq!("android".parse::<Platform>().unwrap(), Platform::Android);
        assert_eq!("web".parse::<Platform>().unwrap(), Platform::Web);
        assert!(matches!(
            "blackberry".parse::<Platform>(),
            Err(GatewayError::UnknownPlatform(_))
        ));
    }
}
