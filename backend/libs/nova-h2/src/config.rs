use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::frame::{DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_LIMIT, MAX_WINDOW_SIZE};
use crate::hpack::DEFAULT_TABLE_SIZE;

pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn is_tls(self) -> bool {
        matches!(self, Scheme::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server certificate policy for TLS connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificateVerification {
    /// Validate the chain against the platform roots plus any extra roots
    #[default]
    Verify,
    /// Accept any certificate. Only for local test servers.
    Insecure,
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub verification: CertificateVerification,
    /// PEM files with additional trusted root certificates
    pub extra_root_certificates: Vec<PathBuf>,
    /// Per-stream receive window advertised to the server
    pub initial_window_size: u32,
    /// Largest frame payload accepted from the server
    pub max_frame_size: u32,
    /// Dynamic table size the HPACK decoder allows
    pub header_table_size: u32,
    /// Largest response header list accepted, counted as in
    /// SETTINGS_MAX_HEADER_LIST_SIZE
    pub max_header_list_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            verification: CertificateVerification::Verify,
            extra_root_certificates: Vec::new(),
            initial_window_size: 1 << 20,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            header_table_size: DEFAULT_TABLE_SIZE as u32,
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_verification(mut self, verification: CertificateVerification) -> Self {
        self.verification = verification;
        self
    }

    pub fn with_root_certificate(mut self, pem_path: impl Into<PathBuf>) -> Self {
        self.extra_root_certificates.push(pem_path.into());
        self
    }

    pub fn with_initial_window_size(mut self, size: u32) -> Self {
        self.initial_window_size = size.min(MAX_WINDOW_SIZE);
        self
    }

    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size.clamp(DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_LIMIT);
        self
    }

    pub fn with_max_header_list_size(mut self, size: u32) -> Self {
        self.max_header_list_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_secure() {
        let config = ClientConfig::default();
        assert_eq!(config.verification, CertificateVerification::Verify);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn frame_size_is_clamped_to_protocol_range() {
        assert_eq!(ClientConfig::default().with_max_frame_size(1).max_frame_size, 16_384);
        assert_eq!(
            ClientConfig::default().with_max_frame_size(u32::MAX).max_frame_size,
            16_777_215
        );
    }
}
