//! rustls client configuration with ALPN `h2`.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::{CertificateVerification, ClientConfig};
use crate::error::ConnectError;

pub const ALPN_H2: &[u8] = b"h2";

/// Accepts every server certificate while still checking handshake
/// signatures.
#[derive(Debug)]
struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

fn load_pem_roots(config: &ClientConfig, roots: &mut RootCertStore) -> Result<(), ConnectError> {
    for path in &config.extra_root_certificates {
        let mut reader = BufReader::new(File::open(path)?);
        let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
        let (added, ignored) = roots.add_parsable_certificates(certs);
        debug!(path = %path.display(), added, ignored, "Loaded extra root certificates");
    }
    Ok(())
}

fn root_store(config: &ClientConfig) -> Result<RootCertStore, ConnectError> {
    let mut roots = RootCertStore::empty();

    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, ignored) = roots.add_parsable_certificates(certs);
            debug!(added, ignored, "Loaded platform root certificates");
        }
        Err(e) => warn!(error = %e, "Could not load platform root certificates"),
    }
    load_pem_roots(config, &mut roots)?;

    if roots.is_empty() {
        return Err(ConnectError::Tls("no trusted root certificates".to_string()));
    }
    Ok(roots)
}

/// Builds a connector for `config`, negotiating `h2` via ALPN.
pub fn connector(config: &ClientConfig) -> Result<TlsConnector, ConnectError> {
    let provider = Arc::new(ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let mut tls = match config.verification {
        CertificateVerification::Verify => builder
            .with_root_certificates(root_store(config)?)
            .with_no_client_auth(),
        CertificateVerification::Insecure => {
            warn!("TLS certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate {
                    algorithms: provider.signature_verification_algorithms,
                }))
                .with_no_client_auth()
        }
    };
    tls.alpn_protocols = vec![ALPN_H2.to_vec()];

    Ok(TlsConnector::from(Arc::new(tls)))
}
