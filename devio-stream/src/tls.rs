//! TLS client setup for the secure TCP-family schemes.
//!
//! TLS 1.2/1.3 only. When a trust anchor (file or directory of PEM
//! certificates) is configured, peer certificates and host names are
//! verified; without one, verification is disabled and a warning is logged
//! once at stream start.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

/// TLS context for one stream: the client config plus whether peer
/// verification is actually enforced.
#[derive(Clone)]
pub(crate) struct TlsContext {
    pub config: Arc<ClientConfig>,
    pub verify_peer: bool,
}

/// Build the client TLS configuration from an optional trust anchor path.
///
/// Fails when the path is set but unusable, so a bad configuration surfaces
/// at `start()` rather than on the first connect attempt.
pub(crate) fn build(trust_anchor: Option<&Path>) -> Result<TlsContext, String> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    match trust_anchor {
        Some(path) => {
            let mut roots = RootCertStore::empty();
            let mut loaded = 0usize;
            if path.is_file() {
                loaded += load_pem_file(path, &mut roots)?;
            } else if path.is_dir() {
                let entries = std::fs::read_dir(path).map_err(|e| format!("{}: {e}", path.display()))?;
                for entry in entries.flatten() {
                    let entry_path = entry.path();
                    if entry_path.is_file() {
                        loaded += load_pem_file(&entry_path, &mut roots).unwrap_or(0);
                    }
                }
            } else {
                return Err(format!("bad trust anchor path {}", path.display()));
            }
            if loaded == 0 {
                return Err(format!("no certificates in {}", path.display()));
            }
            debug!("peer verification enabled ({loaded} trust anchors)");
            let config = ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .map_err(|e| e.to_string())?
                .with_root_certificates(roots)
                .with_no_client_auth();
            Ok(TlsContext {
                config: Arc::new(config),
                verify_peer: true,
            })
        }
        None => {
            warn!("peer verification disabled (no trust anchor configured)");
            let verifier = Arc::new(AcceptAnyServerCert {
                provider: provider.clone(),
            });
            let config = ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .map_err(|e| e.to_string())?
                .dangerous()
                .with_custom_certificate_verifier(verifier)
                .with_no_client_auth();
            Ok(TlsContext {
                config: Arc::new(config),
                verify_peer: false,
            })
        }
    }
}

fn load_pem_file(path: &Path, roots: &mut RootCertStore) -> Result<usize, String> {
    let file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut loaded = 0usize;
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| format!("{}: {e}", path.display()))?;
        if roots.add(cert).is_ok() {
            loaded += 1;
        }
    }
    Ok(loaded)
}

/// Certificate verifier used when no trust anchor is configured: accepts any
/// peer (the operator chose unauthenticated TLS).
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_anchor_builds_permissive_config() {
        let ctx = build(None).unwrap();
        assert!(!ctx.verify_peer);
    }

    #[test]
    fn missing_anchor_path_fails() {
        assert!(build(Some(Path::new("/no/such/trust/anchor"))).is_err());
    }

    #[test]
    fn empty_anchor_file_fails() {
        let path = std::env::temp_dir().join("devio-test-empty-anchor.pem");
        std::fs::write(&path, "").unwrap();
        assert!(build(Some(&path)).is_err());
        std::fs::remove_file(&path).ok();
    }
}
