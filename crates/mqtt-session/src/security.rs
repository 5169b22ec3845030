//! Transport security resolution: turns the caller's TLS inputs into a
//! [`TlsPolicy`] and the policy into a rustls client configuration.

use crate::error::SessionError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// How the client authenticates the broker during the TLS handshake.
#[derive(Clone)]
pub enum TlsPolicy {
    /// The broker certificate must chain to one of these anchors. Nothing else
    /// (in particular no system root) is trusted.
    Verified { roots: Arc<RootCertStore> },

    /// Encrypt, but accept any broker certificate and present no client
    /// certificate.
    ///
    /// This is what an encrypted session gets when no CA bundle is supplied.
    /// It protects against passive eavesdropping only: anyone able to
    /// intercept the connection can impersonate the broker. Use it against
    /// test brokers with throwaway certificates, never in production. Whether
    /// the absence of a CA bundle should silently select this mode (rather than
    /// requiring an explicit opt-in) is a security posture decision hosts may
    /// want to revisit.
    InsecureSkipVerify,
}

impl TlsPolicy {
    pub fn verifies_peer(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }

    pub fn trust_anchors(&self) -> Option<&RootCertStore> {
        match self {
            Self::Verified { roots } => Some(roots),
            Self::InsecureSkipVerify => None,
        }
    }

    /// Builds the rustls client configuration for this policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the crypto provider rejects the default protocol
    /// versions.
    pub fn client_config(&self) -> crate::Result<Arc<ClientConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| {
                crate::MqttError::Configuration(format!("Failed to set protocol versions: {e}"))
            })?;

        let config = match self {
            Self::Verified { roots } => builder
                .with_root_certificates(Arc::clone(roots))
                .with_no_client_auth(),
            Self::InsecureSkipVerify => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoServerVerification::new(&provider)))
                .with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }
}

impl fmt::Debug for TlsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified { roots } => f
                .debug_struct("Verified")
                .field("trust_anchors", &roots.len())
                .finish(),
            Self::InsecureSkipVerify => f.write_str("InsecureSkipVerify"),
        }
    }
}

/// Derives the TLS policy for one connection attempt.
///
/// Returns `Ok(None)` when encryption is disabled. A CA bundle that cannot be
/// read, or that yields no usable certificate, is a configuration error; it
/// never degrades to [`TlsPolicy::InsecureSkipVerify`].
///
/// # Errors
///
/// Returns [`SessionError::Configuration`] for an unreadable or empty bundle.
pub fn resolve_tls_policy(
    tls_enabled: bool,
    ca_path: Option<&Path>,
) -> Result<Option<TlsPolicy>, SessionError> {
    if !tls_enabled {
        return Ok(None);
    }

    let Some(path) = ca_path else {
        warn!("TLS enabled without a CA bundle: broker certificates will NOT be verified");
        return Ok(Some(TlsPolicy::InsecureSkipVerify));
    };

    let pem = std::fs::read(path).map_err(|e| {
        SessionError::Configuration(format!(
            "failed to read CA bundle {}: {e}",
            path.display()
        ))
    })?;

    let roots = parse_trust_anchors(&pem).ok_or_else(|| {
        SessionError::Configuration(format!(
            "no valid PEM certificate found in CA bundle {}",
            path.display()
        ))
    })?;

    debug!(path = %path.display(), trust_anchors = roots.len(), "Loaded CA bundle");
    Ok(Some(TlsPolicy::Verified {
        roots: Arc::new(roots),
    }))
}

/// Collects every certificate block that parses as a trust anchor. Malformed
/// blocks are skipped; `None` means nothing usable was found.
fn parse_trust_anchors(pem: &[u8]) -> Option<RootCertStore> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(pem)
        .filter_map(|cert| match cert {
            Ok(cert) => Some(cert),
            Err(e) => {
                debug!(error = ?e, "Skipping unparseable PEM section");
                None
            }
        })
        .collect();

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if ignored > 0 {
        debug!(added, ignored, "Ignored certificates that are not valid trust anchors");
    }

    (added > 0).then_some(roots)
}

#[derive(Debug)]
struct NoServerVerification {
    supported_algs: WebPkiSupportedAlgorithms,
}

impl NoServerVerification {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            supported_algs: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for NoServerVerification {
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
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}
