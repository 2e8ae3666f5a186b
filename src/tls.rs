// ABOUTME: TLS support for RELP transports built on tokio-rustls
// ABOUTME: Builds client/server configs per auth mode and runs the post-handshake peer checks

use crate::auth::{PeerIdentity, PermittedPeers, sha1_fingerprint};
use crate::config::{AuthMode, TlsSettings};
use crate::engine::EventSink;
use crate::error::{ErrorCode, RelpError, RelpResult};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::sync::{Arc, Once};
use tokio_rustls::rustls::client::WebPkiServerVerifier;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{
    CryptoProvider, WebPkiSupportedAlgorithms, aws_lc_rs, verify_tls12_signature,
    verify_tls13_signature,
};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use tokio_rustls::rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, DistinguishedName,
    Error as TlsLibError, RootCertStore, ServerConfig, SignatureScheme,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};

static TLS_INIT: Once = Once::new();

/// One-time, process-wide TLS library initialization. Shared among all
/// engines in the process and never torn down.
fn init_tls() -> Arc<CryptoProvider> {
    TLS_INIT.call_once(|| {
        let _ = aws_lc_rs::default_provider().install_default();
    });
    Arc::new(aws_lc_rs::default_provider())
}

fn setup_err(context: &str, e: impl std::fmt::Display) -> RelpError {
    RelpError::TlsSetup(format!("{context}: {e}"))
}

fn load_certs(path: &std::path::Path) -> RelpResult<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_file_iter(path)
        .map_err(|e| setup_err("reading certificate file", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| setup_err("parsing certificate file", e))
}

fn load_key(path: &std::path::Path) -> RelpResult<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| setup_err("reading private key", e))
}

fn load_roots(tls: &TlsSettings) -> RelpResult<RootCertStore> {
    let path = tls.ca_cert_file.as_ref().ok_or_else(|| {
        RelpError::TlsSetup("name auth mode requires a CA certificate file".into())
    })?;
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| setup_err("adding CA certificate", e))?;
    }
    Ok(roots)
}

fn warn_inert_knobs(tls: &TlsSettings) {
    if tls.compress {
        tracing::warn!("TLS compression requested; the rustls backend does not negotiate it");
    }
    if tls.dh_bits.is_some() {
        tracing::warn!("dh_bits configured; the rustls backend manages its own key exchange");
    }
    if let Some(prio) = &tls.priority {
        tracing::warn!(priority = %prio, "TLS priority string is not interpreted by rustls");
    }
}

/// Accepts any server certificate at handshake time. Used for the anonymous
/// and fingerprint auth modes, where the peer check happens after the
/// handshake against the permitted-peers list.
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsLibError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsLibError> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsLibError> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Chain-validating verifier for name auth mode. Delegates to webpki for the
/// chain but ignores its hostname check: RELP matches peer names against the
/// configured permitted-peers patterns, not against the dialed address.
#[derive(Debug)]
struct ChainOnlyServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for ChainOnlyServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsLibError> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(TlsLibError::InvalidCertificate(CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            Err(TlsLibError::InvalidCertificate(CertificateError::NotValidForNameContext {
                ..
            })) => Ok(ServerCertVerified::assertion()),
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsLibError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsLibError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Demands a client certificate but defers its evaluation to the
/// post-handshake fingerprint check.
#[derive(Debug)]
struct RequireAnyClientCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ClientCertVerifier for RequireAnyClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, TlsLibError> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsLibError> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsLibError> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Build the connector for a client session.
pub(crate) fn build_connector(tls: &TlsSettings) -> RelpResult<TlsConnector> {
    let provider = init_tls();
    warn_inert_knobs(tls);

    let verifier: Arc<dyn ServerCertVerifier> = match tls.auth_mode {
        AuthMode::None | AuthMode::Fingerprint => Arc::new(AcceptAnyServerCert {
            algorithms: provider.signature_verification_algorithms,
        }),
        AuthMode::Name => {
            let roots = load_roots(tls)?;
            let inner =
                WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                    .build()
                    .map_err(|e| setup_err("building server verifier", e))?;
            Arc::new(ChainOnlyServerVerifier { inner })
        }
    };

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| setup_err("selecting protocol versions", e))?
        .dangerous()
        .with_custom_certificate_verifier(verifier);

    let config = match (&tls.own_cert_file, &tls.priv_key_file) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|e| setup_err("loading client credentials", e))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(RelpError::TlsSetup(
                "own certificate and private key must be configured together".into(),
            ));
        }
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Build the acceptor for a server listener.
pub(crate) fn build_acceptor(tls: &TlsSettings) -> RelpResult<TlsAcceptor> {
    let provider = init_tls();
    warn_inert_knobs(tls);

    let certs = tls
        .own_cert_file
        .as_ref()
        .ok_or_else(|| RelpError::TlsSetup("TLS listener requires a certificate file".into()))
        .and_then(|p| load_certs(p))?;
    let key = tls
        .priv_key_file
        .as_ref()
        .ok_or_else(|| RelpError::TlsSetup("TLS listener requires a private key file".into()))
        .and_then(|p| load_key(p))?;

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| setup_err("selecting protocol versions", e))?;

    let builder = match tls.auth_mode {
        AuthMode::None => builder.with_no_client_auth(),
        AuthMode::Fingerprint => builder.with_client_cert_verifier(Arc::new(RequireAnyClientCert {
            algorithms: provider.signature_verification_algorithms,
        })),
        AuthMode::Name => {
            let roots = load_roots(tls)?;
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                    .build()
                    .map_err(|e| setup_err("building client verifier", e))?;
            builder.with_client_cert_verifier(verifier)
        }
    };

    let config = builder
        .with_single_cert(certs, key)
        .map_err(|e| setup_err("loading server credentials", e))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Post-handshake peer check for both connection roles.
///
/// In fingerprint mode the peer certificate's SHA-1 must match one permitted
/// entry exactly; in name mode the SAN DNSNames (and the subject CN as a
/// fallback) are matched against the permitted patterns. Failures raise the
/// auth-error callback with the credential material and a readable reason.
pub(crate) fn authenticate_peer(
    transport: &crate::transport::Transport,
    mode: AuthMode,
    peers: &PermittedPeers,
    events: &dyn EventSink,
) -> RelpResult<()> {
    if mode == AuthMode::None || !transport.is_tls() {
        return Ok(());
    }

    let Some(cert) = transport.peer_cert() else {
        events.on_auth_error(
            "",
            "peer did not provide a certificate",
            ErrorCode::AuthNoCert,
        );
        return Err(RelpError::AuthNoCert);
    };

    match mode {
        AuthMode::Fingerprint => {
            let fingerprint = sha1_fingerprint(cert.as_ref());
            tracing::debug!(%fingerprint, "checking peer certificate fingerprint");
            if peers.matches_fingerprint(&fingerprint) {
                Ok(())
            } else {
                events.on_auth_error(
                    &fingerprint,
                    "non-permitted fingerprint",
                    ErrorCode::AuthErrFp,
                );
                Err(RelpError::AuthFingerprint(fingerprint))
            }
        }
        AuthMode::Name => {
            let identity = PeerIdentity::from_cert_der(cert.as_ref())?;
            tracing::debug!(names = %identity.all_names(), "checking peer certificate names");
            if identity.permitted_by(peers) {
                Ok(())
            } else {
                let names = identity.all_names();
                events.on_auth_error(&names, "no permitted name found", ErrorCode::AuthErrName);
                Err(RelpError::AuthName(names))
            }
        }
        AuthMode::None => unreachable!(),
    }
}
