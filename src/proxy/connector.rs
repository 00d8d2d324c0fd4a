//! Outbound connection setup: TCP, optional upstream proxy hop, optional TLS.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore, pki_types::ServerName};
use tracing::{debug, warn};

use crate::proxy::egress::{EgressProxies, ProxyEndpoint, open_tunnel};
use crate::proxy::engine::EngineError;
use crate::proxy::target::ValidatedTarget;

/// Any duplex stream to an origin (or to a proxy in front of it).
pub trait OriginStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> OriginStream for T {}

pub type BoxedOrigin = Box<dyn OriginStream>;

/// How the request line must address the target on the opened connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestForm {
    /// `GET /path?query HTTP/1.1` straight to the origin or through a tunnel.
    Origin,
    /// `GET http://host/path HTTP/1.1` to a plain HTTP proxy.
    Absolute { proxy_authorization: Option<String> },
}

/// Opens connections to validated targets.
pub struct Connector {
    tls: TlsConnector,
    egress: EgressProxies,
}

impl Connector {
    /// `strict_tls = false` disables origin certificate verification.
    pub fn new(strict_tls: bool, egress: EgressProxies) -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        if !strict_tls {
            warn!("origin TLS certificate verification is DISABLED");
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoVerifier::new()));
        }

        Self {
            tls: TlsConnector::from(Arc::new(config)),
            egress,
        }
    }

    /// Connects to `target`, honoring upstream proxy settings.
    ///
    /// `upgrade` forces a CONNECT tunnel when a proxy is involved, since an
    /// upgraded stream cannot be relayed through absolute-form requests.
    pub async fn connect(
        &self,
        target: &ValidatedTarget,
        upgrade: bool,
    ) -> Result<(BoxedOrigin, RequestForm), EngineError> {
        let Some(proxy) = self.egress.proxy_for(target) else {
            let stream = dial(&target.socket_authority()).await?;
            let stream = self.maybe_tls(stream, target).await?;
            return Ok((stream, RequestForm::Origin));
        };

        debug!(proxy = %proxy.addr(), target = %target, "connecting through upstream proxy");
        let mut stream = self.dial_proxy(proxy).await?;

        if !target.is_tls() && !upgrade {
            let form = RequestForm::Absolute {
                proxy_authorization: proxy.authorization.clone(),
            };
            return Ok((stream, form));
        }

        open_tunnel(
            &mut stream,
            &target.socket_authority(),
            proxy.authorization.as_deref(),
        )
        .await?;
        let stream = self.maybe_tls(stream, target).await?;
        Ok((stream, RequestForm::Origin))
    }

    async fn dial_proxy(&self, proxy: &ProxyEndpoint) -> Result<BoxedOrigin, EngineError> {
        let stream = dial(&proxy.addr()).await?;
        if proxy.tls {
            self.handshake(stream, proxy.server_name()).await
        } else {
            Ok(stream)
        }
    }

    async fn maybe_tls(
        &self,
        stream: BoxedOrigin,
        target: &ValidatedTarget,
    ) -> Result<BoxedOrigin, EngineError> {
        if target.is_tls() {
            self.handshake(stream, &target.hostname()).await
        } else {
            Ok(stream)
        }
    }

    async fn handshake(&self, stream: BoxedOrigin, host: &str) -> Result<BoxedOrigin, EngineError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| EngineError::ServerName(host.to_string()))?;
        let tls = self
            .tls
            .connect(server_name, stream)
            .await
            .map_err(|source| EngineError::Tls {
                host: host.to_string(),
                source,
            })?;
        Ok(Box::new(tls))
    }
}

async fn dial(addr: &str) -> Result<BoxedOrigin, EngineError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| EngineError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    Ok(Box::new(stream))
}

/// Accepts any origin certificate. Only installed when strict TLS is off.
#[derive(Debug)]
struct NoVerifier {
    schemes: Vec<rustls::SignatureScheme>,
}

impl NoVerifier {
    fn new() -> Self {
        let schemes = rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes();
        Self { schemes }
    }
}

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.schemes.clone()
    }
}
