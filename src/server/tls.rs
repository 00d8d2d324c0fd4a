//! Inbound TLS termination.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Builds an acceptor from PEM files.
///
/// Certificates from `ca_path` are appended to the served chain after the
/// leaf certificate(s) from `cert_path`.
pub fn load_acceptor(cert_path: &Path, key_path: &Path, ca_path: Option<&Path>) -> Result<TlsAcceptor> {
    let mut chain = load_certs(cert_path)?;
    if chain.is_empty() {
        anyhow::bail!("no certificate found in {}", cert_path.display());
    }
    if let Some(ca_path) = ca_path {
        chain.extend(load_certs(ca_path)?);
    }
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .context("TLS certificate and key do not match")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificates in {}", path.display()))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("Failed to parse private key in {}", path.display()))?
        .with_context(|| format!("no private key found in {}", path.display()))
}
