//! Runtime configuration.
//!
//! Values come from an optional YAML file (path in `HOST_FORWARD_CONFIG`)
//! and are then overridden by environment variables. Everything is read once
//! at startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Environment variable naming the optional YAML config file.
pub const CONFIG_FILE_ENV: &str = "HOST_FORWARD_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_host: String,
    pub http_port: u16,
    pub https_port: Option<u16>,
    pub https: HttpsConfig,
    /// Verify origin TLS certificates.
    pub strict_tls: bool,
    /// Refuse targets whose name cannot be resolved.
    pub ssrf_dns_fail_closed: bool,
    pub upstream: UpstreamConfig,
}

/// TLS material for the inbound HTTPS listener.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpsConfig {
    pub key_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    /// Extra certificates appended to the served chain.
    pub ca_path: Option<PathBuf>,
}

/// Upstream (egress) proxy settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

/// What the HTTPS listener can do with the configured material.
#[derive(Debug, Clone, PartialEq)]
pub enum TlsMaterial<'a> {
    /// No HTTPS port configured.
    Disabled,
    /// Port configured but key or certificate missing.
    Incomplete,
    Ready {
        cert_path: &'a PathBuf,
        key_path: &'a PathBuf,
        ca_path: Option<&'a PathBuf>,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            http_port: 8080,
            https_port: None,
            https: HttpsConfig::default(),
            strict_tls: true,
            ssrf_dns_fail_closed: false,
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable source.
    pub fn from_source<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match lookup(CONFIG_FILE_ENV).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_yaml_file(&path)?,
            None => Self::default(),
        };
        cfg.apply_env(&lookup)?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path}"))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse config file {path}"))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_env<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = var("LISTEN_HOST") {
            self.listen_host = host;
        }
        if let Some(port) = var("HTTP_PORT") {
            self.http_port = parse_port("HTTP_PORT", &port)?;
        }
        if let Some(port) = var("HTTPS_PORT") {
            self.https_port = Some(parse_port("HTTPS_PORT", &port)?);
        }
        if let Some(path) = var("HTTPS_KEY_PATH") {
            self.https.key_path = Some(path.into());
        }
        if let Some(path) = var("HTTPS_CERT_PATH") {
            self.https.cert_path = Some(path.into());
        }
        if let Some(path) = var("HTTPS_CA_PATH") {
            self.https.ca_path = Some(path.into());
        }
        if let Some(v) = var("PROXY_REJECT_UNAUTHORIZED") {
            self.strict_tls = v.trim() != "false";
        }
        if let Some(v) = var("SSRF_DNS_FAIL_CLOSED") {
            self.ssrf_dns_fail_closed = v.trim() == "true";
        }

        // curl convention: lowercase wins over uppercase
        let proxy_var = |lower: &str, upper: &str| var(lower).or_else(|| var(upper));
        if let Some(v) = proxy_var("http_proxy", "HTTP_PROXY") {
            self.upstream.http_proxy = Some(v);
        }
        if let Some(v) = proxy_var("https_proxy", "HTTPS_PROXY") {
            self.upstream.https_proxy = Some(v);
        }
        if let Some(v) = proxy_var("no_proxy", "NO_PROXY") {
            self.upstream.no_proxy = Some(v);
        }
        Ok(())
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.listen_host, self.http_port)
    }

    /// `None` when no HTTPS port is configured.
    pub fn https_addr(&self) -> Result<Option<SocketAddr>> {
        self.https_port
            .map(|port| socket_addr(&self.listen_host, port))
            .transpose()
    }

    pub fn tls_material(&self) -> TlsMaterial<'_> {
        if self.https_port.is_none() {
            return TlsMaterial::Disabled;
        }
        match (&self.https.cert_path, &self.https.key_path) {
            (Some(cert_path), Some(key_path)) => TlsMaterial::Ready {
                cert_path,
                key_path,
                ca_path: self.https.ca_path.as_ref(),
            },
            _ => {
                warn!("HTTPS_PORT set but HTTPS_CERT_PATH/HTTPS_KEY_PATH incomplete; HTTPS listener disabled");
                TlsMaterial::Incomplete
            }
        }
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a port number, got {value:?}"))
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let ip: std::net::IpAddr = host
        .parse()
        .with_context(|| format!("listen host must be an IP address, got {host:?}"))?;
    Ok(SocketAddr::new(ip, port))
}
