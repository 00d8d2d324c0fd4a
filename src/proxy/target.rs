//! Destination extraction and validation.
//!
//! Clients encode the real destination in the request path
//! (`GET /https://api.example.com/v1/chat`). This module turns the raw
//! request-target into a candidate URL and then into a [`ValidatedTarget`].

use std::fmt;

use url::{Host, Url};

use crate::error::ProxyError;
use crate::http::request::Request;

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

/// Extracts the candidate destination URL from a request.
///
/// First matching rule wins:
/// 1. the path (query kept, percent-escapes untouched) minus one leading `/`
///    is returned as-is when it starts with `http://`, `https://`, `ws://` or
///    `wss://` (any case);
/// 2. for a WebSocket upgrade with a non-empty path, the scheme is inferred
///    from the inbound transport: `wss://` when `secure`, else `ws://`;
/// 3. otherwise there is no usable target.
pub fn resolve_target(request: &Request, secure: bool) -> Option<String> {
    let raw = raw_path(&request.path)?;
    let trimmed = raw.strip_prefix('/').unwrap_or(&raw);

    if has_supported_scheme(trimmed) {
        return Some(trimmed.to_string());
    }

    let upgrade = request.header("Upgrade").unwrap_or_default();
    if upgrade.eq_ignore_ascii_case("websocket") && !trimmed.is_empty() {
        let scheme = if secure { "wss://" } else { "ws://" };
        return Some(format!("{scheme}{trimmed}"));
    }

    None
}

/// Path plus query of a request-target, the way a URL parser sees it.
///
/// Origin-form targets are resolved against a placeholder base so that dot
/// segments and backslashes are normalized exactly like any WHATWG parser
/// would; percent-escapes are left alone. Absolute-form targets (a client
/// talking to us as a classic proxy) contribute their own path and query.
fn raw_path(request_target: &str) -> Option<String> {
    let base = Url::parse("http://forward.invalid/").ok()?;
    let url = base.join(request_target).ok()?;

    let mut out = url.path().to_string();
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    Some(out)
}

fn has_supported_scheme(s: &str) -> bool {
    let head = s.get(..8).unwrap_or(s).to_ascii_lowercase();
    ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|prefix| head.starts_with(prefix))
}

/// An absolute destination URL that passed syntactic validation.
///
/// The scheme is one of http, https, ws, wss and a host is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTarget {
    url: Url,
}

impl ValidatedTarget {
    /// Parses a candidate URL.
    ///
    /// Parse errors are reported with the parser's own message.
    pub fn parse(candidate: &str) -> Result<Self, ProxyError> {
        let url = Url::parse(candidate).map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(ProxyError::InvalidTarget(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }
        if url.host().is_none() {
            return Err(ProxyError::InvalidTarget("empty host".to_string()));
        }

        Ok(Self { url })
    }

    /// The hostname without IPv6 brackets, ready for classification.
    pub fn hostname(&self) -> String {
        match self.url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Domain(name)) => name.to_string(),
            None => String::new(),
        }
    }

    /// True for https and wss.
    pub fn is_tls(&self) -> bool {
        matches!(self.url.scheme(), "https" | "wss")
    }

    /// The explicit port, or 80/443 according to the scheme.
    pub fn port(&self) -> u16 {
        self.url
            .port_or_known_default()
            .unwrap_or(if self.is_tls() { 443 } else { 80 })
    }

    /// Value for the outbound `Host` header: the host, plus the port only when
    /// it differs from the scheme default.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// `host:port` with the port always present (CONNECT tunnels, dialing).
    pub fn socket_authority(&self) -> String {
        format!("{}:{}", self.url.host_str().unwrap_or_default(), self.port())
    }

    /// Origin-form request-target: the target's own path and query.
    pub fn path_and_query(&self) -> String {
        let mut out = self.url.path().to_string();
        if out.is_empty() {
            out.push('/');
        }
        if let Some(query) = self.url.query() {
            out.push('?');
            out.push_str(query);
        }
        out
    }

    /// Absolute-form request-target, used when talking to an upstream proxy.
    pub fn absolute_form(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.to_string()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for ValidatedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
