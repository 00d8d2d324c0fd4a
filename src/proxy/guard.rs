//! SSRF guard.
//!
//! Combines the literal host checks from [`crate::proxy::classify`] with a
//! fresh name lookup for every request. Nothing is cached: each request sees
//! current DNS, and a stale "allow" can never outlive a record change.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::proxy::classify::{is_forbidden_host, is_private_addr};

/// Resolves hostnames to every address the system knows, both families.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo` via tokio).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl NameResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Why a target was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The hostname itself is reserved or a private literal.
    ForbiddenLiteral,
    /// At least one resolved address is private.
    ForbiddenResolved,
    /// Resolution failed and the guard runs fail-closed.
    ResolutionFailed,
}

impl DenyReason {
    /// Client-facing explanation.
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::ForbiddenLiteral => "Target host is not allowed",
            DenyReason::ForbiddenResolved => "Target host resolves to private address",
            DenyReason::ResolutionFailed => "Target host could not be resolved",
        }
    }
}

/// Outcome of one guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    /// Resolution failed and the guard is fail-open; the connection attempt
    /// itself will decide. Carries the resolver error for logging.
    AllowUnverified(String),
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, AccessDecision::Deny(_))
    }
}

/// What to do when a lookup fails (NXDOMAIN, timeout, resolver error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DnsFailurePolicy {
    /// Let the request through and let the connect attempt fail on its own.
    #[default]
    FailOpen,
    /// Refuse the request.
    FailClosed,
}

pub struct SsrfGuard {
    resolver: Arc<dyn NameResolver>,
    dns_failure: DnsFailurePolicy,
}

impl SsrfGuard {
    pub fn new(resolver: Arc<dyn NameResolver>, dns_failure: DnsFailurePolicy) -> Self {
        Self {
            resolver,
            dns_failure,
        }
    }

    /// Decides whether `hostname` may be contacted.
    ///
    /// Literal checks run first and short-circuit without any lookup.
    pub async fn check(&self, hostname: &str) -> AccessDecision {
        if is_forbidden_host(hostname) {
            debug!(host = hostname, "refused by literal host check");
            return AccessDecision::Deny(DenyReason::ForbiddenLiteral);
        }

        match self.resolves_to_private_address(hostname).await {
            Ok(true) => AccessDecision::Deny(DenyReason::ForbiddenResolved),
            Ok(false) => AccessDecision::Allow,
            Err(e) => match self.dns_failure {
                DnsFailurePolicy::FailOpen => {
                    warn!(
                        host = hostname,
                        error = %e,
                        "name resolution failed; allowing request without address check"
                    );
                    AccessDecision::AllowUnverified(e.to_string())
                }
                DnsFailurePolicy::FailClosed => {
                    warn!(host = hostname, error = %e, "name resolution failed; refusing request");
                    AccessDecision::Deny(DenyReason::ResolutionFailed)
                }
            },
        }
    }

    /// True if `hostname` is, or resolves to, a private address.
    ///
    /// Every returned address is checked; one private entry is enough.
    pub async fn resolves_to_private_address(&self, hostname: &str) -> io::Result<bool> {
        let bare = hostname
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(hostname);
        if let Ok(addr) = bare.parse::<IpAddr>() {
            return Ok(is_private_addr(addr));
        }

        let addrs = self.resolver.lookup(hostname).await?;
        if let Some(private) = addrs.iter().find(|a| is_private_addr(**a)) {
            debug!(host = hostname, address = %private, "hostname resolves to private address");
            return Ok(true);
        }
        Ok(false)
    }
}
