//! Address classification.
//!
//! Pure string/address predicates deciding whether a hostname or IP literal
//! points into private, loopback or link-local space. No I/O happens here;
//! name resolution is layered on top by [`crate::proxy::guard`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Reserved suffixes that never name a public host.
const FORBIDDEN_SUFFIXES: &[&str] = &[
    ".localhost",
    ".local",
    ".lan",
    ".home",
    ".internal",
    ".intranet",
    ".localdomain",
];

/// Checks a dotted-quad IPv4 literal against the private ranges.
///
/// Matches `0.0.0.0/8`, `10.0.0.0/8`, `127.0.0.0/8`, `169.254.0.0/16`,
/// `172.16.0.0/12` and `192.168.0.0/16`. Anything that is not exactly four
/// integer octets yields `false`: it is not a decidable IPv4 literal.
pub fn is_private_ipv4(host: &str) -> bool {
    let mut octets = [0u32; 4];
    let mut count = 0;
    for part in host.split('.') {
        if count == 4 {
            return false;
        }
        match part.parse::<u32>() {
            Ok(n) => octets[count] = n,
            Err(_) => return false,
        }
        count += 1;
    }
    if count != 4 {
        return false;
    }

    let [a, b, _, _] = octets;
    a == 10
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || a == 0
}

/// Checks an IPv6 literal with a coarse prefix test.
///
/// `::1`, plus anything starting with `fc`/`fd` (unique local, `fc00::/7`) or
/// `fe80` (link-local). This is a textual heuristic, not a CIDR match.
pub fn is_private_ipv6(host: &str) -> bool {
    let h = host.to_ascii_lowercase();
    h == "::1" || h.starts_with("fc") || h.starts_with("fd") || h.starts_with("fe80")
}

/// Applies the private-range tests to a parsed address.
///
/// IPv6 addresses that embed an IPv4 address (`::ffff:a.b.c.d`) and the
/// unspecified address `::` are judged by where a connection would actually
/// land.
pub fn is_private_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(addr: Ipv4Addr) -> bool {
    is_private_ipv4(&addr.to_string())
}

fn is_private_v6(addr: Ipv6Addr) -> bool {
    if addr.is_unspecified() {
        return true;
    }
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_private_v4(v4);
    }
    is_private_ipv6(&addr.to_string())
}

/// Decides from the hostname alone whether a target is off limits.
///
/// `localhost` and the reserved suffixes are forbidden; IP literals are
/// checked against the private ranges; ordinary domain names pass (their
/// resolved addresses are checked separately). Comparison ignores case and a
/// single trailing root dot. IPv6 literals may be bracketed.
pub fn is_forbidden_host(hostname: &str) -> bool {
    let lower = hostname.to_ascii_lowercase();
    let h = lower.strip_suffix('.').unwrap_or(&lower);

    if h == "localhost" || FORBIDDEN_SUFFIXES.iter().any(|s| h.ends_with(s)) {
        return true;
    }

    let bare = h
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(h);
    match bare.parse::<IpAddr>() {
        Ok(addr) => is_private_addr(addr),
        Err(_) => false,
    }
}
