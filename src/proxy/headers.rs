//! Header hygiene for outbound requests.

use crate::http::headers::Headers;

/// Headers that only describe the inbound connection and must not be relayed.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "forwarded",
    "proxy-connection",
];

/// Removes every hop-by-hop header, in place.
pub fn strip_hop_by_hop(headers: &mut Headers) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
