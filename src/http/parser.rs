use crate::http::headers::Headers;
use crate::http::request::{Method, Request};

/// Largest request or response head accepted before giving up.
pub const MAX_HEAD_LEN: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("invalid method")]
    InvalidMethod,
    #[error("unsupported HTTP version")]
    InvalidVersion,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("request head exceeds {MAX_HEAD_LEN} bytes")]
    HeadTooLarge,
    #[error("incomplete request head")]
    Incomplete,
}

/// Parses a request head from the start of `buf`.
///
/// Returns the request and the number of bytes consumed by the head. Any
/// bytes after the head belong to the body (or to an upgraded stream) and are
/// left to the caller.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEAD_LEN => return Err(ParseError::HeadTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    if headers_end > MAX_HEAD_LEN {
        return Err(ParseError::HeadTooLarge);
    }
    let header_bytes = &buf[..headers_end];

    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split(' ');

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() || path.is_empty() {
        return Err(ParseError::InvalidRequest);
    }
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(ParseError::InvalidVersion);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        // obs-fold continuation lines are rejected outright
        if line.starts_with([' ', '\t']) {
            return Err(ParseError::InvalidHeader);
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidHeader)?;
        if key.is_empty() || key.ends_with([' ', '\t']) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
    };

    if request.header("Content-Length").is_some()
        && request.content_length().is_none()
    {
        return Err(ParseError::InvalidContentLength);
    }

    Ok((request, headers_end + 4))
}

pub(crate) fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_proxied_get() {
        let req = b"GET /https://example.com/a HTTP/1.1\r\nHost: proxy.test\r\n\r\n";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.path, "/https://example.com/a");
        assert_eq!(parsed.headers.get("host").unwrap(), "proxy.test");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut req = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        req.extend(std::iter::repeat_n(b'a', MAX_HEAD_LEN));

        assert_eq!(parse_http_request(&req).unwrap_err(), ParseError::HeadTooLarge);
    }
}
