use crate::http::headers::Headers;

/// HTTP status codes the proxy generates itself.
///
/// Origin responses are relayed byte for byte and never pass through this
/// type; these are only the proxy's own rejections:
/// - `BadRequest` (400): no usable target in the path, or an unparsable one
/// - `Forbidden` (403): target refused by the SSRF guard
/// - `MethodNotAllowed` (405): `CONNECT`
/// - `BadGateway` (502): the origin could not be reached or misbehaved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 502 Bad Gateway
    BadGateway,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use host_forward::http::response::StatusCode;
    /// assert_eq!(StatusCode::Forbidden.as_u16(), 403);
    /// assert_eq!(StatusCode::BadGateway.as_u16(), 502);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::BadGateway => 502,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::BadGateway => "Bad Gateway",
        }
    }

    /// A bare status line followed by the empty header block.
    ///
    /// Used on upgrade connections, where the failure is reported by writing
    /// straight to the socket and closing it.
    ///
    /// ```
    /// # use host_forward::http::response::StatusCode;
    /// assert_eq!(StatusCode::Forbidden.raw_status_line(), "HTTP/1.1 403 Forbidden\r\n\r\n");
    /// ```
    pub fn raw_status_line(&self) -> String {
        format!("HTTP/1.1 {} {}\r\n\r\n", self.as_u16(), self.reason_phrase())
    }
}

/// Represents a complete HTTP response ready to be sent to a client.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Forbidden)
///     .json(&serde_json::json!({ "error": "Forbidden" }))
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Serializes `value` as the body and marks it `application/json`.
    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("Content-Type", "application/json")
            .body(value.to_string().into_bytes())
    }

    /// Builds the final Response.
    ///
    /// Adds the Content-Length header based on body size if not already present.
    pub fn build(mut self) -> Response {
        if !self.headers.contains("Content-Length") {
            self.headers
                .append("Content-Length", self.body.len().to_string());
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// A JSON error body of the shape `{"error": ..., "message": ...}`.
    ///
    /// `message` is omitted from the body when `None`.
    pub fn json_error(status: StatusCode, error: &str, message: Option<&str>) -> Self {
        let body = match message {
            Some(message) => serde_json::json!({ "error": error, "message": message }),
            None => serde_json::json!({ "error": error }),
        };
        ResponseBuilder::new(status).json(&body).build()
    }
}
