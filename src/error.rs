use thiserror::Error;

use crate::http::response::{Response, StatusCode};
use crate::proxy::engine::EngineError;
use crate::proxy::guard::DenyReason;

/// Every way a proxied request can fail at the dispatcher boundary.
///
/// Each variant maps to one status code, a JSON body for ordinary requests,
/// and a raw status line for upgrade handshakes.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("Path must start with full URL, e.g. /https://example.com/api")]
    MissingTarget,

    #[error("{0}")]
    InvalidTarget(String),

    #[error("{}", .0.message())]
    Forbidden(DenyReason),

    #[error("{0}")]
    BadGateway(String),

    /// The handoff to the forwarding engine failed for a reason that is not
    /// the origin's fault.
    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed => StatusCode::MethodNotAllowed,
            ProxyError::MissingTarget => StatusCode::BadRequest,
            ProxyError::InvalidTarget(_) => StatusCode::BadRequest,
            ProxyError::Forbidden(_) => StatusCode::Forbidden,
            ProxyError::BadGateway(_) => StatusCode::BadGateway,
            ProxyError::Internal(_) => StatusCode::BadRequest,
        }
    }

    /// The `error` field of the JSON body.
    pub fn label(&self) -> &'static str {
        match self {
            ProxyError::MethodNotAllowed => "Method Not Allowed",
            ProxyError::MissingTarget => "Bad request",
            ProxyError::InvalidTarget(_) => "Invalid target URL",
            ProxyError::Forbidden(_) => "Forbidden",
            ProxyError::BadGateway(_) => "Bad gateway",
            ProxyError::Internal(_) => "Proxy error",
        }
    }

    /// JSON error response for ordinary requests.
    pub fn to_response(&self) -> Response {
        let message = match self {
            ProxyError::MethodNotAllowed => None,
            other => Some(other.to_string()),
        };
        Response::json_error(self.status_code(), self.label(), message.as_deref())
    }
}

impl From<EngineError> for ProxyError {
    fn from(err: EngineError) -> Self {
        if err.is_origin_failure() {
            ProxyError::BadGateway(err.to_string())
        } else {
            ProxyError::Internal(err.to_string())
        }
    }
}
