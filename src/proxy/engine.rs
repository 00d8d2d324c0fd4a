//! Forwarding engine interface.
//!
//! The dispatcher decides *whether* and *where* to forward; an engine does the
//! actual network I/O. Keeping this behind a trait lets the dispatcher run
//! against a fake engine in tests.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::http::headers::Headers;
use crate::http::request::{BodyFraming, Method};
use crate::http::stream::ClientStream;
use crate::proxy::target::ValidatedTarget;

/// A request that passed validation and header hygiene.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Inbound headers with hop-by-hop fields already removed.
    pub headers: Headers,
    /// Where to send it. Its own path and query replace the inbound path.
    pub target: ValidatedTarget,
    pub framing: BodyFraming,
    /// The requested protocol for upgrade handshakes (e.g. `websocket`).
    pub upgrade: Option<String>,
}

/// The client side of the exchange.
pub struct ClientIo<'a> {
    pub stream: &'a mut dyn ClientStream,
    /// Bytes already read from the client past the request head.
    pub buffered: Bytes,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connect {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("TLS handshake with {host} failed: {source}")]
    Tls { host: String, source: io::Error },

    #[error("invalid TLS server name: {0}")]
    ServerName(String),

    #[error("upstream proxy: {0}")]
    UpstreamProxy(String),

    #[error("invalid origin response: {0}")]
    Protocol(String),

    /// The client went away before the exchange finished: it closed early,
    /// or sent less body than it announced.
    #[error("client disconnected")]
    ClientDisconnected,

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// True when the origin (or the path to it) is at fault.
    ///
    /// A target that cannot even be expressed as a TLS server name is a
    /// handoff problem instead, and a client hangup is nobody's failure.
    pub fn is_origin_failure(&self) -> bool {
        !matches!(self, EngineError::ServerName(_) | EngineError::ClientDisconnected)
    }
}

#[async_trait]
pub trait ForwardingEngine: Send + Sync {
    /// Forwards a plain request and streams the origin's response back.
    async fn forward(&self, request: ForwardRequest, client: ClientIo<'_>) -> Result<(), EngineError>;

    /// Performs the upgrade handshake with the origin and, on `101`, splices
    /// the two connections together until either side closes.
    async fn forward_upgrade(
        &self,
        request: ForwardRequest,
        client: ClientIo<'_>,
    ) -> Result<(), EngineError>;
}
