//! Per-request pipeline.
//!
//! ```text
//!   CONNECT? ──yes──▶ 405
//!      │
//!   resolve target ──none──▶ 400
//!      │
//!   parse URL ──error──▶ 400
//!      │
//!   literal host check ──forbidden──▶ 403
//!      │
//!   resolved address check ──private──▶ 403
//!      │
//!   strip hop-by-hop headers
//!      │
//!   forwarding engine ──error──▶ 502 (or drop, once the response began)
//! ```
//!
//! Upgrade handshakes run the same checks but answer failures with a bare
//! status line written straight to the socket.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::{info, warn};

use crate::error::ProxyError;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::stream::{ClientStream, TrackedStream};
use crate::http::writer::reject_raw;
use crate::proxy::engine::{ClientIo, EngineError, ForwardRequest, ForwardingEngine};
use crate::proxy::guard::{AccessDecision, SsrfGuard};
use crate::proxy::headers::strip_hop_by_hop;
use crate::proxy::target::{ValidatedTarget, resolve_target};

/// One inbound request, with the connection it arrived on.
pub struct InboundRequest<'a> {
    pub request: Request,
    /// Whether the inbound connection is TLS-terminated.
    pub secure: bool,
    pub stream: &'a mut dyn ClientStream,
    /// Bytes already read past the request head. Left untouched when the
    /// request is answered locally, so the connection can be reused.
    pub buffered: &'a mut BytesMut,
}

/// What the connection should do once the dispatcher is done.
#[derive(Debug)]
pub enum Disposition {
    /// Write this response; the connection may serve another request.
    Respond(Response),
    /// Write this response, then close.
    RespondAndClose(Response),
    /// The exchange already consumed the connection; close it.
    Close,
}

pub struct Dispatcher {
    guard: SsrfGuard,
    engine: Arc<dyn ForwardingEngine>,
}

impl Dispatcher {
    pub fn new(guard: SsrfGuard, engine: Arc<dyn ForwardingEngine>) -> Self {
        Self { guard, engine }
    }

    /// Runs the plain request pipeline.
    pub async fn handle_request(&self, inbound: InboundRequest<'_>) -> Disposition {
        let InboundRequest {
            request,
            secure,
            stream,
            buffered,
        } = inbound;

        if request.method == Method::CONNECT {
            info!(path = %request.path, "CONNECT refused");
            return Disposition::Respond(ProxyError::MethodNotAllowed.to_response());
        }

        let target = match self.authorize(&request, secure).await {
            Ok(target) => target,
            Err(e) => return Disposition::Respond(e.to_response()),
        };

        let forward = prepare(&request, target, None);
        info!(method = %forward.method, target = %forward.target, "Forwarding request");

        let mut tracked = TrackedStream::new(stream);
        let client = ClientIo {
            stream: &mut tracked,
            buffered: buffered.split().freeze(),
        };
        let target = forward.target.clone();

        match self.engine.forward(forward, client).await {
            Ok(()) => Disposition::Close,
            Err(EngineError::ClientDisconnected) => {
                info!(target = %target, "client disconnected; origin connection closed");
                Disposition::Close
            }
            Err(e) => {
                let err = ProxyError::from(e);
                if tracked.started() {
                    warn!(target = %target, error = %err, "forwarding failed mid-response; dropping connection");
                    Disposition::Close
                } else {
                    warn!(target = %target, error = %err, status = err.status_code().as_u16(), "forwarding failed");
                    Disposition::RespondAndClose(err.to_response())
                }
            }
        }
    }

    /// Runs the upgrade pipeline. The connection is finished afterwards.
    pub async fn handle_upgrade(&self, inbound: InboundRequest<'_>) {
        let InboundRequest {
            request,
            secure,
            stream,
            buffered,
        } = inbound;

        let target = match self.authorize(&request, secure).await {
            Ok(target) => target,
            Err(e) => {
                reject_raw(stream, e.status_code()).await;
                return;
            }
        };

        let protocol = request.header("Upgrade").map(str::to_string);
        let forward = prepare(&request, target, protocol);
        info!(target = %forward.target, "Forwarding upgrade");

        let mut tracked = TrackedStream::new(stream);
        let client = ClientIo {
            stream: &mut tracked,
            buffered: buffered.split().freeze(),
        };
        let target = forward.target.clone();

        match self.engine.forward_upgrade(forward, client).await {
            Ok(()) => {}
            Err(EngineError::ClientDisconnected) => {
                info!(target = %target, "client disconnected during upgrade");
            }
            Err(e) => {
                let err = ProxyError::from(e);
                warn!(target = %target, error = %err, "upgrade forwarding failed");
                if !tracked.started() {
                    reject_raw(&mut tracked, StatusCode::BadGateway).await;
                }
            }
        }
    }

    /// Target resolution, URL validation and the SSRF checks.
    async fn authorize(&self, request: &Request, secure: bool) -> Result<ValidatedTarget, ProxyError> {
        let Some(candidate) = resolve_target(request, secure) else {
            info!(path = %request.path, "no target in request path");
            return Err(ProxyError::MissingTarget);
        };

        let target = ValidatedTarget::parse(&candidate).inspect_err(|e| {
            info!(candidate = %candidate, error = %e, "invalid target URL");
        })?;

        match self.guard.check(&target.hostname()).await {
            AccessDecision::Allow | AccessDecision::AllowUnverified(_) => Ok(target),
            AccessDecision::Deny(reason) => {
                warn!(target = %target, reason = reason.message(), "target refused");
                Err(ProxyError::Forbidden(reason))
            }
        }
    }
}

fn prepare(request: &Request, target: ValidatedTarget, upgrade: Option<String>) -> ForwardRequest {
    let mut headers = request.headers.clone();
    strip_hop_by_hop(&mut headers);
    ForwardRequest {
        method: request.method.clone(),
        headers,
        target,
        framing: request.body_framing(),
        upgrade,
    }
}
