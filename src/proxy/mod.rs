//! Forward proxy core
//!
//! Target extraction, SSRF protection, header hygiene and the forwarding
//! engine that talks to origins (directly or through an upstream proxy).

pub mod classify;
pub mod connector;
pub mod dispatcher;
pub mod egress;
pub mod engine;
pub mod guard;
pub mod headers;
pub mod target;
pub mod upstream;

pub use dispatcher::{Dispatcher, Disposition, InboundRequest};
pub use engine::{EngineError, ForwardingEngine};
pub use guard::{DnsFailurePolicy, SsrfGuard, SystemResolver};
pub use upstream::HttpForwarder;
