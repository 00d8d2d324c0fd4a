//! host-forward - path-addressed forward proxy
//!
//! Core library for HTTP and proxy functionality.

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod server;
