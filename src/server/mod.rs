//! Network listeners
//!
//! Plaintext and TLS-terminated accept loops that hand each connection to
//! the HTTP layer.

pub mod listener;
pub mod tls;
