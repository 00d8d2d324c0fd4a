//! HTTP/1.x protocol layer.
//!
//! The proxy speaks just enough HTTP to find the target in the request line,
//! answer its own rejections, and hand the connection to the forwarding
//! engine. Message bodies are never buffered here.
//!
//! - **`connection`**: per-connection request loop
//! - **`headers`**: ordered, case-insensitive header list
//! - **`parser`**: request head parsing
//! - **`request`** / **`response`**: message types
//! - **`stream`**: client stream abstractions
//! - **`writer`**: response serialization
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for a complete request head
//!        └──────┬──────┘
//!               │ head parsed        (malformed → Writing 400, close)
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← Validate target, forward or reject
//!        └──────┬───────────┘
//!               │ forwarded/upgraded → Closed
//!               │ rejected locally
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send the proxy's own response
//!        └──────┬───────────┘
//!               ├─ Keep-Alive, no body → Reading
//!               └─ otherwise → Closed
//! ```

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod stream;
pub mod writer;
