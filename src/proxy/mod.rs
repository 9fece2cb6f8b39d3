//! Forward proxy traffic engine.
//!
//! This module provides:
//! - Proxy authentication against a static credential set ([`auth`])
//! - HTTP CONNECT tunneling with a two-task byte relay ([`tunnel`])
//! - Plain HTTP forwarding with streamed responses ([`forward`])
//! - Host-restricted TLS termination ([`tls`])
//! - The dual listener bootstrap tying it together ([`server`])
//!
//! # Architecture
//!
//! ```text
//!             :80 (plaintext)                      :443 (TLS)
//!   ┌──────────────────────────────┐   ┌──────────────────────────────┐
//!   │ /.well-known/acme-challenge/ │   │  PolicyResolver → certs      │
//!   │   → CertificateManager       │   │  (HTTP/1.1 only)             │
//!   │ everything else → redirect   │   │          │                   │
//!   └──────────────────────────────┘   │      Auth gate (407)         │
//!                                      │     ┌────┴─────┐             │
//!                                      │  CONNECT    other methods    │
//!                                      │  tunnel      forward         │
//!                                      └──────────────────────────────┘
//! ```

pub mod auth;
pub mod error;
pub mod forward;
pub mod server;
pub mod tls;
pub mod tunnel;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

// Re-export main types for convenient access
pub use auth::{AuthRejection, Credential, CredentialSet, LoginPair};
pub use error::{ProxyError, ProxyResult};
pub use forward::Forwarder;
pub use server::{ProxyConfig, ProxyServer, ProxyState};
pub use tls::{HostPolicy, HostPolicyError, PolicyResolver};
pub use tunnel::Hijacker;

/// Response body type used by every handler.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Create an empty response body.
pub(crate) fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Create a response body with content.
pub(crate) fn full_body(content: impl Into<Bytes>) -> ProxyBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}
