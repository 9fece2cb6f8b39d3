//! Boundary to the certificate collaborator.
//!
//! The proxy never talks to a certificate authority itself. It needs two
//! things from whoever manages its certificates:
//!
//! - a per-handshake resolver for the TLS listener, and
//! - answers to HTTP-01 domain-validation challenges on the plaintext listener.
//!
//! [`CertificateManager`] captures exactly that. [`AcmeManager`] is the
//! production implementation backed by `rustls-acme`; tests substitute their
//! own.

mod acme;

pub use acme::{AcmeManager, CertError};

use rustls::server::ResolvesServerCert;
use std::sync::Arc;

/// Path prefix under which HTTP-01 challenge tokens are requested.
pub const HTTP01_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Source of certificates and challenge responses.
pub trait CertificateManager: Send + Sync {
    /// Resolver consulted on every TLS handshake.
    ///
    /// It may serve a cached certificate, wait for issuance, or refuse.
    fn resolver(&self) -> Arc<dyn ResolvesServerCert>;

    /// Key authorization for a pending HTTP-01 challenge `token`.
    fn http01_key_authorization(&self, token: &str) -> Option<String>;
}
