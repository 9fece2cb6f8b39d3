//! TLS termination for the proxy listener.
//!
//! This module provides:
//! - The [`HostPolicy`] restricting certificates to one hostname
//! - [`PolicyResolver`], which applies that policy on every handshake before
//!   delegating to the certificate collaborator
//! - TLS acceptor for client connections (proxy as server)
//! - TLS client configuration for forwarded `https://` requests
//!
//! # ALPN
//!
//! The acceptor only advertises HTTP/1.1. Every connection therefore goes
//! through the single request dispatch path, and the tunnel relay never has
//! to deal with multiplexed HTTP/2 streams.

use super::error::{ProxyError, ProxyResult};
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, trace, warn};

/// Refusal produced by [`HostPolicy::check`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("only {allowed} host is allowed, refusing {requested:?}")]
pub struct HostPolicyError {
    /// The configured hostname.
    pub allowed: String,
    /// The name that was asked for.
    pub requested: String,
}

/// Certificate issuance policy: exactly one hostname is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPolicy {
    allowed_host: String,
}

impl HostPolicy {
    /// Allow only `allowed_host`.
    pub fn new(allowed_host: impl Into<String>) -> Self {
        Self {
            allowed_host: allowed_host.into(),
        }
    }

    /// The single allowed hostname.
    pub fn allowed_host(&self) -> &str {
        &self.allowed_host
    }

    /// Accept `domain` only if it is exactly the allowed host.
    pub fn check(&self, domain: &str) -> Result<(), HostPolicyError> {
        if domain == self.allowed_host {
            Ok(())
        } else {
            Err(HostPolicyError {
                allowed: self.allowed_host.clone(),
                requested: domain.to_string(),
            })
        }
    }
}

/// Per-handshake certificate resolver gated by a [`HostPolicy`].
///
/// Handshakes without SNI, or for any other name, fail before the inner
/// resolver (and so the certificate authority) is ever consulted.
pub struct PolicyResolver {
    policy: HostPolicy,
    inner: Arc<dyn ResolvesServerCert>,
}

impl PolicyResolver {
    /// Wrap `inner` with `policy`.
    pub fn new(policy: HostPolicy, inner: Arc<dyn ResolvesServerCert>) -> Self {
        Self { policy, inner }
    }
}

impl ResolvesServerCert for PolicyResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(name) = client_hello.server_name() else {
            debug!("Refusing TLS handshake without SNI");
            return None;
        };

        if let Err(e) = self.policy.check(name) {
            warn!("Refusing TLS handshake: {}", e);
            return None;
        }

        trace!("Resolving certificate for: {}", self.policy.allowed_host());
        self.inner.resolve(client_hello)
    }
}

impl std::fmt::Debug for PolicyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyResolver")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Crypto provider used for every TLS configuration built by the proxy.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Create the TLS acceptor for the proxy listener.
pub fn create_tls_acceptor(resolver: Arc<dyn ResolvesServerCert>) -> ProxyResult<TlsAcceptor> {
    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(resolver);

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// TLS client configuration for forwarded `https://` requests.
///
/// Trusts the system root certificates. An empty store is not an error:
/// plain `http://` forwarding keeps working and `https://` targets fail
/// verification per request.
pub fn client_tls_config() -> ProxyResult<ClientConfig> {
    let mut root_store = RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();

    for err in native_certs.errors {
        debug!("Warning loading native cert: {}", err);
    }

    for cert in native_certs.certs {
        if let Err(e) = root_store.add(cert) {
            debug!("Warning adding cert to store: {}", e);
        }
    }

    debug!("Loaded {} root certificates", root_store.len());

    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(ProxyError::from)?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(config)
}
