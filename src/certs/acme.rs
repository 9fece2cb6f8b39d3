//! ACME certificate management via `rustls-acme`.
//!
//! Certificates for the single configured host are obtained with HTTP-01
//! challenges and persisted in a directory cache, together with the ACME
//! account key, so restarts do not trigger new orders.

use super::CertificateManager;
use crate::config::AcmeSettings;
use futures_lite::StreamExt;
use rustls::server::ResolvesServerCert;
use rustls_acme::caches::DirCache;
use rustls_acme::{AcmeConfig, ResolvesServerCertAcme, UseChallenge};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Errors raised while setting up certificate management.
#[derive(Debug, Error)]
pub enum CertError {
    /// The certificate cache directory could not be created.
    #[error("Failed to create certificate cache directory {path}: {source}")]
    CacheDir {
        /// The directory we tried to create.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Certificate manager driving an ACME order state machine.
pub struct AcmeManager {
    resolver: Arc<ResolvesServerCertAcme>,
}

impl AcmeManager {
    /// Start certificate management for `settings.host`.
    ///
    /// Returns the manager and the handle of the background task that
    /// drives ordering and renewal. Must be called inside a Tokio runtime.
    pub fn spawn(settings: &AcmeSettings) -> Result<(Self, JoinHandle<()>), CertError> {
        std::fs::create_dir_all(&settings.cache_dir).map_err(|source| CertError::CacheDir {
            path: settings.cache_dir.clone(),
            source,
        })?;

        let mut state = AcmeConfig::new([settings.host.clone()])
            .contact_push(format!("mailto:{}", settings.admin_email))
            .cache(DirCache::new(settings.cache_dir.clone()))
            .directory_lets_encrypt(!settings.staging)
            .challenge_type(UseChallenge::Http01)
            .state();

        let resolver = state.resolver();

        info!(
            "ACME certificate management for {} (cache: {:?}, staging: {})",
            settings.host, settings.cache_dir, settings.staging
        );

        let handle = tokio::spawn(async move {
            while let Some(event) = state.next().await {
                match event {
                    Ok(ok) => info!("ACME event: {:?}", ok),
                    Err(err) => error!("ACME error: {:?}", err),
                }
            }
        });

        Ok((Self { resolver }, handle))
    }
}

impl CertificateManager for AcmeManager {
    fn resolver(&self) -> Arc<dyn ResolvesServerCert> {
        self.resolver.clone()
    }

    fn http01_key_authorization(&self, token: &str) -> Option<String> {
        self.resolver.get_http_01_key_auth(token)
    }
}

impl std::fmt::Debug for AcmeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeManager").finish_non_exhaustive()
    }
}
