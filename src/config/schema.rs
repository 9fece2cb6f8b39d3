//! Configuration schema definitions.
//!
//! Every section has working defaults except the ACME host and contact
//! address, which must come from a file, the environment or the CLI.

use super::error::ConfigError;
use crate::proxy::auth::CredentialSet;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Certificate issuance settings.
    #[serde(default)]
    pub acme: AcmeSettings,

    /// Listener addresses.
    #[serde(default)]
    pub listen: ListenSettings,

    /// Proxy authentication.
    #[serde(default)]
    pub auth: AuthSettings,

    /// CONNECT tunnel settings.
    #[serde(default)]
    pub tunnel: TunnelSettings,
}

impl Config {
    /// Check that required values are present and consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acme.host.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "acme.host",
                env: super::ENV_HOST,
            });
        }

        if self.acme.admin_email.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "acme.admin_email",
                env: super::ENV_ADMIN_EMAIL,
            });
        }

        if self.listen.http_addr == self.listen.https_addr {
            return Err(ConfigError::InvalidValue {
                field: "listen".to_string(),
                message: format!(
                    "http_addr and https_addr must differ (both {})",
                    self.listen.http_addr
                ),
            });
        }

        if self.tunnel.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tunnel.connect_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if let Some(spec) = &self.auth.credentials {
            if !spec.is_empty() && CredentialSet::parse(spec).is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "auth.credentials".to_string(),
                    message: "no credential entries found".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Parsed credential set; empty when authentication is disabled.
    pub fn credential_set(&self) -> CredentialSet {
        self.auth
            .credentials
            .as_deref()
            .map(CredentialSet::parse)
            .unwrap_or_default()
    }
}

/// ACME certificate settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AcmeSettings {
    /// The only hostname certificates are issued for.
    #[serde(default)]
    pub host: String,

    /// Contact address registered with the certificate authority.
    #[serde(default)]
    pub admin_email: String,

    /// Directory holding the account key and issued certificates.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Use the certificate authority's staging directory.
    #[serde(default)]
    pub staging: bool,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            admin_email: String::new(),
            cache_dir: default_cache_dir(),
            staging: false,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Listener addresses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ListenSettings {
    /// Plaintext listener (challenges and redirects only).
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// TLS listener carrying all proxy traffic.
    #[serde(default = "default_https_addr")]
    pub https_addr: SocketAddr,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            https_addr: default_https_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

fn default_https_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 443))
}

/// Proxy authentication settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSettings {
    /// `entry(;entry)*` where `entry` is `secret` or `user:secret`.
    ///
    /// Unset or empty disables authentication.
    #[serde(default)]
    pub credentials: Option<String>,
}

/// CONNECT tunnel settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelSettings {
    /// Destination dial timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl TunnelSettings {
    /// Dial timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}
