//! Configuration loading with layered overrides.
//!
//! Sources are applied in order, later ones winning:
//!
//! 1. Built-in defaults
//! 2. TOML file (via `--config` flag)
//! 3. Environment variables
//! 4. CLI flags (highest priority)
//!
//! The result is validated before it is returned, so a missing host or
//! contact address is reported here rather than at the first handshake.

use std::fs;
use std::path::Path;

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;
use crate::cli::Cli;

/// Environment variable holding the allowed certificate hostname.
pub const ENV_HOST: &str = "HOST";

/// Environment variable holding the ACME contact address.
pub const ENV_ADMIN_EMAIL: &str = "ADMIN_EMAIL";

/// Environment variable holding the credential specification.
pub const ENV_PROXY_AUTH: &str = "PROXY_AUTH";

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Configuration loader.
pub struct ConfigLoader {
    /// Environment lookup, replaceable for tests.
    env: EnvLookup,
}

impl ConfigLoader {
    /// Create a loader reading the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_env(|key| std::env::var(key).ok())
    }

    /// Create a loader with a custom environment lookup (for testing).
    #[must_use]
    pub fn with_env(env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self { env: Box::new(env) }
    }

    /// Load, layer and validate configuration.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => {
                let config = self.load_file(path)?;
                debug!("Loaded config from {:?}", path);
                config
            }
            None => {
                debug!("No config file given, starting from defaults");
                Config::default()
            }
        };

        self.apply_env(&mut config);
        Self::apply_cli(&mut config, cli);

        config.validate()?;
        Ok(config)
    }

    /// Load a single TOML configuration file.
    pub fn load_file(&self, path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn env_var(&self, key: &str) -> Option<String> {
        (self.env)(key).filter(|value| !value.is_empty())
    }

    fn apply_env(&self, config: &mut Config) {
        if let Some(host) = self.env_var(ENV_HOST) {
            debug!("{} set from environment", ENV_HOST);
            config.acme.host = host;
        }
        if let Some(email) = self.env_var(ENV_ADMIN_EMAIL) {
            debug!("{} set from environment", ENV_ADMIN_EMAIL);
            config.acme.admin_email = email;
        }
        if let Some(credentials) = self.env_var(ENV_PROXY_AUTH) {
            debug!("{} set from environment", ENV_PROXY_AUTH);
            config.auth.credentials = Some(credentials);
        }
    }

    fn apply_cli(config: &mut Config, cli: &Cli) {
        if let Some(host) = &cli.host {
            config.acme.host = host.clone();
        }
        if let Some(email) = &cli.admin_email {
            config.acme.admin_email = email.clone();
        }
        if let Some(credentials) = &cli.auth {
            config.auth.credentials = Some(credentials.clone());
        }
        if let Some(dir) = &cli.data_dir {
            config.acme.cache_dir = dir.clone();
        }
        if let Some(addr) = cli.http_addr {
            config.listen.http_addr = addr;
        }
        if let Some(addr) = cli.https_addr {
            config.listen.https_addr = addr;
        }
        if cli.staging {
            config.acme.staging = true;
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
