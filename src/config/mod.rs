//! Configuration system for the proxy.
//!
//! Configuration is read once at startup into an immutable [`Config`] that is
//! handed by reference to every component. Nothing is re-read per request.
//!
//! # Sources
//!
//! Values are layered in order, later sources winning:
//!
//! 1. Built-in defaults
//! 2. TOML file given with `--config` (a missing file is an error)
//! 3. Environment: `HOST`, `ADMIN_EMAIL`, `PROXY_AUTH` (empty values ignored)
//! 4. CLI flags
//!
//! # Example
//!
//! ```toml
//! [acme]
//! host = "proxy.example.com"
//! admin_email = "admin@example.com"
//! cache_dir = "/var/lib/autocert-proxy"
//!
//! [auth]
//! credentials = "alice:secret;sharedtoken"
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{ConfigLoader, ENV_ADMIN_EMAIL, ENV_HOST, ENV_PROXY_AUTH};
pub use schema::{AcmeSettings, AuthSettings, Config, ListenSettings, TunnelSettings};
