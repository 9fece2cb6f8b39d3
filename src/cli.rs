//! Command-line interface definitions for autocert-proxy.
//!
//! Uses clap's derive API for type-safe argument parsing. Every flag is
//! optional: values may equally come from a config file or the environment
//! (see [`crate::config`]).

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Forward HTTP/HTTPS proxy with automatic certificates.
///
/// Terminates TLS for proxy clients with a certificate obtained from an ACME
/// certificate authority for a single hostname, authenticates them with
/// `Proxy-Authorization: Basic`, and tunnels (`CONNECT`) or forwards their
/// requests.
#[derive(Parser, Debug)]
#[command(name = "autocert-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// The only hostname certificates are issued for [env: HOST].
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Contact address registered with the certificate authority [env: ADMIN_EMAIL].
    #[arg(long = "admin-email", value_name = "EMAIL")]
    pub admin_email: Option<String>,

    /// Accepted credentials: `entry(;entry)*`, entry is `secret` or `user:secret` [env: PROXY_AUTH].
    #[arg(long = "auth", value_name = "SPEC")]
    pub auth: Option<String>,

    /// Directory where the ACME account and certificates are stored.
    #[arg(long = "data-dir", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Plaintext listener address (challenges and redirects).
    #[arg(long = "http-addr", value_name = "ADDR")]
    pub http_addr: Option<SocketAddr>,

    /// TLS listener address (proxy traffic).
    #[arg(long = "https-addr", value_name = "ADDR")]
    pub https_addr: Option<SocketAddr>,

    /// Use the certificate authority's staging environment.
    #[arg(long = "staging")]
    pub staging: bool,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}
