//! autocert-proxy: Forward HTTP/HTTPS proxy with automatic certificates
//!
//! This is the main entry point for the autocert-proxy binary. It handles CLI
//! argument parsing, configuration loading and logging setup, then starts
//! certificate management and both listeners.
//!
//! Any startup failure (missing configuration, unusable cache directory, a
//! port that cannot be bound) is returned from `main` and ends the process
//! with a non-zero status. Nothing is served until both listeners are bound.

use anyhow::{anyhow, Context, Result};
use autocert_proxy::{
    certs::AcmeManager,
    cli::Cli,
    config::{Config, ConfigLoader},
    proxy::{ProxyConfig, ProxyServer},
};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    init_tracing(cli.verbose)?;

    debug!("Parsed CLI arguments: {:?}", cli);

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    info!(
        "Serving proxy for {} (authentication {})",
        config.acme.host,
        if config.credential_set().is_empty() {
            "disabled"
        } else {
            "enabled"
        }
    );

    // rustls-acme builds its own TLS configs from the process default.
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install the default TLS crypto provider"))?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(serve(config))
}

/// Start certificate management and the listeners, then run until Ctrl-C.
async fn serve(config: Config) -> Result<()> {
    let (certs, acme_task) =
        AcmeManager::spawn(&config.acme).context("Failed to start certificate management")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = ProxyServer::bind(ProxyConfig::from_config(&config), Arc::new(certs), shutdown_rx)
        .await
        .context("Failed to start listeners")?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                shutdown_tx.send(true).ok();
            }
            Err(e) => {
                warn!("Failed to listen for Ctrl-C: {}", e);
                // Keep the sender alive so the server keeps running.
                std::future::pending::<()>().await;
            }
        }
    });

    server.run().await.context("Proxy server failed")?;
    acme_task.abort();

    Ok(())
}

/// Initialize the tracing subscriber.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG` if set, otherwise info
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
