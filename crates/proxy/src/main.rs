//! Drawbridge - Main entry point
//!
//! A TCP forwarding proxy with automatic TLS certificates.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use drawbridge_config::Config;
use drawbridge_proxy::{services, Listener, Server};

/// Drawbridge - a forwarding proxy with automatic TLS certificates
#[derive(Parser, Debug)]
#[command(name = "drawbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "DRAWBRIDGE_CONFIG")]
    config: String,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.test {
        return test_config(&cli.config);
    }

    run_server(&cli.config, cli.verbose)
}

/// Test configuration file and exit
fn test_config(config_path: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    info!("Testing configuration file: {}", config_path);
    let config = Config::from_file(config_path).context("Failed to load configuration file")?;
    config.validate().context("Configuration validation failed")?;

    let tls_count = config
        .listeners
        .iter()
        .filter(|l| l.tls.is_some())
        .count();
    info!("Configuration test successful:");
    info!("  - {} listener(s), {} with TLS", config.listeners.len(), tls_count);
    info!(
        "  - automatic certificates: {}",
        if config.acme.is_some() { "enabled" } else { "disabled" }
    );

    println!(
        "drawbridge: configuration file {} test is successful",
        config_path
    );
    Ok(())
}

/// Run the proxy
fn run_server(config_path: &str, verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = Config::from_file(config_path).context("Failed to load configuration file")?;
    config.validate().context("Configuration validation failed")?;

    if config.listeners.is_empty() {
        warn!("No listeners configured; nothing to do");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let services = services(&config, shutdown_rx.clone())?;
    let listeners: Vec<Listener> = config
        .listeners
        .iter()
        .cloned()
        .map(Listener::new)
        .collect();

    // Hook every service into every listener before any listener starts
    // accepting. A conflict here is a configuration error and aborts startup.
    for service in &services {
        for listener in &listeners {
            service.apply(listener).with_context(|| {
                format!(
                    "Service {} rejected listener {}",
                    service.name(),
                    listener.config().id
                )
            })?;
        }
    }

    let mut tasks = Vec::with_capacity(listeners.len());
    let listeners: Vec<std::sync::Arc<Listener>> =
        listeners.into_iter().map(std::sync::Arc::new).collect();
    for listener in &listeners {
        let listener = std::sync::Arc::clone(listener);
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { listener.run(shutdown).await }));
    }

    info!("Drawbridge started with {} listener(s)", listeners.len());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    for service in &services {
        for listener in &listeners {
            if let Err(e) = service.forget(listener.as_ref()) {
                warn!(service = service.name(), error = %e, "Service cleanup failed");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Listener exited with error"),
            Err(e) => warn!(error = %e, "Listener task panicked"),
        }
    }

    info!("Drawbridge stopped");
    Ok(())
}
