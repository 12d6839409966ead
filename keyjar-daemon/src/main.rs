//! keyjar daemon - SSH certificate broker
//!
//! Builds the broker from flags, keeps the session store swept and runs
//! until interrupted.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use keyjar_auth::cert::CaKey;
use keyjar_auth::clock::SystemClock;
use keyjar_auth::entropy::SharedRng;
use keyjar_daemon::{spawn_reaper, BrokerConfig, Flags};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

/// keyjar daemon - short-lived SSH certificates behind an identity provider
#[derive(Parser)]
#[command(name = "keyjar-daemon", version, about)]
struct Cli {
    #[command(flatten)]
    flags: Flags,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker (default if no command given)
    Serve,

    /// Print the CA public key in authorized-key form
    CaPublicKey,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => cmd_serve(cli.flags).await,
        Commands::CaPublicKey => cmd_ca_public_key(&cli.flags.ca),
    }
}

fn cmd_ca_public_key(path: &Path) -> anyhow::Result<()> {
    let pem = Zeroizing::new(
        std::fs::read(path).with_context(|| format!("reading CA key {}", path.display()))?,
    );
    let ca = CaKey::from_openssh(&pem).context("loading CA key")?;
    print!("{}", ca.authorized_key());
    Ok(())
}

/// Start the broker.
async fn cmd_serve(flags: Flags) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let broker = flags
        .apply(BrokerConfig::default())
        .and_then(|config| config.build(SharedRng::os(), Arc::new(SystemClock)))
        .context("invalid broker configuration")?;

    tracing::info!(
        broker_key = %broker.public_key().fingerprint(),
        auth_url = %broker.auth_url(),
        time_limit_secs = broker.time_limit().num_seconds(),
        cert_validity_secs = broker.cert_validity().num_seconds(),
        principals = ?broker.principals().as_slice(),
        "Broker initialized"
    );
    tracing::info!(ca = %broker.ca_public_key().trim_end(), "CA public key");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reaper = spawn_reaper(
        broker.store(),
        broker.stats().clone(),
        flags.sweep_interval,
        shutdown_rx,
    );

    wait_for_signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = reaper.await {
        tracing::error!(error = %e, "Reaper did not shut down cleanly");
    }

    let stats = broker.stats().snapshot();
    tracing::info!(
        started = stats.sessions_started,
        completed = stats.completed,
        rejected = stats.rejected(),
        expired = stats.expired,
        "Broker shutdown complete"
    );
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
