//! Marketplace Escrow Node
//!
//! Opens the escrow engine, connects the notification transport and lifts
//! expired bans on an interval until Ctrl-C.

use anyhow::Context;
use chrono::Utc;
use message_bus::{NatsNotifier, Notifier, TracingNotifier};
use settlement::{Config, Marketplace, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting marketplace escrow node");

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading config from: {}", path);
            Config::from_file(&path).with_context(|| format!("loading {}", path))?
        }
        None => {
            info!("Loading config from environment variables");
            Config::from_env().context("loading config from environment")?
        }
    };

    let notifier: Arc<dyn Notifier> = match config.notifications.transport {
        Transport::Nats => Arc::new(
            NatsNotifier::connect(config.notifications.nats.clone())
                .await
                .context("connecting to NATS")?,
        ),
        Transport::Tracing => Arc::new(TracingNotifier),
    };

    let sweep_interval = Duration::from_secs(config.moderation.ban_sweep_interval_secs.max(1));
    let engine = Arc::new(Marketplace::open(config, notifier).context("opening engine")?);
    info!("Escrow engine ready");

    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let engine = Arc::clone(&engine);
                match tokio::task::spawn_blocking(move || engine.sweep_expired_bans(Utc::now())).await {
                    Ok(Ok(lifted)) if !lifted.is_empty() => info!(count = lifted.len(), "Ban sweep done"),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "Ban sweep failed"),
                    Err(e) => error!(error = %e, "Ban sweep task panicked"),
                }
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    info!("Shutting down marketplace escrow node");
    Ok(())
}
