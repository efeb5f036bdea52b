//! # Attend Server
//!
//! Binary wiring for the attendance ingestion engine.
//!
//! ## Environment
//! ```text
//! VERITIME_CONFIG   path to veritime.toml (optional; defaults apply)
//! VERITIME_DB       path to the SQLite database file (default: ./veritime.db)
//! RUST_LOG          tracing filter (default: info)
//! ```

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use veritime_db::{Database, DbConfig};
use veritime_sync::{
    Normalizer, PollingAgent, PushReceiver, ReceiverState, SyncConfig, VendorLink,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting attend-server...");

    // Load configuration
    let config = match std::env::var("VERITIME_CONFIG") {
        Ok(path) => SyncConfig::load(&path)?,
        Err(_) => {
            warn!("VERITIME_CONFIG not set; using built-in defaults");
            SyncConfig::default()
        }
    };

    // Open the database and run migrations
    let db_path = std::env::var("VERITIME_DB").unwrap_or_else(|_| "veritime.db".to_string());
    let db = Database::new(DbConfig::new(&db_path)).await?;
    info!(path = %db_path, "Database ready");

    // Reconcile config-declared devices into the registry
    reconcile_devices(&db, &config).await?;

    // Start the normalizer actor - the single canonical write path
    let (normalizer, normalizer_handle) = Normalizer::new(db.clone(), config.institution_id);
    tokio::spawn(normalizer.run());

    // Start the polling agent (one loop per poll-mode device)
    let link = Arc::new(VendorLink::new(config.vendor_link_config()));
    let agent = PollingAgent::new(
        db.clone(),
        link,
        normalizer_handle.clone(),
        config.poller_config(),
    );
    let agent_handle = agent.start().await?;
    info!(devices = agent_handle.device_count(), "Polling agent running");

    // Start the push receiver
    let receiver_state = Arc::new(ReceiverState {
        db: db.clone(),
        normalizer: normalizer_handle.clone(),
        institution_id: config.institution_id,
    });
    let receiver = PushReceiver::new(config.receiver_config(), receiver_state);
    let receiver_handle = receiver.start().await?;
    info!(addr = %receiver_handle.local_addr(), "Push receiver running");

    // Wait for shutdown
    shutdown_signal().await;

    // Orderly stop: producers first, then the serialization point
    agent_handle.shutdown().await;
    if let Err(e) = receiver_handle.shutdown().await {
        warn!(?e, "Receiver shutdown signal failed");
    }
    if let Err(e) = normalizer_handle.shutdown().await {
        warn!(?e, "Normalizer shutdown signal failed");
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Registers config-declared devices that are not in the registry yet.
///
/// Devices registered through the admin surface are left untouched;
/// the config file only ever adds.
async fn reconcile_devices(db: &Database, config: &SyncConfig) -> anyhow::Result<()> {
    for entry in &config.devices {
        if db.devices().find_by_serial(&entry.serial).await?.is_none() {
            db.devices()
                .register(
                    config.institution_id,
                    &entry.serial,
                    &entry.name,
                    entry.host.as_deref(),
                    entry.port,
                    entry.mode,
                )
                .await?;
            info!(serial = %entry.serial, mode = %entry.mode, "Registered device from config");
        }
    }
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
