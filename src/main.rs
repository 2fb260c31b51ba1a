use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod catalog;
mod catalog_push;
mod config;
mod discord;
mod models;
mod monitor;
mod server;
mod store;
mod storefront;
mod traits;
mod transport;

use catalog::SharedCatalog;
use catalog_push::CatalogPush;
use config::Config;
use discord::DiscordNotifier;
use monitor::{Monitor, MonitorSettings};
use server::ServerState;
use store::ProductStore;
use storefront::StorefrontClient;
use traits::Notifier;
use transport::StealthClient;

/// Upper bound on waiting for an in-flight poll step after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("Initializing...");

    let config = Config::load().context("failed to load configuration")?;
    info!("Loaded config: {:?}", config);

    let http = StealthClient::new()?;
    let catalog = SharedCatalog::new();
    let store = ProductStore::new(config.products_file.clone());

    let discord = DiscordNotifier::new(
        http.clone(),
        config.discord_webhook_url.clone(),
        config.home_url.clone(),
    );
    info!(
        enabled = discord.is_enabled(),
        "Discord notifications configured"
    );

    let notifiers: Vec<Arc<dyn Notifier>> = vec![
        Arc::new(discord),
        Arc::new(CatalogPush::new(
            http.clone(),
            config.catalog_push_url.clone(),
            config.jwt.clone(),
        )),
    ];

    let monitor = Monitor::new(
        StorefrontClient::new(http, config.home_url.clone()),
        store.clone(),
        catalog.clone(),
        notifiers,
        MonitorSettings {
            save_batch_size: config.save_batch_size,
            ..MonitorSettings::default()
        },
    );
    monitor.load_known_products().await;
    info!(
        path = %store.path().display(),
        "Tracking {} known products",
        catalog.len().await
    );

    let shutdown = CancellationToken::new();

    let mut monitor_task = tokio::spawn({
        let monitor = monitor.clone();
        let shutdown = shutdown.clone();
        async move { monitor.run(shutdown).await }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("Received shutdown signal");
            shutdown.cancel();
        }
    });

    if config.server_enabled {
        let server = server::start(
            ServerState::new(catalog, config.sse_heartbeat()),
            config.port,
        )
        .with_context(|| format!("failed to bind query server on port {}", config.port))?;
        let handle = server.handle();

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!(error = %e, "Query server stopped unexpectedly");
                }
                shutdown.cancel();
            }
            () = shutdown.cancelled() => {
                handle.stop(true).await;
            }
        }
    } else {
        shutdown.cancelled().await;
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, &mut monitor_task)
        .await
        .is_err()
    {
        warn!("Monitor did not stop in time, aborting it");
        monitor_task.abort();
        let _ = monitor_task.await;
    }

    if let Err(e) = monitor.persist().await {
        error!(error = %e, "Failed to save products during shutdown");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}
