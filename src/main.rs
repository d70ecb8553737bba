//! Day-ahead price ingestion service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the price database, registers providers, serves the admin API
//! and runs the cron scheduler until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dayahead::admin::{self, AdminState};
use dayahead::config::{self, AppConfig};
use dayahead::engine::ProviderManager;
use dayahead::providers::nordpool::{NordPoolProvider, PROVIDER_NAME};
use dayahead::storage::SqlitePriceStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("DAYAHEAD_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();
    info!(config = %config_path, port = cfg.server.port, "dayahead starting up");

    // -- Storage ---------------------------------------------------------

    let store = Arc::new(
        SqlitePriceStore::connect(&cfg.database_url())
            .await
            .context("Failed to open price database")?,
    );
    seed_reference_data(&store, &cfg).await?;

    // -- Providers -------------------------------------------------------

    let mut manager = ProviderManager::new();
    let nordpool = NordPoolProvider::new(
        PROVIDER_NAME,
        cfg.providers.nordpool.provider.clone(),
        store.clone(),
        &cfg.providers.nordpool.base_url,
    )
    .context("Failed to initialise Nord Pool provider")?;
    manager.register_provider(Arc::new(nordpool));
    let manager = Arc::new(manager);

    // -- Run -------------------------------------------------------------

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received.");
            cancel.cancel();
        });
    }

    let state = Arc::new(AdminState::new(manager.clone(), cancel.clone()));
    let server = tokio::spawn(admin::serve(state, cfg.server.port, cancel.clone()));

    info!("Starting scheduler. Press Ctrl+C to stop.");
    let scheduled = manager.start_scheduler(cancel.clone()).await;
    if let Err(e) = &scheduled {
        error!(error = %e, "Scheduler failed to start");
    }

    // Either way, take the admin API down with the scheduler.
    cancel.cancel();
    server.await.context("Admin server task panicked")??;
    scheduled.context("Scheduler error")?;

    info!("dayahead shut down cleanly.");
    Ok(())
}

/// Make sure every configured zone and currency exists in the store.
async fn seed_reference_data(store: &SqlitePriceStore, cfg: &AppConfig) -> Result<()> {
    for zone in &cfg.zones {
        store
            .upsert_zone(&zone.code, &zone.name, &zone.timezone)
            .await
            .with_context(|| format!("Failed to seed zone {}", zone.code))?;
    }
    for currency in &cfg.currencies {
        store
            .upsert_currency(&currency.code, &currency.name)
            .await
            .with_context(|| format!("Failed to seed currency {}", currency.code))?;
    }
    info!(
        zones = cfg.zones.len(),
        currencies = cfg.currencies.len(),
        "Reference data seeded"
    );
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dayahead=info"));

    let json_logging = std::env::var("DAYAHEAD_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
