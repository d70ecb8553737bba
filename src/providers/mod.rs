//! Market-data providers.
//!
//! Defines the `Provider` trait, the capability-set contract every market
//! source implements, and the small helpers shared by implementations:
//! - `nordpool`: Nord Pool day-ahead prices

pub mod nordpool;

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::types::{IngestError, ProviderConfig, RunOptions};

/// Abstraction over external market-data sources.
///
/// Implementors fetch, normalize and persist data for their upstream.
/// `run` is the scheduled behaviour; `run_with_options` fetches exactly one
/// (date, zone, currency) tuple.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique name used for registry lookup and logging.
    fn name(&self) -> &str;

    fn config(&self) -> &ProviderConfig;

    fn supports_zone(&self, zone: &str) -> bool {
        self.config().supports_zone(zone)
    }

    fn supports_currency(&self, currency: &str) -> bool {
        self.config().supports_currency(currency)
    }

    /// Default run over the provider's whole zone × currency matrix.
    async fn run(&self, cancel: &CancellationToken) -> Result<(), IngestError>;

    /// Targeted run for a single tuple.
    async fn run_with_options(
        &self,
        cancel: &CancellationToken,
        opts: &RunOptions,
    ) -> Result<(), IngestError>;
}

/// Fail with a capability error unless the provider supports both codes.
pub fn ensure_supported(
    provider: &dyn Provider,
    zone: &str,
    currency: &str,
) -> Result<(), IngestError> {
    if !provider.supports_zone(zone) {
        return Err(IngestError::UnsupportedZone {
            provider: provider.name().to_string(),
            zone: zone.to_string(),
        });
    }
    if !provider.supports_currency(currency) {
        return Err(IngestError::UnsupportedCurrency {
            provider: provider.name().to_string(),
            currency: currency.to_string(),
        });
    }
    Ok(())
}

/// Sleep for `delay` unless `cancel` fires first.
pub async fn pace(cancel: &CancellationToken, delay: Duration) -> Result<(), IngestError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
