//! Nord Pool day-ahead price provider.
//!
//! Fetches hourly day-ahead prices per (date, zone, currency), converts
//! them to storage units and upserts them in one transaction per fetch.
//!
//! API: `https://dataportal-api.nordpoolgroup.com/api/DayAheadPrices`
//! Query: `market=DayAhead&deliveryArea=SE3&currency=EUR&date=2025-01-15`
//! Auth: None required.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ensure_supported, pace, Provider};
use crate::storage::PriceStore;
use crate::types::{IngestError, ProviderConfig, RunOptions, SpotPriceRecord, Zone};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://dataportal-api.nordpoolgroup.com/api/DayAheadPrices";
pub const PROVIDER_NAME: &str = "nordpool";

/// Pause before every upstream call.
const REQUEST_DELAY: Duration = Duration::from_secs(1);

/// Upstream quotes per MWh; storage is per kWh in minor units, i.e. `/ 10`.
const PRICE_DIVISOR: Decimal = Decimal::TEN;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAheadResponse {
    #[serde(default, rename = "deliveryDateCET")]
    pub delivery_date_cet: String,
    #[serde(default)]
    pub multi_area_entries: Vec<DayAheadEntry>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub exchange_rate: f64,
}

/// One delivery period (usually an hour) with a price per delivery area.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAheadEntry {
    pub delivery_start: DateTime<Utc>,
    pub delivery_end: DateTime<Utc>,
    #[serde(default)]
    pub entry_per_area: HashMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Convert one raw upstream price into storage units.
pub fn convert_price(raw: f64) -> Result<Decimal, IngestError> {
    // Go through the shortest decimal rendering so 45.67 stays 45.67.
    let value = Decimal::from_str(&raw.to_string())
        .map_err(|_| IngestError::InvalidPrice(raw.to_string()))?;
    Ok(value / PRICE_DIVISOR)
}

/// Build storage records for `zone`, with timestamps in the zone's local
/// wall-clock time. Fails if any entry lacks a price for the zone.
pub fn to_spot_prices(
    entries: &[DayAheadEntry],
    zone: &Zone,
    currency_id: i64,
) -> Result<Vec<SpotPriceRecord>, IngestError> {
    let tz = Tz::from_str(&zone.timezone).map_err(|_| IngestError::InvalidTimezone {
        zone: zone.code.clone(),
        timezone: zone.timezone.clone(),
    })?;

    entries
        .iter()
        .map(|entry| {
            let raw = entry
                .entry_per_area
                .get(&zone.code)
                .ok_or_else(|| IngestError::MissingZonePrice(zone.code.clone()))?;
            Ok(SpotPriceRecord {
                timestamp: entry.delivery_start.with_timezone(&tz).naive_local(),
                zone_id: zone.id,
                currency_id,
                price: convert_price(*raw)?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct NordPoolProvider {
    name: String,
    config: ProviderConfig,
    store: Arc<dyn PriceStore>,
    http: Client,
    base_url: String,
    request_delay: Duration,
}

impl NordPoolProvider {
    pub fn new(
        name: &str,
        config: ProviderConfig,
        store: Arc<dyn PriceStore>,
        base_url: &str,
    ) -> Result<Self, IngestError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("dayahead/0.1.0")
            .build()?;

        Ok(Self {
            name: name.to_string(),
            config,
            store,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_delay: REQUEST_DELAY,
        })
    }

    /// Override the pause before each upstream call.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    async fn fetch(&self, opts: &RunOptions) -> Result<DayAheadResponse, IngestError> {
        let date = opts.date.format("%Y-%m-%d").to_string();
        debug!(url = %self.base_url, date = %date, zone = %opts.zone, currency = %opts.currency, "Fetching day-ahead prices");

        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("market", "DayAhead"),
                ("deliveryArea", opts.zone.as_str()),
                ("currency", opts.currency.as_str()),
                ("date", date.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::Upstream { status, body });
        }

        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| IngestError::Decode(e.to_string()))
    }

    async fn store_prices(
        &self,
        opts: &RunOptions,
        response: &DayAheadResponse,
    ) -> Result<u64, IngestError> {
        let zone = self.store.find_zone(&opts.zone).await?;
        let currency = self.store.find_currency(&opts.currency).await?;

        let records = to_spot_prices(&response.multi_area_entries, &zone, currency.id)?;
        if records.is_empty() {
            warn!(provider = %self.name, run = %opts, "Upstream returned no entries");
        }

        self.store.upsert_spot_prices(&records).await
    }

    async fn fetch_and_store(&self, opts: &RunOptions) -> Result<(), IngestError> {
        let response = self.fetch(opts).await?;
        let changed = self.store_prices(opts, &response).await?;

        info!(
            provider = %self.name,
            date = %opts.date,
            zone = %opts.zone,
            currency = %opts.currency,
            entries = response.multi_area_entries.len(),
            changed,
            "Day-ahead prices stored"
        );
        Ok(())
    }
}

#[async_trait]
impl Provider for NordPoolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<(), IngestError> {
        let date = Utc::now().date_naive() + ChronoDuration::days(1);
        info!(
            provider = %self.name,
            date = %date,
            zones = self.config.supported_zones.len(),
            currencies = self.config.supported_currencies.len(),
            "Starting scheduled run"
        );

        for zone in &self.config.supported_zones {
            for currency in &self.config.supported_currencies {
                pace(cancel, self.request_delay).await?;
                self.fetch_and_store(&RunOptions::new(date, zone, currency))
                    .await?;
            }
        }
        Ok(())
    }

    async fn run_with_options(
        &self,
        cancel: &CancellationToken,
        opts: &RunOptions,
    ) -> Result<(), IngestError> {
        ensure_supported(self, &opts.zone, &opts.currency)?;
        pace(cancel, self.request_delay).await?;
        self.fetch_and_store(opts).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
