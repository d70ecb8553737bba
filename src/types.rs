//! Shared types for the ingestion service.
//!
//! Provider configuration, run requests, the persisted price record and
//! the domain error enum. Kept free of I/O so the provider, storage and
//! engine modules can all depend on it.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Provider configuration
// ---------------------------------------------------------------------------

/// Per-provider configuration, fixed for the lifetime of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// 5-field cron expression (minute hour day-of-month month day-of-week).
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub enabled: bool,
    /// Zone codes this provider can fetch, e.g. "SE3".
    #[serde(default, rename = "zones")]
    pub supported_zones: BTreeSet<String>,
    /// Currency codes this provider can fetch, e.g. "EUR".
    #[serde(default, rename = "currencies")]
    pub supported_currencies: BTreeSet<String>,
}

impl ProviderConfig {
    pub fn new<Z, C>(schedule: &str, enabled: bool, zones: Z, currencies: C) -> Self
    where
        Z: IntoIterator,
        Z::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            schedule: schedule.to_string(),
            enabled,
            supported_zones: zones.into_iter().map(Into::into).collect(),
            supported_currencies: currencies.into_iter().map(Into::into).collect(),
        }
    }

    pub fn supports_zone(&self, zone: &str) -> bool {
        self.supported_zones.contains(zone)
    }

    pub fn supports_currency(&self, currency: &str) -> bool {
        self.supported_currencies.contains(currency)
    }
}

// ---------------------------------------------------------------------------
// Run options
// ---------------------------------------------------------------------------

/// A targeted execution: one delivery date, one zone, one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub date: NaiveDate,
    pub zone: String,
    pub currency: String,
}

impl RunOptions {
    pub fn new(date: NaiveDate, zone: &str, currency: &str) -> Self {
        Self {
            date,
            zone: zone.to_string(),
            currency: currency.to_string(),
        }
    }
}

impl fmt::Display for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.date, self.zone, self.currency)
    }
}

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// A delivery zone as known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Zone {
    pub id: i64,
    pub code: String,
    pub name: String,
    /// IANA timezone name, e.g. "Europe/Stockholm".
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Currency {
    pub id: i64,
    pub code: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Spot prices
// ---------------------------------------------------------------------------

/// One persisted price point. Unique per `(timestamp, zone_id, currency_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotPriceRecord {
    /// Delivery start in the zone's local wall-clock time (no offset).
    pub timestamp: NaiveDateTime,
    pub zone_id: i64,
    pub currency_id: i64,
    pub price: Decimal,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by providers, the manager, the store and the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Provider disabled: {0}")]
    ProviderDisabled(String),

    #[error("Unsupported zone {zone} for provider {provider}")]
    UnsupportedZone { provider: String, zone: String },

    #[error("Unsupported currency {currency} for provider {provider}")]
    UnsupportedCurrency { provider: String, currency: String },

    #[error("Provider {0} is enabled but has no schedule")]
    MissingSchedule(String),

    #[error("Invalid schedule {schedule:?} for provider {provider}: {reason}")]
    InvalidSchedule {
        provider: String,
        schedule: String,
        reason: String,
    },

    #[error("Scheduler already started")]
    SchedulerAlreadyStarted,

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream API error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Failed to decode upstream response: {0}")]
    Decode(String),

    #[error("No price found for zone {0}")]
    MissingZonePrice(String),

    #[error("Invalid price {0}")]
    InvalidPrice(String),

    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    #[error("Currency not found: {0}")]
    CurrencyNotFound(String),

    #[error("Invalid timezone {timezone:?} for zone {zone}")]
    InvalidTimezone { zone: String, timezone: String },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
