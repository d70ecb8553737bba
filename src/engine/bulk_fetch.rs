//! Bulk fetch orchestrator.
//!
//! Turns an admin "backfill this date range" request into a sequence of
//! targeted runs through the manager. Validation happens up front on the
//! request path; execution happens on a detached task that logs and skips
//! failed combinations.
//!
//! The task is fire-and-forget: no job id, no progress record, no way to
//! cancel or join it. A shutdown mid-run abandons the remaining work.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::manager::ProviderManager;
use crate::providers::Provider;
use crate::types::{IngestError, RunOptions};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Longest accepted span between start and end.
pub const MAX_RANGE_DAYS: i64 = 14;

/// Pause between successive combinations.
pub const COMBINATION_DELAY: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Request / plan
// ---------------------------------------------------------------------------

/// Admin request body. Empty `zones`/`currencies` mean "everything the
/// provider supports".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkFetchRequest {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub currencies: Vec<String>,
}

/// A validated request, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFetchPlan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub zones: Vec<String>,
    pub currencies: Vec<String>,
}

impl BulkFetchRequest {
    /// Check the date range and resolve zones/currencies against the provider.
    pub fn validate(&self, provider: &dyn Provider) -> Result<BulkFetchPlan, IngestError> {
        if self.end_date < self.start_date {
            return Err(IngestError::InvalidDateRange(
                "end_date is before start_date".to_string(),
            ));
        }
        if self.end_date - self.start_date > ChronoDuration::days(MAX_RANGE_DAYS) {
            return Err(IngestError::InvalidDateRange(format!(
                "range exceeds {MAX_RANGE_DAYS} days"
            )));
        }

        let config = provider.config();
        let zones = if self.zones.is_empty() {
            config.supported_zones.iter().cloned().collect()
        } else {
            self.zones.clone()
        };
        let currencies = if self.currencies.is_empty() {
            config.supported_currencies.iter().cloned().collect()
        } else {
            self.currencies.clone()
        };

        if let Some(zone) = zones.iter().find(|z| !provider.supports_zone(z)) {
            return Err(IngestError::UnsupportedZone {
                provider: provider.name().to_string(),
                zone: zone.clone(),
            });
        }
        if let Some(currency) = currencies.iter().find(|c| !provider.supports_currency(c)) {
            return Err(IngestError::UnsupportedCurrency {
                provider: provider.name().to_string(),
                currency: currency.clone(),
            });
        }

        Ok(BulkFetchPlan {
            start: self.start_date.date_naive(),
            end: self.end_date.date_naive(),
            zones,
            currencies,
        })
    }
}

impl BulkFetchPlan {
    /// Every (date, zone, currency) tuple: dates ascending, then zones, then
    /// currencies.
    pub fn combinations(&self) -> Vec<RunOptions> {
        let mut out = Vec::new();
        let mut date = self.start;
        while date <= self.end {
            for zone in &self.zones {
                for currency in &self.currencies {
                    out.push(RunOptions::new(date, zone, currency));
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        let days = (self.end - self.start).num_days() + 1;
        days.max(0) as usize * self.zones.len() * self.currencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Outcome counts for one orchestrator run. Only ever logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkFetchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Walk the plan sequentially, waiting `delay` between combinations.
/// Failures are logged and skipped.
pub async fn execute(
    manager: Arc<ProviderManager>,
    provider: String,
    plan: BulkFetchPlan,
    delay: Duration,
) -> BulkFetchSummary {
    let started = Instant::now();
    // Detached from any request: nothing ever cancels this token.
    let cancel = CancellationToken::new();
    let mut summary = BulkFetchSummary::default();

    info!(
        provider = %provider,
        start = %plan.start,
        end = %plan.end,
        combinations = plan.len(),
        "Bulk fetch started"
    );

    for (i, opts) in plan.combinations().iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(delay).await;
        }

        summary.attempted += 1;
        match manager.run_provider(&cancel, &provider, Some(opts)).await {
            Ok(()) => summary.succeeded += 1,
            Err(e) => {
                summary.failed += 1;
                error!(provider = %provider, run = %opts, error = %e, "Bulk fetch combination failed");
            }
        }
    }

    info!(
        provider = %provider,
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        failed = summary.failed,
        elapsed_secs = started.elapsed().as_secs(),
        "Bulk fetch finished"
    );
    summary
}

/// Launch `execute` on a detached task. The handle is dropped on purpose.
pub fn spawn_bulk_fetch(
    manager: Arc<ProviderManager>,
    provider: &str,
    plan: BulkFetchPlan,
    delay: Duration,
) {
    let provider = provider.to_string();
    tokio::spawn(execute(manager, provider, plan, delay));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
