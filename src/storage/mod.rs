//! Persistence layer.
//!
//! The ingestion core only needs three things from storage: resolve a zone
//! code, resolve a currency code, and upsert a batch of spot prices in one
//! transaction. Those live behind `PriceStore`; `SqlitePriceStore` is the
//! sqlx-backed implementation used by the binary and the tests.

pub mod sqlite;

use async_trait::async_trait;

use crate::types::{Currency, IngestError, SpotPriceRecord, Zone};

pub use sqlite::{SqlitePriceStore, StoredSpotPrice};

/// Storage collaborator consumed by market adapters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Look up a zone by code. Fails with `ZoneNotFound` if unknown.
    async fn find_zone(&self, code: &str) -> Result<Zone, IngestError>;

    /// Look up a currency by code. Fails with `CurrencyNotFound` if unknown.
    async fn find_currency(&self, code: &str) -> Result<Currency, IngestError>;

    /// Insert or update all records in a single transaction.
    ///
    /// Existing rows are only touched when the price differs. Returns the
    /// number of rows inserted or changed; any failure rolls back the batch.
    async fn upsert_spot_prices(&self, records: &[SpotPriceRecord]) -> Result<u64, IngestError>;
}
