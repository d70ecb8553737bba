//! SQLite implementation of `PriceStore`.
//!
//! Prices are stored as normalized decimal text so that equal values always
//! compare equal in SQL, which is what makes the no-op upsert work.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::PriceStore;
use crate::types::{Currency, IngestError, SpotPriceRecord, Zone};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS zones (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        timezone TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS currencies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS spot_prices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        zone_id INTEGER NOT NULL REFERENCES zones(id),
        currency_id INTEGER NOT NULL REFERENCES currencies(id),
        price TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (timestamp, zone_id, currency_id)
    )",
];

const UPSERT_SPOT_PRICE: &str = "
    INSERT INTO spot_prices (timestamp, zone_id, currency_id, price, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT (timestamp, zone_id, currency_id) DO UPDATE SET
        price = excluded.price,
        updated_at = excluded.updated_at
    WHERE spot_prices.price <> excluded.price";

/// A spot price row as read back from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSpotPrice {
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SqlitePriceStore {
    pool: SqlitePool,
}

impl SqlitePriceStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self, IngestError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(url, "Connected to price database");
        Ok(store)
    }

    /// A private in-memory database. One pinned connection, since every
    /// SQLite `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self, IngestError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<(), IngestError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert a zone or refresh its name/timezone. Returns the zone id.
    pub async fn upsert_zone(
        &self,
        code: &str,
        name: &str,
        timezone: &str,
    ) -> Result<i64, IngestError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO zones (code, name, timezone) VALUES (?, ?, ?)
             ON CONFLICT (code) DO UPDATE SET name = excluded.name, timezone = excluded.timezone
             RETURNING id",
        )
        .bind(code)
        .bind(name)
        .bind(timezone)
        .fetch_one(&self.pool)
        .await?;
        debug!(code, id, timezone, "Zone registered");
        Ok(id)
    }

    /// Insert a currency or refresh its name. Returns the currency id.
    pub async fn upsert_currency(&self, code: &str, name: &str) -> Result<i64, IngestError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO currencies (code, name) VALUES (?, ?)
             ON CONFLICT (code) DO UPDATE SET name = excluded.name
             RETURNING id",
        )
        .bind(code)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        debug!(code, id, "Currency registered");
        Ok(id)
    }

    pub async fn count_spot_prices(&self) -> Result<i64, IngestError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM spot_prices")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn fetch_spot_price(
        &self,
        timestamp: NaiveDateTime,
        zone_id: i64,
        currency_id: i64,
    ) -> Result<Option<StoredSpotPrice>, IngestError> {
        let row: Option<(String, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT price, created_at, updated_at FROM spot_prices
             WHERE timestamp = ? AND zone_id = ? AND currency_id = ?",
        )
        .bind(timestamp)
        .bind(zone_id)
        .bind(currency_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(price, created_at, updated_at)| -> Result<_, IngestError> {
            let price = Decimal::from_str(&price).map_err(|_| IngestError::InvalidPrice(price))?;
            Ok(StoredSpotPrice {
                price,
                created_at,
                updated_at,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl PriceStore for SqlitePriceStore {
    async fn find_zone(&self, code: &str) -> Result<Zone, IngestError> {
        let row: Option<(i64, String, String, String)> =
            sqlx::query_as("SELECT id, code, name, timezone FROM zones WHERE code = ?")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        let (id, code, name, timezone) =
            row.ok_or_else(|| IngestError::ZoneNotFound(code.to_string()))?;
        Ok(Zone {
            id,
            code,
            name,
            timezone,
        })
    }

    async fn find_currency(&self, code: &str) -> Result<Currency, IngestError> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, code, name FROM currencies WHERE code = ?")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        let (id, code, name) = row.ok_or_else(|| IngestError::CurrencyNotFound(code.to_string()))?;
        Ok(Currency { id, code, name })
    }

    async fn upsert_spot_prices(&self, records: &[SpotPriceRecord]) -> Result<u64, IngestError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut changed = 0u64;

        // Early return drops `tx`, which rolls the batch back.
        for record in records {
            let result = sqlx::query(UPSERT_SPOT_PRICE)
                .bind(record.timestamp)
                .bind(record.zone_id)
                .bind(record.currency_id)
                .bind(record.price.normalize().to_string())
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            changed += result.rows_affected();
        }

        tx.commit().await?;
        debug!(records = records.len(), changed, "Spot prices upserted");
        Ok(changed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
