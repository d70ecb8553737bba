//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! `DATABASE_URL` in the environment (or `.env`) overrides the file.

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::fs;
use std::str::FromStr;

use crate::providers::nordpool;
use crate::types::ProviderConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub currencies: Vec<CurrencyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    pub nordpool: NordPoolConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NordPoolConfig {
    #[serde(flatten)]
    pub provider: ProviderConfig,
    #[serde(default = "default_nordpool_url")]
    pub base_url: String,
}

/// Reference zone seeded into the store at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct ZoneConfig {
    pub code: String,
    pub name: String,
    /// IANA timezone, e.g. "Europe/Oslo".
    pub timezone: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CurrencyConfig {
    pub code: String,
    pub name: String,
}

fn default_nordpool_url() -> String {
    nordpool::DEFAULT_BASE_URL.to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Database URL, with `DATABASE_URL` taking precedence over the file.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }

    /// Cross-check provider capabilities against the seeded reference data.
    pub fn validate(&self) -> Result<()> {
        for zone in &self.zones {
            if Tz::from_str(&zone.timezone).is_err() {
                bail!("Zone {} has unknown timezone {:?}", zone.code, zone.timezone);
            }
        }

        let provider = &self.providers.nordpool.provider;
        for code in &provider.supported_zones {
            if !self.zones.iter().any(|z| &z.code == code) {
                bail!("Provider zone {code} has no [[zones]] entry");
            }
        }
        for code in &provider.supported_currencies {
            if !self.currencies.iter().any(|c| &c.code == code) {
                bail!("Provider currency {code} has no [[currencies]] entry");
            }
        }
        Ok(())
    }
}
