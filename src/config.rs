//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The `[transfers]` table is optional; every field falls back to the
//! observed game constants.

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub transfers: TransfersConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// e.g. `sqlite://transfer_market.db`
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub settlement_interval_secs: u64,
    /// How often the day boundary is polled for the expiry scan.
    pub expiry_check_interval_secs: u64,
}

/// Game rules for listings and settlement.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransfersConfig {
    /// Starting price of a contract-expiry auction.
    pub expiry_starting_price: i64,
    pub expiry_window_hours: i64,
    /// Hard ceiling on squad size after a transfer lands.
    pub max_squad_size: i64,
    /// Outgoing listings ending within this many minutes count as
    /// vacated slots in the buyer's squad check.
    pub pending_departure_window_mins: i64,
    /// Daily wage of the contract written at settlement.
    pub signing_wage: i64,
    pub signing_contract_days: i64,
    /// Failed settlement passes tolerated before a listing is cancelled.
    pub max_settlement_attempts: i64,
}

impl Default for TransfersConfig {
    fn default() -> Self {
        Self {
            expiry_starting_price: 1,
            expiry_window_hours: 24,
            max_squad_size: 26,
            pending_departure_window_mins: 60,
            signing_wage: 100,
            signing_contract_days: 7,
            max_settlement_attempts: 3,
        }
    }
}

impl TransfersConfig {
    /// Window of a contract-expiry auction, `None` if not representable.
    pub fn expiry_window(&self) -> Option<Duration> {
        Duration::try_hours(self.expiry_window_hours)
    }

    pub fn pending_departure_window(&self) -> Option<Duration> {
        Duration::try_minutes(self.pending_departure_window_mins)
    }

    pub fn signing_contract(&self) -> Option<Duration> {
        Duration::try_days(self.signing_contract_days)
    }

    /// Reject rule values the engines cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.expiry_starting_price < 0 {
            bail!("expiry_starting_price must not be negative");
        }
        if self.expiry_window_hours <= 0 || self.expiry_window().is_none() {
            bail!("expiry_window_hours out of range: {}", self.expiry_window_hours);
        }
        if self.max_squad_size <= 0 {
            bail!("max_squad_size must be positive");
        }
        if self.pending_departure_window_mins < 0 || self.pending_departure_window().is_none() {
            bail!(
                "pending_departure_window_mins out of range: {}",
                self.pending_departure_window_mins
            );
        }
        if self.signing_wage < 0 {
            bail!("signing_wage must not be negative");
        }
        if self.signing_contract_days <= 0 || self.signing_contract().is_none() {
            bail!("signing_contract_days out of range: {}", self.signing_contract_days);
        }
        if self.max_settlement_attempts <= 0 {
            bail!("max_settlement_attempts must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config
            .transfers
            .validate()
            .with_context(|| format!("Invalid [transfers] table in {path}"))?;
        Ok(config)
    }
}
