//! Configuration loading from TOML.
//!
//! Reads `config.toml` (or the file named by `LEAPFROG_CONFIG`) and
//! deserializes into strongly-typed structs. Every section has defaults, so
//! a config file only needs what it changes.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::scalper::ScalpConfig;
use crate::strategy::{FeeModel, FeeStructure, ScorerConfig};

/// Env var that overrides the config file path.
pub const CONFIG_ENV: &str = "LEAPFROG_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub leap: LeapConfig,
    pub scalp: ScalpSettings,
    pub cash: CashConfig,
    pub venues: Vec<VenueConfig>,
    pub fees: Vec<FeeStructure>,
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub tick_interval_secs: u64,
    pub snapshot_timeout_secs: u64,
    pub state_file: String,
    pub dry_run: bool,
    pub dust_threshold: Decimal,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "LEAPFROG-001".into(),
            tick_interval_secs: 60,
            snapshot_timeout_secs: 15,
            state_file: crate::storage::DEFAULT_STATE_FILE.into(),
            dry_run: false,
            dust_threshold: crate::types::DEFAULT_DUST_THRESHOLD,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LeapConfig {
    pub breadcrumb_fraction: Decimal,
    pub safety_margin_pct: Decimal,
    pub min_volume_24h: Decimal,
    pub min_dip_advantage_pct: Decimal,
    pub ambiguity_band_pct: Decimal,
    pub max_leaps_per_cycle: u32,
}

impl Default for LeapConfig {
    fn default() -> Self {
        let scorer = ScorerConfig::default();
        Self {
            breadcrumb_fraction: scorer.breadcrumb_fraction,
            safety_margin_pct: scorer.safety_margin_pct,
            min_volume_24h: scorer.min_volume_24h,
            min_dip_advantage_pct: scorer.min_dip_advantage_pct,
            ambiguity_band_pct: scorer.ambiguity_band_pct,
            max_leaps_per_cycle: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScalpSettings {
    pub enabled: bool,
    pub min_profit_pct: Decimal,
    pub harvest_fraction: Decimal,
}

impl Default for ScalpSettings {
    fn default() -> Self {
        let scalp = ScalpConfig::default();
        Self {
            enabled: true,
            min_profit_pct: scalp.min_profit_pct,
            harvest_fraction: scalp.harvest_fraction,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CashConfig {
    /// Symbol the ledger's cash is denominated in.
    pub symbol: String,
    pub exchange: String,
    /// Balances in these assets fold into cash.
    pub symbols: Vec<String>,
}

impl Default for CashConfig {
    fn default() -> Self {
        Self {
            symbol: "USD".into(),
            exchange: "binance".into(),
            symbols: vec!["USD".into(), "USDT".into(), "USDC".into()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenueConfig {
    pub exchange: String,
    /// JSON file of `asset -> quantity` refreshed by an external fetcher.
    pub balances_file: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    pub snapshot_file: String,
    pub trade_history_file: Option<String>,
    pub average_cost_file: Option<String>,
    pub balance_cache_file: Option<String>,
    pub venue_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            snapshot_file: "data/snapshot.json".into(),
            trade_history_file: None,
            average_cost_file: None,
            balance_cache_file: Some("data/balance_cache.json".into()),
            venue_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// `LEAPFROG_CONFIG` if set, else `config.toml`.
    pub fn path_from_env() -> String {
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string())
    }

    /// Range checks serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let leap = &self.leap;
        if leap.breadcrumb_fraction < Decimal::ZERO || leap.breadcrumb_fraction >= Decimal::ONE {
            bail!("leap.breadcrumb_fraction must be in [0, 1), got {}", leap.breadcrumb_fraction);
        }
        if leap.safety_margin_pct < Decimal::ZERO {
            bail!("leap.safety_margin_pct must be non-negative");
        }
        if leap.min_volume_24h < Decimal::ZERO {
            bail!("leap.min_volume_24h must be non-negative");
        }
        if leap.min_dip_advantage_pct < Decimal::ZERO || leap.ambiguity_band_pct < Decimal::ZERO {
            bail!("leap.min_dip_advantage_pct and leap.ambiguity_band_pct must be non-negative");
        }

        let scalp = &self.scalp;
        if scalp.harvest_fraction <= Decimal::ZERO || scalp.harvest_fraction > Decimal::ONE {
            bail!("scalp.harvest_fraction must be in (0, 1], got {}", scalp.harvest_fraction);
        }
        if scalp.min_profit_pct < Decimal::ZERO {
            bail!("scalp.min_profit_pct must be non-negative");
        }

        if self.agent.tick_interval_secs == 0 {
            bail!("agent.tick_interval_secs must be at least 1");
        }
        if self.agent.dust_threshold < Decimal::ZERO {
            bail!("agent.dust_threshold must be non-negative");
        }

        for fee in &self.fees {
            let rates = [fee.maker_fee, fee.taker_fee, fee.slippage_estimate];
            if rates.iter().any(|r| *r < Decimal::ZERO || *r >= dec!(0.1)) {
                bail!("fees for {} must be fractions in [0, 0.1)", fee.exchange);
            }
            if fee.min_trade_size < Decimal::ZERO {
                bail!("fees.min_trade_size for {} must be non-negative", fee.exchange);
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for venue in &self.venues {
            if !seen.insert(venue.exchange.to_lowercase()) {
                bail!("venue {} configured twice", venue.exchange);
            }
        }
        Ok(())
    }

    pub fn scorer_config(&self) -> ScorerConfig {
        ScorerConfig {
            breadcrumb_fraction: self.leap.breadcrumb_fraction,
            safety_margin_pct: self.leap.safety_margin_pct,
            min_volume_24h: self.leap.min_volume_24h,
            min_dip_advantage_pct: self.leap.min_dip_advantage_pct,
            ambiguity_band_pct: self.leap.ambiguity_band_pct,
            cash_symbols: self.cash_symbols(),
        }
    }

    pub fn scalp_config(&self) -> ScalpConfig {
        ScalpConfig {
            min_profit_pct: self.scalp.min_profit_pct,
            harvest_fraction: self.scalp.harvest_fraction,
        }
    }

    /// Configured fee schedules, or the built-in ones when none are given.
    pub fn fee_model(&self) -> FeeModel {
        if self.fees.is_empty() {
            FeeModel::default()
        } else {
            FeeModel::new(self.fees.clone())
        }
    }

    pub fn cash_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.cash.symbols.iter().map(|s| s.to_uppercase()).collect();
        let own = self.cash.symbol.to_uppercase();
        if !symbols.contains(&own) {
            symbols.push(own);
        }
        symbols
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.agent.tick_interval_secs)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.snapshot_timeout_secs)
    }

    pub fn venue_timeout(&self) -> Duration {
        Duration::from_secs(self.sources.venue_timeout_secs)
    }
}
