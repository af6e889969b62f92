//! File-backed and in-memory sources.
//!
//! The binary reads snapshots and balances that an external fetcher drops
//! on disk; tests and demos use the static variants.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::{BalanceSource, MarketDataSource};
use crate::types::MarketSnapshot;

// ---------------------------------------------------------------------------
// JSON files
// ---------------------------------------------------------------------------

/// Reads `{"taken_at": ..., "ticks": {"BTC": {"price": .., "change_24h_pct": .., "volume_24h": ..}}}`
/// on every fetch.
pub struct JsonSnapshotFile {
    path: PathBuf,
}

impl JsonSnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MarketDataSource for JsonSnapshotFile {
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot> {
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read snapshot: {}", self.path.display()))?;
        let snapshot: MarketSnapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse snapshot: {}", self.path.display()))?;
        debug!(path = %self.path.display(), symbols = snapshot.len(), "Snapshot read");
        Ok(snapshot)
    }

    fn name(&self) -> &str {
        "json-file"
    }
}

/// Reads `{"ETH": 1.5, "USDT": 200}` for one venue on every fetch.
pub struct JsonBalanceFile {
    exchange: String,
    path: PathBuf,
}

impl JsonBalanceFile {
    pub fn new(exchange: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            exchange: exchange.to_string(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl BalanceSource for JsonBalanceFile {
    async fn get_balances(&self) -> Result<BTreeMap<String, Decimal>> {
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {} balances: {}", self.exchange, self.path.display()))?;
        let balances: BTreeMap<String, Decimal> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {} balances", self.exchange))?;
        Ok(balances)
    }

    fn exchange(&self) -> &str {
        &self.exchange
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// A snapshot held in memory; `set` swaps it between ticks.
#[derive(Clone, Default)]
pub struct StaticSnapshot {
    snapshot: Arc<RwLock<MarketSnapshot>>,
}

impl StaticSnapshot {
    pub fn new(snapshot: MarketSnapshot) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn set(&self, snapshot: MarketSnapshot) {
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = snapshot;
        }
    }
}

#[async_trait]
impl MarketDataSource for StaticSnapshot {
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot> {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .map_err(|_| anyhow::anyhow!("snapshot lock poisoned"))
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Fixed balances for one venue.
#[derive(Debug, Clone)]
pub struct StaticBalances {
    exchange: String,
    balances: BTreeMap<String, Decimal>,
}

impl StaticBalances {
    pub fn new(exchange: &str, balances: BTreeMap<String, Decimal>) -> Self {
        Self {
            exchange: exchange.to_string(),
            balances,
        }
    }
}

#[async_trait]
impl BalanceSource for StaticBalances {
    async fn get_balances(&self) -> Result<BTreeMap<String, Decimal>> {
        Ok(self.balances.clone())
    }

    fn exchange(&self) -> &str {
        &self.exchange
    }
}
