//! Cost basis tiers.
//!
//! `FifoCostLedger` replays trade history into FIFO lots per
//! (exchange, asset). `AverageCostBook` is the coarser fallback: a flat file
//! of average entry prices per asset.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use tracing::{info, warn};

use super::{CostBasis, CostBasisProvider};

// ---------------------------------------------------------------------------
// Trade history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One filled trade from a venue's history.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeRecord {
    pub exchange: String,
    pub asset: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Fee in quote currency.
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
struct Lot {
    quantity: Decimal,
    /// Per-unit cost including the buy fee.
    unit_cost: Decimal,
}

// ---------------------------------------------------------------------------
// FIFO ledger
// ---------------------------------------------------------------------------

/// FIFO lots keyed by (exchange, asset).
#[derive(Debug, Clone, Default)]
pub struct FifoCostLedger {
    lots: BTreeMap<(String, String), VecDeque<Lot>>,
}

impl FifoCostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay a trade history, oldest first.
    pub fn from_trades(mut trades: Vec<TradeRecord>) -> Self {
        trades.sort_by_key(|t| t.timestamp);
        let mut ledger = Self::new();
        for t in &trades {
            match t.side {
                TradeSide::Buy => ledger.record_buy(&t.exchange, &t.asset, t.quantity, t.price, t.fee),
                TradeSide::Sell => ledger.record_sell(&t.exchange, &t.asset, t.quantity),
            }
        }
        ledger
    }

    /// Load a JSON array of trades.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read trade history: {}", path.display()))?;
        let trades: Vec<TradeRecord> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse trade history: {}", path.display()))?;
        info!(path = %path.display(), trades = trades.len(), "Trade history loaded");
        Ok(Self::from_trades(trades))
    }

    fn key(exchange: &str, asset: &str) -> (String, String) {
        (exchange.to_lowercase(), asset.to_uppercase())
    }

    pub fn record_buy(&mut self, exchange: &str, asset: &str, quantity: Decimal, price: Decimal, fee: Decimal) {
        if quantity <= Decimal::ZERO {
            return;
        }
        let unit_cost = (quantity * price + fee) / quantity;
        self.lots
            .entry(Self::key(exchange, asset))
            .or_default()
            .push_back(Lot { quantity, unit_cost });
    }

    /// Consume the oldest lots first. Selling more than is on record empties
    /// the queue; the excess came from transfers we have no basis for.
    pub fn record_sell(&mut self, exchange: &str, asset: &str, quantity: Decimal) {
        let Some(queue) = self.lots.get_mut(&Self::key(exchange, asset)) else {
            warn!(exchange, asset, %quantity, "Sell with no recorded lots");
            return;
        };
        let mut remaining = quantity;
        while remaining > Decimal::ZERO {
            let Some(front) = queue.front_mut() else {
                warn!(exchange, asset, unmatched = %remaining, "Sold more than recorded lots");
                break;
            };
            if front.quantity <= remaining {
                remaining -= front.quantity;
                queue.pop_front();
            } else {
                front.quantity -= remaining;
                remaining = Decimal::ZERO;
            }
        }
    }
}

impl CostBasisProvider for FifoCostLedger {
    fn get_cost_basis(&self, asset: &str, exchange: &str) -> Option<CostBasis> {
        let queue = self.lots.get(&Self::key(exchange, asset))?;
        let total_quantity: Decimal = queue.iter().map(|l| l.quantity).sum();
        if total_quantity <= Decimal::ZERO {
            return None;
        }
        let total_cost: Decimal = queue.iter().map(|l| l.quantity * l.unit_cost).sum();
        Some(CostBasis::new(total_cost, total_quantity))
    }
}

// ---------------------------------------------------------------------------
// Average-cost file
// ---------------------------------------------------------------------------

/// Asset → average entry price.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AverageCostBook {
    prices: BTreeMap<String, Decimal>,
}

impl AverageCostBook {
    pub fn new(prices: BTreeMap<String, Decimal>) -> Self {
        let prices = prices.into_iter().map(|(k, v)| (k.to_uppercase(), v)).collect();
        Self { prices }
    }

    /// Load `{"ETH": 3000, ...}`. A missing file is an empty book.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No average-cost file, continuing without");
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read average costs: {}", path.display()))?;
        let prices: BTreeMap<String, Decimal> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse average costs: {}", path.display()))?;
        Ok(Self::new(prices))
    }

    pub fn avg_entry_price(&self, asset: &str) -> Option<Decimal> {
        self.prices.get(&asset.to_uppercase()).copied().filter(|p| *p > Decimal::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
