//! External data sources.
//!
//! Defines the ports the engine consumes. Transport (HTTP, websockets,
//! rate limiting) lives behind these traits; the engine only sees
//! bounded-time results.
//!
//! - `MarketDataSource`: price, 24h change and 24h volume per symbol
//! - `BalanceSource`: per-venue asset balances
//! - `CostBasisProvider`: FIFO-accurate cost basis per (exchange, asset)

pub mod cost_basis;
pub mod file;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::MarketSnapshot;

/// Abstraction over market snapshot feeds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch the latest snapshot. Must include 24h volume for every symbol.
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Abstraction over one venue's balance endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Asset → quantity held on this venue.
    async fn get_balances(&self) -> Result<BTreeMap<String, Decimal>>;

    /// Venue identifier, matching the fee model's keys.
    fn exchange(&self) -> &str;
}

/// Cost basis for one asset on one venue, from real trade history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBasis {
    pub total_cost: Decimal,
    pub total_quantity: Decimal,
    pub avg_entry_price: Decimal,
}

impl CostBasis {
    pub fn new(total_cost: Decimal, total_quantity: Decimal) -> Self {
        let avg_entry_price = if total_quantity > Decimal::ZERO {
            total_cost / total_quantity
        } else {
            Decimal::ZERO
        };
        Self { total_cost, total_quantity, avg_entry_price }
    }

    /// Cost attributable to `quantity` units at this basis's average price.
    pub fn cost_for(&self, quantity: Decimal) -> Decimal {
        quantity * self.avg_entry_price
    }
}

/// Capability resolved once at startup; `NoCostBasis` when no ledger exists.
pub trait CostBasisProvider: Send + Sync {
    fn get_cost_basis(&self, asset: &str, exchange: &str) -> Option<CostBasis>;
}

/// Provider that knows nothing. Aggregation falls through to the next tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCostBasis;

impl CostBasisProvider for NoCostBasis {
    fn get_cost_basis(&self, _asset: &str, _exchange: &str) -> Option<CostBasis> {
        None
    }
}
