//! Per-venue fee schedule.
//!
//! Immutable lookup of maker/taker fees, slippage estimate and minimum
//! trade size. Leaps cross the book, so they pay the taker fee.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Transaction costs for one venue. Rates are fractions (`0.001` = 0.1%).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeeStructure {
    pub exchange: String,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub slippage_estimate: Decimal,
    /// Smallest notional the venue accepts, in quote currency.
    pub min_trade_size: Decimal,
}

impl FeeStructure {
    pub fn new(
        exchange: &str,
        maker_fee: Decimal,
        taker_fee: Decimal,
        slippage_estimate: Decimal,
        min_trade_size: Decimal,
    ) -> Self {
        Self {
            exchange: exchange.to_string(),
            maker_fee,
            taker_fee,
            slippage_estimate,
            min_trade_size,
        }
    }

    /// Fraction of notional lost on one market-order leg.
    pub fn leg_cost_rate(&self) -> Decimal {
        self.taker_fee + self.slippage_estimate
    }
}

/// Venue → fee structure, with a fallback for venues nobody configured.
#[derive(Debug, Clone)]
pub struct FeeModel {
    venues: BTreeMap<String, FeeStructure>,
    fallback: FeeStructure,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self::new(vec![
            FeeStructure::new("binance", dec!(0.001), dec!(0.001), dec!(0.0005), dec!(10)),
            FeeStructure::new("coinbase", dec!(0.004), dec!(0.006), dec!(0.001), dec!(1)),
            FeeStructure::new("kraken", dec!(0.0016), dec!(0.0026), dec!(0.001), dec!(5)),
        ])
    }
}

impl FeeModel {
    /// Build from a list of venues. The fallback is the most expensive taker
    /// schedule supplied, so an unknown venue is never priced optimistically.
    pub fn new(structures: Vec<FeeStructure>) -> Self {
        let fallback = structures
            .iter()
            .max_by(|a, b| a.leg_cost_rate().cmp(&b.leg_cost_rate()))
            .cloned()
            .map(|mut s| {
                s.exchange = "unknown".to_string();
                s
            })
            .unwrap_or_else(|| FeeStructure::new("unknown", dec!(0.006), dec!(0.006), dec!(0.002), dec!(10)));

        let venues = structures
            .into_iter()
            .map(|s| (s.exchange.to_lowercase(), s))
            .collect();

        Self { venues, fallback }
    }

    /// Fee structure for a venue (case-insensitive), or the conservative fallback.
    pub fn for_exchange(&self, exchange: &str) -> &FeeStructure {
        match self.venues.get(&exchange.to_lowercase()) {
            Some(s) => s,
            None => {
                debug!(exchange, "No fee schedule for venue, using fallback");
                &self.fallback
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
