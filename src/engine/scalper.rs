//! Scalp harvester: sells part of a profitable breadcrumb back into cash.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::portfolio::Ledger;
use crate::strategy::FeeModel;
use crate::types::{Breadcrumb, LeapError, MONEY_DP};

#[derive(Debug, Clone)]
pub struct ScalpConfig {
    /// Breadcrumbs below this unrealized gain (percent) are left alone.
    pub min_profit_pct: Decimal,
    /// Share of a breadcrumb sold per harvest.
    pub harvest_fraction: Decimal,
}

impl Default for ScalpConfig {
    fn default() -> Self {
        Self {
            min_profit_pct: dec!(3.0),
            harvest_fraction: dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalpReceipt {
    pub scalp_id: String,
    pub symbol: String,
    pub quantity_sold: Decimal,
    pub price: Decimal,
    pub gross_proceeds: Decimal,
    pub fees: Decimal,
    pub slippage: Decimal,
    pub net_proceeds: Decimal,
    pub cost_released: Decimal,
    pub profit: Decimal,
    pub remaining_quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

pub struct ScalpHarvester {
    config: ScalpConfig,
    fees: FeeModel,
}

impl ScalpHarvester {
    pub fn new(config: ScalpConfig, fees: FeeModel) -> Self {
        Self { config, fees }
    }

    pub fn config(&self) -> &ScalpConfig {
        &self.config
    }

    /// Breadcrumbs at or above the profit threshold, best first.
    pub fn find_scalp_candidates(&self, ledger: &Ledger) -> Vec<(Breadcrumb, Decimal)> {
        let mut candidates: Vec<(Breadcrumb, Decimal)> = ledger
            .breadcrumbs()
            .filter(|b| b.quantity > Decimal::ZERO && b.current_price > Decimal::ZERO)
            .map(|b| (b.clone(), b.pnl_percent()))
            .filter(|(_, pnl)| *pnl >= self.config.min_profit_pct)
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.symbol.cmp(&b.0.symbol)));
        candidates
    }

    /// Sell `fraction` of a breadcrumb at its current price and bank the proceeds.
    ///
    /// Refused with `ScalpNotProfitable` when fees would eat the gain; the
    /// ledger is untouched on any error.
    pub fn execute_scalp(&self, ledger: &mut Ledger, symbol: &str, fraction: Decimal) -> Result<ScalpReceipt, LeapError> {
        if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
            return Err(LeapError::InvalidFraction(fraction));
        }
        let crumb = ledger
            .breadcrumb(symbol)
            .ok_or_else(|| LeapError::UnknownPosition(symbol.to_string()))?;

        let quantity = if fraction == Decimal::ONE {
            crumb.quantity
        } else {
            crumb.quantity * fraction
        };
        let cost_released = if fraction == Decimal::ONE {
            crumb.cost_basis
        } else {
            crumb.cost_basis * fraction
        };
        let price = crumb.current_price;
        let gross = quantity * price;

        // Unpriced venues (including merged holdings) pay the fallback schedule.
        let schedule = self.fees.for_exchange(&crumb.exchange);
        let fees = (gross * schedule.taker_fee).round_dp(MONEY_DP);
        let slippage = (gross * schedule.slippage_estimate).round_dp(MONEY_DP);
        let net = gross - fees - slippage;
        let profit = net - cost_released;

        if profit <= Decimal::ZERO {
            debug!(symbol, %profit, "Scalp refused, not profitable after fees");
            return Err(LeapError::ScalpNotProfitable {
                symbol: symbol.to_string(),
                net: profit,
            });
        }

        let mut working = ledger.clone();
        working.reduce_breadcrumb(symbol, quantity)?;
        working.credit_cash(net);
        working.record_fees(fees + slippage, slippage);
        working.record_scalp(profit);

        let problems = working.check_invariants();
        if !problems.is_empty() {
            return Err(LeapError::InvariantViolation(problems.join("; ")));
        }
        *ledger = working;

        let receipt = ScalpReceipt {
            scalp_id: format!("scalp-{}", uuid::Uuid::new_v4()),
            symbol: symbol.to_string(),
            quantity_sold: quantity,
            price,
            gross_proceeds: gross,
            fees,
            slippage,
            net_proceeds: net,
            cost_released,
            profit,
            remaining_quantity: ledger.breadcrumb(symbol).map(|b| b.quantity).unwrap_or(Decimal::ZERO),
            timestamp: Utc::now(),
        };

        info!(
            id = %receipt.scalp_id,
            symbol,
            sold = %quantity.round_dp(8),
            proceeds = format!("${:.2}", net),
            profit = format!("${:.4}", profit),
            remaining = %receipt.remaining_quantity.round_dp(8),
            "Scalp executed"
        );

        Ok(receipt)
    }

    /// Harvest every candidate with the configured fraction. Refusals are skipped.
    pub fn harvest(&self, ledger: &mut Ledger) -> Vec<ScalpReceipt> {
        let mut receipts = Vec::new();
        for (crumb, pnl) in self.find_scalp_candidates(ledger) {
            match self.execute_scalp(ledger, &crumb.symbol, self.config.harvest_fraction) {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => debug!(symbol = %crumb.symbol, pnl = %pnl.round_dp(2), error = %e, "Scalp skipped"),
            }
        }
        receipts
    }
}
