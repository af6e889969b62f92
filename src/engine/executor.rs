//! Leap executor.
//!
//! Re-validates an opportunity against the live ledger and the snapshot it
//! is about to act on, then applies it all-or-nothing: the change is built
//! on a working copy and swapped in only once every check has passed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::portfolio::{Ledger, LeapSource};
use crate::strategy::OpportunityScorer;
use crate::types::{Breadcrumb, LeapError, LeapOpportunity, MarketSnapshot};

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

/// What one applied leap did to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LeapReceipt {
    pub leap_id: String,
    pub from_symbol: String,
    pub to_symbol: String,
    pub exchange: String,
    pub gross_value: Decimal,
    pub total_fees: Decimal,
    pub slippage_cost: Decimal,
    pub net_value: Decimal,
    /// Units of the destination credited.
    pub acquired_quantity: Decimal,
    /// Units left behind as a breadcrumb (zero for cash or baggage sources).
    pub breadcrumb_quantity: Decimal,
    /// `post_sell − leapt cost basis` for friend sources; zero for cash.
    pub realized_pnl: Decimal,
    pub multiplier: Decimal,
    pub dry_run: bool,
    pub timestamp: DateTime<Utc>,
}

impl LeapReceipt {
    pub fn planted_breadcrumb(&self) -> bool {
        self.breadcrumb_quantity > Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct LeapExecutor {
    scorer: Arc<OpportunityScorer>,
    dry_run: bool,
}

impl LeapExecutor {
    pub fn new(scorer: Arc<OpportunityScorer>) -> Self {
        Self { scorer, dry_run: false }
    }

    /// Log the leaps that would be made without touching the ledger.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Apply `opportunity` if it still holds. `false` leaves the ledger as it was.
    pub fn execute(&self, ledger: &mut Ledger, opportunity: &LeapOpportunity, snapshot: &MarketSnapshot) -> bool {
        match self.try_execute(ledger, opportunity, snapshot) {
            Ok(receipt) => !receipt.dry_run,
            Err(LeapError::InvariantViolation(msg)) => {
                error!(
                    from = %opportunity.from_symbol,
                    to = %opportunity.to_symbol,
                    %msg,
                    "Leap aborted: invariant violation"
                );
                false
            }
            Err(e) => {
                warn!(
                    from = %opportunity.from_symbol,
                    to = %opportunity.to_symbol,
                    error = %e,
                    "Leap not executed"
                );
                false
            }
        }
    }

    /// Re-price and apply, returning the receipt or the reason nothing happened.
    pub fn try_execute(
        &self,
        ledger: &mut Ledger,
        opportunity: &LeapOpportunity,
        snapshot: &MarketSnapshot,
    ) -> Result<LeapReceipt, LeapError> {
        let source = current_source(ledger, opportunity)?;

        // Fresh figures from the current holding, not the ones scored earlier.
        let opp = self.scorer.price_leap(&source, &opportunity.to_symbol, snapshot)?;
        let still_qualifies =
            opp.clears_breakeven() && opp.dip_advantage >= self.scorer.config().min_dip_advantage_pct;
        if !still_qualifies {
            return Err(LeapError::NotViable {
                from: opp.from_symbol,
                to: opp.to_symbol,
                multiplier: opp.fee_adjusted_multiplier,
            });
        }
        let min_trade = self.scorer.fees().for_exchange(source.exchange()).min_trade_size;
        if opp.gross_value < min_trade {
            return Err(LeapError::NotViable {
                from: opp.from_symbol,
                to: opp.to_symbol,
                multiplier: opp.fee_adjusted_multiplier,
            });
        }

        let acquired = opp.destination_quantity();
        if acquired <= Decimal::ZERO {
            return Err(LeapError::InvariantViolation(format!(
                "{} -> {} would acquire {acquired} units",
                opp.from_symbol, opp.to_symbol
            )));
        }

        let mut receipt = LeapReceipt {
            leap_id: format!("leap-{}", uuid::Uuid::new_v4()),
            from_symbol: opp.from_symbol.clone(),
            to_symbol: opp.to_symbol.clone(),
            exchange: opp.exchange.clone(),
            gross_value: opp.gross_value,
            total_fees: opp.total_fees,
            slippage_cost: opp.slippage_cost,
            net_value: opp.net_value_after_fees,
            acquired_quantity: acquired,
            breadcrumb_quantity: opp.breadcrumb_quantity,
            realized_pnl: Decimal::ZERO,
            multiplier: opp.fee_adjusted_multiplier,
            dry_run: self.dry_run,
            timestamp: Utc::now(),
        };

        if self.dry_run {
            info!(leap = %opp, "[DRY RUN] Would leap");
            return Ok(receipt);
        }

        let mut working = ledger.clone();
        receipt.realized_pnl = apply(&mut working, &opp, acquired)?;

        let problems = working.check_invariants();
        if !problems.is_empty() {
            return Err(LeapError::InvariantViolation(problems.join("; ")));
        }

        *ledger = working;

        info!(
            id = %receipt.leap_id,
            from = %receipt.from_symbol,
            to = %receipt.to_symbol,
            gross = format!("${:.2}", receipt.gross_value),
            fees = format!("${:.4}", receipt.total_fees),
            acquired = %acquired.round_dp(8),
            breadcrumb = %receipt.breadcrumb_quantity.round_dp(8),
            multiplier = format!("{:.4}", receipt.multiplier),
            "Leap executed"
        );

        Ok(receipt)
    }
}

/// The source as the ledger holds it right now.
fn current_source(ledger: &Ledger, opportunity: &LeapOpportunity) -> Result<LeapSource, LeapError> {
    if opportunity.from_is_cash {
        let cash = ledger.cash();
        if cash.balance <= Decimal::ZERO {
            return Err(LeapError::unavailable(&cash.symbol, "no cash to leap"));
        }
        return Ok(LeapSource::Cash(cash.clone()));
    }
    ledger
        .friend(&opportunity.from_symbol)
        .cloned()
        .map(LeapSource::Friend)
        .ok_or_else(|| LeapError::UnknownPosition(opportunity.from_symbol.clone()))
}

/// Move value on `ledger` per the priced leap. Returns realized P&L.
fn apply(ledger: &mut Ledger, opp: &LeapOpportunity, acquired: Decimal) -> Result<Decimal, LeapError> {
    let mut realized = Decimal::ZERO;

    if opp.from_is_cash {
        ledger.debit_cash(opp.gross_value)?;
    } else {
        let moved = opp.source_quantity + opp.breadcrumb_quantity;
        let released = ledger.debit_friend(&opp.from_symbol, moved)?;
        let leapt_cost = if moved > Decimal::ZERO {
            released * opp.source_quantity / moved
        } else {
            Decimal::ZERO
        };
        let crumb_cost = released - leapt_cost;

        if opp.breadcrumb_quantity > Decimal::ZERO {
            debug!(
                symbol = %opp.from_symbol,
                quantity = %opp.breadcrumb_quantity,
                cost = %crumb_cost,
                "Planting breadcrumb"
            );
            ledger.plant_breadcrumb(Breadcrumb::new(
                &opp.from_symbol,
                opp.breadcrumb_quantity,
                crumb_cost,
                opp.from_price,
                &opp.exchange,
            ));
        }
        realized = opp.post_sell_value - leapt_cost;
    }

    ledger.credit_friend(&opp.to_symbol, acquired, opp.post_sell_value, opp.to_price, &opp.exchange);
    ledger.record_fees(opp.total_fees, opp.slippage_cost);
    ledger.record_leap(realized, opp.breadcrumb_quantity > Decimal::ZERO);

    Ok(realized)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
