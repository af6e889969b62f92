//! Accountant: per-tick value conservation.
//!
//! Takes a checkpoint of the ledger once prices are fixed for the tick and
//! reconciles after the trading phases: with prices unchanged, the only
//! thing allowed to move total value is fees.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info};

use crate::portfolio::Ledger;
use crate::types::{CycleStats, MONEY_DP};

/// Largest drift tolerated before a tick is flagged.
const CONSERVATION_TOLERANCE: Decimal = dec!(0.00000001);

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Ledger totals captured before LEAP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueCheckpoint {
    pub total_value: Decimal,
    pub fees_paid: Decimal,
    pub profit_realized: Decimal,
}

impl ValueCheckpoint {
    pub fn capture(ledger: &Ledger) -> Self {
        Self {
            total_value: ledger.total_value(),
            fees_paid: ledger.stats().total_fees_paid,
            profit_realized: ledger.stats().total_profit_realized,
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of one tick's money movement.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub leaps: u32,
    pub scalps: u32,
    pub value_before: Decimal,
    pub value_after: Decimal,
    /// Fees charged during the tick.
    pub fees_charged: Decimal,
    /// `value_after − (value_before − fees_charged)`, at display scale.
    pub drift: Decimal,
    pub conserved: bool,
    pub timestamp: chrono::DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Compare the ledger against its pre-trade checkpoint.
    pub fn reconcile(ledger: &Ledger, checkpoint: &ValueCheckpoint, cycle: &CycleStats) -> CycleReport {
        let value_after = ledger.total_value();
        let fees_charged = ledger.stats().total_fees_paid - checkpoint.fees_paid;
        let expected = checkpoint.total_value - fees_charged;
        let drift = (value_after - expected).round_dp(MONEY_DP);
        let conserved = drift.abs() <= CONSERVATION_TOLERANCE;

        let report = CycleReport {
            cycle_number: cycle.cycle_number,
            leaps: cycle.leaps_made,
            scalps: cycle.scalps_executed,
            value_before: checkpoint.total_value.round_dp(MONEY_DP),
            value_after: value_after.round_dp(MONEY_DP),
            fees_charged,
            drift,
            conserved,
            timestamp: Utc::now(),
        };

        if !conserved {
            error!(
                cycle = report.cycle_number,
                before = %report.value_before,
                after = %report.value_after,
                fees = %fees_charged,
                drift = %drift,
                "Value not conserved this tick"
            );
        }

        info!(
            cycle = report.cycle_number,
            value = format!("${:.2}", value_after),
            fees = format!("${:.4}", fees_charged),
            leaps = report.leaps,
            scalps = report.scalps,
            conserved,
            "Cycle reconciled"
        );

        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
