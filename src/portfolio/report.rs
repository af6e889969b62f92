//! Read-only portfolio report.
//!
//! A detached, serializable copy of the ledger's numbers. Money is rounded
//! to `MONEY_DP` here, at the display boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use super::Ledger;
use crate::types::{LifetimeStats, Provenance, MONEY_DP};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PnlSummary {
    /// Mark-to-market value minus cost basis of everything still held.
    pub unrealized: Decimal,
    /// Crystallised by leaps and scalps over the ledger's lifetime.
    pub realized: Decimal,
    pub net: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingLine {
    pub symbol: String,
    pub exchange: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub value: Decimal,
    pub cost_basis: Decimal,
    pub baggage: Decimal,
    pub pnl_percent: Decimal,
    pub is_breadcrumb: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullReport {
    pub generated_at: DateTime<Utc>,
    pub total_value: Decimal,
    pub cash: Decimal,
    pub pnl: PnlSummary,
    pub friends: Vec<HoldingLine>,
    pub breadcrumbs: Vec<HoldingLine>,
    pub stats: LifetimeStats,
    /// Where the holdings were last loaded from.
    pub balances: Provenance,
}

impl FullReport {
    pub fn from_ledger(ledger: &Ledger) -> Self {
        let money = |d: Decimal| d.round_dp(MONEY_DP);

        let friends = ledger
            .friends()
            .map(|f| HoldingLine {
                symbol: f.symbol.clone(),
                exchange: f.exchange.clone(),
                quantity: f.quantity,
                price: f.current_price,
                value: money(f.current_value()),
                cost_basis: money(f.cost_basis),
                baggage: money(f.baggage()),
                pnl_percent: if f.cost_basis > Decimal::ZERO {
                    (f.unrealized_pnl() / f.cost_basis * Decimal::ONE_HUNDRED).round_dp(2)
                } else {
                    Decimal::ZERO
                },
                is_breadcrumb: false,
            })
            .collect();

        let breadcrumbs = ledger
            .breadcrumbs()
            .map(|b| HoldingLine {
                symbol: b.symbol.clone(),
                exchange: b.exchange.clone(),
                quantity: b.quantity,
                price: b.current_price,
                value: money(b.current_value()),
                cost_basis: money(b.cost_basis),
                baggage: money((b.cost_basis - b.current_value()).max(Decimal::ZERO)),
                pnl_percent: b.pnl_percent().round_dp(2),
                is_breadcrumb: true,
            })
            .collect();

        let unrealized = money(ledger.total_value() - ledger.total_cost_basis());
        let realized = money(ledger.stats().realized_pnl);

        Self {
            generated_at: Utc::now(),
            total_value: money(ledger.total_value()),
            cash: money(ledger.cash().balance),
            pnl: PnlSummary {
                unrealized,
                realized,
                net: unrealized + realized,
            },
            friends,
            breadcrumbs,
            stats: ledger.stats().clone(),
            balances: ledger.balance_provenance().clone(),
        }
    }
}

impl fmt::Display for FullReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "value=${:.2} cash=${:.2} | pnl unrealized=${:.2} realized=${:.2} | friends={} crumbs={} | leaps={} scalps={} fees=${:.4} | balances={}",
            self.total_value,
            self.cash,
            self.pnl.unrealized,
            self.pnl.realized,
            self.friends.len(),
            self.breadcrumbs.len(),
            self.stats.total_leaps,
            self.stats.total_scalps,
            self.stats.total_fees_paid,
            self.balances,
        )
    }
}
