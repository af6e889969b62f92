//! Shared types for the LEAPFROG engine.
//!
//! These types form the data model used across all modules. They are
//! designed to be stable so that sources, strategy, portfolio and engine
//! modules can depend on them without circular references.
//!
//! Money, prices and quantities are `Decimal` throughout. Percentages are
//! percentage points (`-10` = −10%).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Decimal places used when money leaves the engine (reports, fee legs).
pub const MONEY_DP: u32 = 8;

/// Quantities at or below this are treated as gone.
pub const DEFAULT_DUST_THRESHOLD: Decimal = dec!(0.00000001);

const HUNDRED: Decimal = dec!(100);

// ---------------------------------------------------------------------------
// Market snapshot
// ---------------------------------------------------------------------------

/// One symbol's entry in a market snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub price: Decimal,
    /// 24-hour change in percentage points.
    pub change_24h_pct: Decimal,
    /// 24-hour volume in quote currency.
    pub volume_24h: Decimal,
}

impl MarketTick {
    pub fn new(price: Decimal, change_24h_pct: Decimal, volume_24h: Decimal) -> Self {
        Self { price, change_24h_pct, volume_24h }
    }
}

/// Prices, 24h changes and volumes for every tracked symbol at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    #[serde(default = "Utc::now")]
    pub taken_at: DateTime<Utc>,
    pub ticks: BTreeMap<String, MarketTick>,
}

impl MarketSnapshot {
    pub fn new(ticks: BTreeMap<String, MarketTick>) -> Self {
        Self { taken_at: Utc::now(), ticks }
    }

    pub fn get(&self, symbol: &str) -> Option<&MarketTick> {
        self.ticks.get(symbol)
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.ticks.get(symbol).map(|t| t.price)
    }

    pub fn insert(&mut self, symbol: &str, tick: MarketTick) {
        self.ticks.insert(symbol.to_string(), tick);
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }
}

// ---------------------------------------------------------------------------
// Friend
// ---------------------------------------------------------------------------

/// A tracked holding of one asset, however and whenever it was acquired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friend {
    pub symbol: String,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub exchange: String,
}

impl fmt::Display for Friend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_clear() {
            format!("clear +${:.2}", self.profit_available())
        } else {
            format!("baggage ${:.2} ({:.1}%)", self.baggage(), self.baggage_percent())
        };
        write!(
            f,
            "[{}] {} qty={} val=${:.2} cost=${:.2} ({state})",
            self.exchange,
            self.symbol,
            self.quantity.normalize(),
            self.current_value(),
            self.cost_basis,
        )
    }
}

impl Friend {
    /// Create a friend priced at `price`, with entry price derived from the cost basis.
    pub fn new(symbol: &str, quantity: Decimal, cost_basis: Decimal, price: Decimal, exchange: &str) -> Self {
        let entry_price = if quantity > Decimal::ZERO {
            cost_basis / quantity
        } else {
            price
        };
        Self {
            symbol: symbol.to_string(),
            quantity,
            cost_basis,
            entry_price,
            current_price: price,
            exchange: exchange.to_string(),
        }
    }

    pub fn current_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    pub fn baggage(&self) -> Decimal {
        (self.cost_basis - self.current_value()).max(Decimal::ZERO)
    }

    pub fn is_clear(&self) -> bool {
        self.current_value() >= self.cost_basis
    }

    pub fn profit_available(&self) -> Decimal {
        (self.current_value() - self.cost_basis).max(Decimal::ZERO)
    }

    /// Baggage as a percentage of cost basis.
    pub fn baggage_percent(&self) -> Decimal {
        if self.cost_basis <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.baggage() / self.cost_basis * HUNDRED
        }
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.current_value() - self.cost_basis
    }

    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
    }

    /// Fold another acquisition in with a weighted-average cost basis.
    pub fn absorb(&mut self, quantity: Decimal, cost: Decimal) {
        self.quantity += quantity;
        self.cost_basis += cost;
        if self.quantity > Decimal::ZERO {
            self.entry_price = self.cost_basis / self.quantity;
        }
    }

    /// Remove `quantity` units and their proportional share of cost basis.
    /// Returns the cost basis removed.
    pub fn release(&mut self, quantity: Decimal) -> Decimal {
        let quantity = quantity.min(self.quantity);
        let cost = if quantity == self.quantity {
            self.cost_basis
        } else if self.quantity > Decimal::ZERO {
            self.cost_basis * quantity / self.quantity
        } else {
            Decimal::ZERO
        };
        self.quantity -= quantity;
        self.cost_basis = (self.cost_basis - cost).max(Decimal::ZERO);
        cost
    }
}

// ---------------------------------------------------------------------------
// Cash
// ---------------------------------------------------------------------------

/// Quote-currency balance: a friend whose cost basis always equals its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cash {
    pub symbol: String,
    pub balance: Decimal,
    #[serde(default)]
    pub exchange: String,
}

impl Cash {
    pub fn new(symbol: &str, balance: Decimal, exchange: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            balance,
            exchange: exchange.to_string(),
        }
    }
}

impl fmt::Display for Cash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ${:.2}", self.exchange, self.symbol, self.balance)
    }
}

// ---------------------------------------------------------------------------
// Breadcrumb
// ---------------------------------------------------------------------------

/// The slice of a clear source deliberately left behind during a leap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub symbol: String,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub current_price: Decimal,
    #[serde(default)]
    pub exchange: String,
}

impl fmt::Display for Breadcrumb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pnl = self.unrealized_pnl();
        let sign = if pnl >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "crumb {} qty={} val=${:.2} ({sign}{:.2}, {sign}{:.2}%)",
            self.symbol,
            self.quantity.normalize(),
            self.current_value(),
            pnl,
            self.pnl_percent(),
        )
    }
}

impl Breadcrumb {
    pub fn new(symbol: &str, quantity: Decimal, cost_basis: Decimal, price: Decimal, exchange: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity,
            cost_basis,
            entry_price: price,
            entry_time: Utc::now(),
            current_price: price,
            exchange: exchange.to_string(),
        }
    }

    pub fn current_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.current_value() - self.cost_basis
    }

    pub fn pnl_percent(&self) -> Decimal {
        if self.cost_basis <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.unrealized_pnl() / self.cost_basis * HUNDRED
        }
    }

    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
    }

    /// Merge another crumb of the same symbol (weighted-average entry).
    pub fn merge(&mut self, other: &Breadcrumb) {
        self.quantity += other.quantity;
        self.cost_basis += other.cost_basis;
        self.current_price = other.current_price;
        if self.quantity > Decimal::ZERO {
            self.entry_price = self.cost_basis / self.quantity;
        }
    }
}

// ---------------------------------------------------------------------------
// Leap opportunity
// ---------------------------------------------------------------------------

/// A fully priced candidate reallocation. Ephemeral: consumed by the
/// executor in the same tick or discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct LeapOpportunity {
    pub from_symbol: String,
    pub to_symbol: String,
    pub exchange: String,
    pub from_is_cash: bool,
    pub from_price: Decimal,
    pub to_price: Decimal,
    pub from_change_24h: Decimal,
    pub to_change_24h: Decimal,
    pub dip_advantage: Decimal,
    /// Units of the source that change hands.
    pub source_quantity: Decimal,
    /// Units of the source left behind (zero when the source carries baggage).
    pub breadcrumb_quantity: Decimal,
    pub gross_value: Decimal,
    pub sell_fee_cost: Decimal,
    pub buy_fee_cost: Decimal,
    pub slippage_cost: Decimal,
    pub total_fees: Decimal,
    /// Amount left after the sell leg; what the buy leg spends.
    pub post_sell_value: Decimal,
    pub net_value_after_fees: Decimal,
    pub fee_percent: Decimal,
    pub baggage_percent: Decimal,
    pub required_dip_advantage: Decimal,
    pub fee_adjusted_multiplier: Decimal,
}

impl fmt::Display for LeapOpportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} | dip_adv={:.2}pp need={:.2}pp | gross=${:.2} fees=${:.4} net=${:.2} | x{:.4}",
            self.from_symbol,
            self.to_symbol,
            self.dip_advantage,
            self.required_dip_advantage,
            self.gross_value,
            self.total_fees,
            self.net_value_after_fees,
            self.fee_adjusted_multiplier,
        )
    }
}

impl LeapOpportunity {
    /// Whether this candidate clears both the breakeven threshold and the multiplier check.
    pub fn clears_breakeven(&self) -> bool {
        self.dip_advantage >= self.required_dip_advantage && self.fee_adjusted_multiplier > Decimal::ONE
    }

    /// Destination units the net value buys.
    pub fn destination_quantity(&self) -> Decimal {
        if self.to_price <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.net_value_after_fees / self.to_price
        }
    }
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Where the data behind a tick or an aggregation came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Provenance {
    #[default]
    Live,
    /// Some venues failed and were omitted.
    Partial { failed: Vec<String> },
    /// Every venue failed; a cached snapshot was used.
    Stale { cached_at: DateTime<Utc> },
    /// No market data this tick.
    Unavailable,
}

impl Provenance {
    pub fn is_trustworthy(&self) -> bool {
        matches!(self, Provenance::Live | Provenance::Partial { .. })
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Live => write!(f, "live"),
            Provenance::Partial { failed } => write!(f, "partial (failed: {})", failed.join(",")),
            Provenance::Stale { cached_at } => write!(f, "stale (cached {})", cached_at.format("%Y-%m-%d %H:%M")),
            Provenance::Unavailable => write!(f, "unavailable"),
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle phases
// ---------------------------------------------------------------------------

/// The states one tick walks through, strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CyclePhase {
    Protect,
    Scan,
    Update,
    Analyze,
    Leap,
    Scalp,
    Record,
}

impl CyclePhase {
    pub const ORDER: [CyclePhase; 7] = [
        CyclePhase::Protect,
        CyclePhase::Scan,
        CyclePhase::Update,
        CyclePhase::Analyze,
        CyclePhase::Leap,
        CyclePhase::Scalp,
        CyclePhase::Record,
    ];

    /// The phase that follows this one; `Record` wraps to `Protect`.
    pub fn next(&self) -> CyclePhase {
        match self {
            CyclePhase::Protect => CyclePhase::Scan,
            CyclePhase::Scan => CyclePhase::Update,
            CyclePhase::Update => CyclePhase::Analyze,
            CyclePhase::Analyze => CyclePhase::Leap,
            CyclePhase::Leap => CyclePhase::Scalp,
            CyclePhase::Scalp => CyclePhase::Record,
            CyclePhase::Record => CyclePhase::Protect,
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePhase::Protect => write!(f, "PROTECT"),
            CyclePhase::Scan => write!(f, "SCAN"),
            CyclePhase::Update => write!(f, "UPDATE"),
            CyclePhase::Analyze => write!(f, "ANALYZE"),
            CyclePhase::Leap => write!(f, "LEAP"),
            CyclePhase::Scalp => write!(f, "SCALP"),
            CyclePhase::Record => write!(f, "RECORD"),
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Lifetime counters, persisted as `statistics{}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LifetimeStats {
    pub cycles: u64,
    pub total_leaps: u64,
    pub total_breadcrumbs_planted: u64,
    pub total_scalps: u64,
    pub total_fees_paid: Decimal,
    pub total_slippage_paid: Decimal,
    pub total_profit_realized: Decimal,
    /// Gains and losses crystallised by leaps and scalps.
    pub realized_pnl: Decimal,
}

/// Counters for a single tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleStats {
    pub cycle_number: u64,
    pub leaps_made: u32,
    pub breadcrumbs_planted: u32,
    pub scalps_executed: u32,
    pub profit_realized: Decimal,
    pub fees_paid: Decimal,
    pub opportunities_found: usize,
    pub phases: Vec<CyclePhase>,
    pub provenance: Provenance,
    pub halted: bool,
    pub persisted: bool,
    pub timestamp: DateTime<Utc>,
}

impl CycleStats {
    pub fn new(cycle_number: u64) -> Self {
        Self {
            cycle_number,
            leaps_made: 0,
            breadcrumbs_planted: 0,
            scalps_executed: 0,
            profit_realized: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            opportunities_found: 0,
            phases: Vec::new(),
            provenance: Provenance::Live,
            halted: false,
            persisted: false,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for CycleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle #{}: opps={} leaps={} crumbs={} scalps={} profit=${:.2} fees=${:.4} data={}{}",
            self.cycle_number,
            self.opportunities_found,
            self.leaps_made,
            self.breadcrumbs_planted,
            self.scalps_executed,
            self.profit_realized,
            self.fees_paid,
            self.provenance,
            if self.halted { " HALTED" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the engine.
#[derive(Debug, thiserror::Error)]
pub enum LeapError {
    #[error("Data unavailable ({data_source}): {message}")]
    DataUnavailable { data_source: String, message: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Unknown position: {0}")]
    UnknownPosition(String),

    #[error("Invalid fraction: {0} (must be in (0, 1])")]
    InvalidFraction(Decimal),

    #[error("Scalp of {symbol} would not be profitable after fees (net ${net:.4})")]
    ScalpNotProfitable { symbol: String, net: Decimal },

    #[error("Leap {from} -> {to} no longer clears breakeven (x{multiplier:.6})")]
    NotViable { from: String, to: String, multiplier: Decimal },
}

impl LeapError {
    pub fn unavailable(data_source: &str, message: impl Into<String>) -> Self {
        LeapError::DataUnavailable {
            data_source: data_source.to_string(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
