//! Position ledger: the single owner of every Friend, Cash and Breadcrumb
//! record, plus the lifetime counters.
//!
//! Every mutation of portfolio state goes through a method here. The scorer
//! only ever reads from a `&Ledger`; the executor, harvester and scheduler
//! hold the `&mut Ledger` for the duration of one tick.

pub mod report;

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::types::{
    Breadcrumb, Cash, Friend, LeapError, LifetimeStats, MarketSnapshot, Provenance, DEFAULT_DUST_THRESHOLD,
};

pub use report::{FullReport, PnlSummary};

// ---------------------------------------------------------------------------
// Leap sources
// ---------------------------------------------------------------------------

/// A holding that value can leap out of.
#[derive(Debug, Clone, PartialEq)]
pub enum LeapSource {
    Cash(Cash),
    Friend(Friend),
}

impl LeapSource {
    pub fn symbol(&self) -> &str {
        match self {
            LeapSource::Cash(c) => &c.symbol,
            LeapSource::Friend(f) => &f.symbol,
        }
    }

    pub fn exchange(&self) -> &str {
        match self {
            LeapSource::Cash(c) => &c.exchange,
            LeapSource::Friend(f) => &f.exchange,
        }
    }

    pub fn is_cash(&self) -> bool {
        matches!(self, LeapSource::Cash(_))
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    friends: BTreeMap<String, Friend>,
    cash: Cash,
    breadcrumbs: BTreeMap<String, Breadcrumb>,
    stats: LifetimeStats,
    /// Where the friends and cash were last loaded from.
    balance_provenance: Provenance,
    dust_threshold: Decimal,
}

impl Ledger {
    pub fn new(cash: Cash) -> Self {
        Self {
            friends: BTreeMap::new(),
            cash,
            breadcrumbs: BTreeMap::new(),
            stats: LifetimeStats::default(),
            balance_provenance: Provenance::Live,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
        }
    }

    /// Rebuild a ledger from persisted parts.
    pub fn from_parts(
        cash: Cash,
        friends: impl IntoIterator<Item = Friend>,
        breadcrumbs: impl IntoIterator<Item = Breadcrumb>,
        stats: LifetimeStats,
    ) -> Self {
        let mut ledger = Self::new(cash);
        for friend in friends {
            ledger.add_friend(friend);
        }
        for crumb in breadcrumbs {
            ledger.plant_breadcrumb(crumb);
        }
        ledger.stats = stats;
        ledger
    }

    pub fn with_dust_threshold(mut self, dust: Decimal) -> Self {
        self.dust_threshold = dust;
        self
    }

    pub fn with_balance_provenance(mut self, provenance: Provenance) -> Self {
        self.balance_provenance = provenance;
        self
    }

    // -- Reads ---------------------------------------------------------------

    pub fn cash(&self) -> &Cash {
        &self.cash
    }

    pub fn balance_provenance(&self) -> &Provenance {
        &self.balance_provenance
    }

    pub fn friends(&self) -> impl Iterator<Item = &Friend> {
        self.friends.values()
    }

    pub fn friend(&self, symbol: &str) -> Option<&Friend> {
        self.friends.get(symbol)
    }

    pub fn friend_count(&self) -> usize {
        self.friends.len()
    }

    pub fn breadcrumbs(&self) -> impl Iterator<Item = &Breadcrumb> {
        self.breadcrumbs.values()
    }

    pub fn breadcrumb(&self, symbol: &str) -> Option<&Breadcrumb> {
        self.breadcrumbs.get(symbol)
    }

    pub fn stats(&self) -> &LifetimeStats {
        &self.stats
    }

    pub fn dust_threshold(&self) -> Decimal {
        self.dust_threshold
    }

    /// Cash first, then every friend in symbol order.
    pub fn leap_sources(&self) -> Vec<LeapSource> {
        let mut sources = Vec::with_capacity(self.friends.len() + 1);
        if self.cash.balance > Decimal::ZERO {
            sources.push(LeapSource::Cash(self.cash.clone()));
        }
        sources.extend(self.friends.values().cloned().map(LeapSource::Friend));
        sources
    }

    /// The largest friend by current value; the legacy single "journey" view.
    pub fn main_position(&self) -> Option<&Friend> {
        self.friends.values().max_by(|a, b| a.current_value().cmp(&b.current_value()))
    }

    /// Mark-to-market value of everything: cash, friends and breadcrumbs.
    /// Exact; round at the display boundary.
    pub fn total_value(&self) -> Decimal {
        self.cash.balance
            + self.friends.values().map(Friend::current_value).sum::<Decimal>()
            + self.breadcrumbs.values().map(Breadcrumb::current_value).sum::<Decimal>()
    }

    pub fn total_cost_basis(&self) -> Decimal {
        self.cash.balance
            + self.friends.values().map(|f| f.cost_basis).sum::<Decimal>()
            + self.breadcrumbs.values().map(|b| b.cost_basis).sum::<Decimal>()
    }

    pub fn total_baggage(&self) -> Decimal {
        self.friends.values().map(Friend::baggage).sum()
    }

    pub fn is_dust(&self, quantity: Decimal) -> bool {
        quantity <= self.dust_threshold
    }

    /// Every broken invariant, described. Empty when the ledger is sound.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.cash.balance < Decimal::ZERO {
            problems.push(format!("cash balance negative: {}", self.cash.balance));
        }
        for (key, f) in &self.friends {
            if key != &f.symbol {
                problems.push(format!("friend keyed {key} holds {}", f.symbol));
            }
            if f.quantity < Decimal::ZERO {
                problems.push(format!("{} quantity negative: {}", f.symbol, f.quantity));
            }
            if f.cost_basis < Decimal::ZERO {
                problems.push(format!("{} cost basis negative: {}", f.symbol, f.cost_basis));
            }
            if f.current_price < Decimal::ZERO {
                problems.push(format!("{} price negative: {}", f.symbol, f.current_price));
            }
        }
        for b in self.breadcrumbs.values() {
            if b.quantity < Decimal::ZERO {
                problems.push(format!("breadcrumb {} quantity negative: {}", b.symbol, b.quantity));
            }
            if b.cost_basis < Decimal::ZERO {
                problems.push(format!("breadcrumb {} cost basis negative: {}", b.symbol, b.cost_basis));
            }
        }
        problems
    }

    // -- Writes --------------------------------------------------------------

    /// Insert a friend, folding it into an existing record for the same symbol.
    pub fn add_friend(&mut self, friend: Friend) {
        match self.friends.get_mut(&friend.symbol) {
            Some(existing) => {
                existing.absorb(friend.quantity, friend.cost_basis);
                existing.current_price = friend.current_price;
            }
            None => {
                self.friends.insert(friend.symbol.clone(), friend);
            }
        }
    }

    /// Credit `quantity` units bought for `cost` into `symbol`, creating the
    /// friend if needed.
    pub fn credit_friend(&mut self, symbol: &str, quantity: Decimal, cost: Decimal, price: Decimal, exchange: &str) {
        match self.friends.get_mut(symbol) {
            Some(existing) => {
                existing.absorb(quantity, cost);
                existing.update_price(price);
            }
            None => {
                self.friends
                    .insert(symbol.to_string(), Friend::new(symbol, quantity, cost, price, exchange));
            }
        }
    }

    /// Remove `quantity` units from a friend. Returns the cost basis released.
    /// The friend is deleted once what remains is dust.
    pub fn debit_friend(&mut self, symbol: &str, quantity: Decimal) -> Result<Decimal, LeapError> {
        let dust = self.dust_threshold;
        let friend = self
            .friends
            .get_mut(symbol)
            .ok_or_else(|| LeapError::UnknownPosition(symbol.to_string()))?;

        if quantity < Decimal::ZERO || quantity > friend.quantity {
            return Err(LeapError::InvariantViolation(format!(
                "cannot debit {quantity} {symbol}, holding {}",
                friend.quantity
            )));
        }

        let released = friend.release(quantity);
        if friend.quantity <= dust {
            debug!(symbol, remainder = %friend.quantity, "Friend decayed to dust, removing");
            self.friends.remove(symbol);
        }
        Ok(released)
    }

    pub fn credit_cash(&mut self, amount: Decimal) {
        self.cash.balance += amount;
    }

    pub fn debit_cash(&mut self, amount: Decimal) -> Result<(), LeapError> {
        if amount < Decimal::ZERO || amount > self.cash.balance {
            return Err(LeapError::InvariantViolation(format!(
                "cannot debit ${amount} cash, holding ${}",
                self.cash.balance
            )));
        }
        self.cash.balance -= amount;
        Ok(())
    }

    /// Plant a breadcrumb, merging with one already planted for the symbol.
    pub fn plant_breadcrumb(&mut self, crumb: Breadcrumb) {
        match self.breadcrumbs.get_mut(&crumb.symbol) {
            Some(existing) => existing.merge(&crumb),
            None => {
                self.breadcrumbs.insert(crumb.symbol.clone(), crumb);
            }
        }
    }

    /// Remove `quantity` units of a breadcrumb. Returns the cost basis released.
    pub fn reduce_breadcrumb(&mut self, symbol: &str, quantity: Decimal) -> Result<Decimal, LeapError> {
        let dust = self.dust_threshold;
        let crumb = self
            .breadcrumbs
            .get_mut(symbol)
            .ok_or_else(|| LeapError::UnknownPosition(symbol.to_string()))?;

        if quantity < Decimal::ZERO || quantity > crumb.quantity {
            return Err(LeapError::InvariantViolation(format!(
                "cannot sell {quantity} of breadcrumb {symbol}, holding {}",
                crumb.quantity
            )));
        }

        let released = if quantity == crumb.quantity {
            crumb.cost_basis
        } else {
            crumb.cost_basis * quantity / crumb.quantity
        };
        crumb.quantity -= quantity;
        crumb.cost_basis = (crumb.cost_basis - released).max(Decimal::ZERO);

        if crumb.quantity <= dust {
            debug!(symbol, "Breadcrumb fully harvested, removing");
            self.breadcrumbs.remove(symbol);
        }
        Ok(released)
    }

    /// Refresh prices from a snapshot. Symbols missing from the snapshot keep
    /// their last price. Returns how many records were updated.
    pub fn update_prices(&mut self, snapshot: &MarketSnapshot) -> usize {
        let mut updated = 0;
        for friend in self.friends.values_mut() {
            match snapshot.get(&friend.symbol) {
                Some(tick) if tick.price > Decimal::ZERO => {
                    friend.update_price(tick.price);
                    updated += 1;
                }
                _ => warn!(symbol = %friend.symbol, "No usable price in snapshot, keeping last"),
            }
        }
        for crumb in self.breadcrumbs.values_mut() {
            if let Some(tick) = snapshot.get(&crumb.symbol) {
                if tick.price > Decimal::ZERO {
                    crumb.update_price(tick.price);
                    updated += 1;
                }
            }
        }
        updated
    }

    /// Drop friends and breadcrumbs that have decayed to dust.
    pub fn prune_dust(&mut self) -> Vec<String> {
        let dust = self.dust_threshold;
        let mut removed: Vec<String> = self
            .friends
            .iter()
            .filter(|(_, f)| f.quantity <= dust)
            .map(|(s, _)| s.clone())
            .collect();
        for symbol in &removed {
            self.friends.remove(symbol);
        }
        let crumbs: Vec<String> = self
            .breadcrumbs
            .iter()
            .filter(|(_, b)| b.quantity <= dust)
            .map(|(s, _)| s.clone())
            .collect();
        for symbol in &crumbs {
            self.breadcrumbs.remove(symbol);
        }
        removed.extend(crumbs);
        removed
    }

    /// Forget every holding (keeps breadcrumbs and statistics). Used before a
    /// balance reload repopulates friends and cash.
    pub fn clear_holdings(&mut self) {
        self.friends.clear();
        self.cash.balance = Decimal::ZERO;
    }

    /// Record where a balance reload came from and which venue holds the cash.
    pub fn mark_reloaded(&mut self, provenance: Provenance, cash_exchange: Option<&str>) {
        if let Some(exchange) = cash_exchange {
            self.cash.exchange = exchange.to_string();
        }
        self.balance_provenance = provenance;
    }

    // -- Statistics ----------------------------------------------------------

    /// Add charged fees. Totals only ever grow.
    pub fn record_fees(&mut self, total_fees: Decimal, slippage: Decimal) {
        self.stats.total_fees_paid += total_fees.max(Decimal::ZERO);
        self.stats.total_slippage_paid += slippage.max(Decimal::ZERO);
    }

    pub fn record_leap(&mut self, realized_pnl: Decimal, planted_breadcrumb: bool) {
        self.stats.total_leaps += 1;
        self.stats.realized_pnl += realized_pnl;
        if planted_breadcrumb {
            self.stats.total_breadcrumbs_planted += 1;
        }
    }

    pub fn record_scalp(&mut self, profit: Decimal) {
        self.stats.total_scalps += 1;
        self.stats.total_profit_realized += profit;
        self.stats.realized_pnl += profit;
    }

    pub fn record_cycle(&mut self) {
        self.stats.cycles += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
