//! Leap opportunity scoring.
//!
//! Prices every candidate reallocation out of one source under two-leg
//! fee/slippage arithmetic, applies the baggage-aware breakeven threshold,
//! and returns the survivors best-first. Pure: reads a source and a
//! snapshot, never the ledger itself.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error};

use crate::portfolio::LeapSource;
use crate::strategy::fees::FeeModel;
use crate::types::{Friend, LeapError, LeapOpportunity, MarketSnapshot, MONEY_DP};

const HUNDRED: Decimal = dec!(100);

// ---------------------------------------------------------------------------
// Configuration (defaults, overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Share of a clear source's quantity kept behind as a breadcrumb.
    pub breadcrumb_fraction: Decimal,
    /// Extra percentage points of dip advantage demanded above breakeven.
    pub safety_margin_pct: Decimal,
    /// Targets trading less than this over 24h are ignored.
    pub min_volume_24h: Decimal,
    /// Dip advantages below this are noise, whatever the fees.
    pub min_dip_advantage_pct: Decimal,
    /// Qualifying candidates closer than this to each other are ambiguous
    /// and all dropped.
    pub ambiguity_band_pct: Decimal,
    /// Quote-currency symbols; never leap targets.
    pub cash_symbols: Vec<String>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            breadcrumb_fraction: dec!(0.05),
            safety_margin_pct: dec!(0.5),
            min_volume_24h: dec!(500000),
            min_dip_advantage_pct: dec!(1.0),
            ambiguity_band_pct: dec!(1.0),
            cash_symbols: vec!["USD".into(), "USDT".into(), "USDC".into()],
        }
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

pub struct OpportunityScorer {
    config: ScorerConfig,
    fees: FeeModel,
}

impl OpportunityScorer {
    pub fn new(config: ScorerConfig, fees: FeeModel) -> Self {
        Self { config, fees }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn fees(&self) -> &FeeModel {
        &self.fees
    }

    pub fn is_cash_symbol(&self, symbol: &str) -> bool {
        self.config.cash_symbols.iter().any(|c| c.eq_ignore_ascii_case(symbol))
    }

    /// Every qualifying leap out of `source`, best multiplier first.
    ///
    /// An empty list is the normal answer when nothing clears breakeven.
    pub fn find_leap_opportunities(&self, source: &LeapSource, snapshot: &MarketSnapshot) -> Vec<LeapOpportunity> {
        let fee = self.fees.for_exchange(source.exchange());

        // Price the source once to check the venue minimum before scanning targets.
        let (gross, _) = match self.leapable(source, snapshot) {
            Ok(v) => v,
            Err(e) => {
                debug!(source = source.symbol(), error = %e, "Source not scorable this tick");
                return Vec::new();
            }
        };
        if gross < fee.min_trade_size {
            debug!(
                source = source.symbol(),
                leapable = %gross.round_dp(2),
                min_trade = %fee.min_trade_size,
                "Leapable value below venue minimum"
            );
            return Vec::new();
        }

        let mut qualifying: Vec<LeapOpportunity> = Vec::new();

        for (symbol, tick) in &snapshot.ticks {
            if symbol == source.symbol() || self.is_cash_symbol(symbol) {
                continue;
            }
            if tick.price <= Decimal::ZERO {
                continue;
            }
            if tick.volume_24h < self.config.min_volume_24h {
                debug!(target = %symbol, volume = %tick.volume_24h, "Below liquidity floor");
                continue;
            }

            let opp = match self.price_leap(source, symbol, snapshot) {
                Ok(opp) => opp,
                Err(LeapError::InvariantViolation(msg)) => {
                    error!(source = source.symbol(), target = %symbol, %msg, "Discarding candidate: invariant violation");
                    continue;
                }
                Err(e) => {
                    debug!(source = source.symbol(), target = %symbol, error = %e, "Candidate skipped");
                    continue;
                }
            };

            if opp.dip_advantage < self.config.min_dip_advantage_pct {
                debug!(
                    source = source.symbol(),
                    target = %symbol,
                    dip_advantage = %opp.dip_advantage.round_dp(2),
                    "Dip advantage below noise floor"
                );
                continue;
            }

            if !opp.clears_breakeven() {
                debug!(
                    source = source.symbol(),
                    target = %symbol,
                    dip_advantage = %opp.dip_advantage.round_dp(2),
                    required = %opp.required_dip_advantage.round_dp(2),
                    multiplier = %opp.fee_adjusted_multiplier.round_dp(6),
                    "Below breakeven"
                );
                continue;
            }

            qualifying.push(opp);
        }

        let mut survivors = self.drop_ambiguous(qualifying);
        survivors.sort_by(|a, b| {
            b.fee_adjusted_multiplier
                .cmp(&a.fee_adjusted_multiplier)
                .then_with(|| a.to_symbol.cmp(&b.to_symbol))
        });

        if !survivors.is_empty() {
            debug!(
                source = source.symbol(),
                count = survivors.len(),
                best = %survivors[0],
                "Leap opportunities found"
            );
        }
        survivors
    }

    /// Price one source → target leap without judging it.
    ///
    /// Errors with `DataUnavailable` when either side is missing from the
    /// snapshot, and `InvariantViolation` when the numbers cannot be right.
    pub fn price_leap(
        &self,
        source: &LeapSource,
        target: &str,
        snapshot: &MarketSnapshot,
    ) -> Result<LeapOpportunity, LeapError> {
        let fee = self.fees.for_exchange(source.exchange());
        let (from_price, from_change) = self.source_quote(source, snapshot)?;
        let target_tick = snapshot
            .get(target)
            .ok_or_else(|| LeapError::unavailable("snapshot", format!("no tick for {target}")))?;

        if target_tick.price <= Decimal::ZERO {
            return Err(LeapError::InvariantViolation(format!(
                "{target} priced at {}",
                target_tick.price
            )));
        }

        let (gross, source_quantity) = self.leapable(source, snapshot)?;
        if gross <= Decimal::ZERO {
            return Err(LeapError::unavailable(source.symbol(), "nothing to leap"));
        }
        let breadcrumb_quantity = match source {
            LeapSource::Friend(f) if self.priced(f, from_price).is_clear() => f.quantity - source_quantity,
            _ => Decimal::ZERO,
        };

        // Sell leg first, then the buy leg spends what the sell leg left.
        let rate_fee = fee.taker_fee;
        let rate_slip = fee.slippage_estimate;
        let (sell_fee, sell_slip) = if source.is_cash() {
            (Decimal::ZERO, Decimal::ZERO)
        } else {
            (
                (gross * rate_fee).round_dp(MONEY_DP),
                (gross * rate_slip).round_dp(MONEY_DP),
            )
        };
        let post_sell = gross - sell_fee - sell_slip;
        let buy_fee = (post_sell * rate_fee).round_dp(MONEY_DP);
        let buy_slip = (post_sell * rate_slip).round_dp(MONEY_DP);
        let net = post_sell - buy_fee - buy_slip;

        let slippage_cost = sell_slip + buy_slip;
        let total_fees = sell_fee + buy_fee + slippage_cost;

        let to_change = target_tick.change_24h_pct;
        let source_recovery = Decimal::ONE + from_change / HUNDRED;
        let target_recovery = Decimal::ONE + to_change / HUNDRED;
        if source_recovery <= Decimal::ZERO || target_recovery <= Decimal::ZERO {
            return Err(LeapError::InvariantViolation(format!(
                "24h change at or below -100% ({}: {from_change}, {target}: {to_change})",
                source.symbol()
            )));
        }

        let baggage_percent = match source {
            LeapSource::Friend(f) => self.priced(f, from_price).baggage_percent(),
            LeapSource::Cash(_) => Decimal::ZERO,
        };

        // Destination units at their pre-dip price versus leapt source units
        // at theirs. An underwater source is valued at its cost basis, so the
        // realised baggage counts against the leap.
        let baggage_retained = Decimal::ONE - baggage_percent / HUNDRED;
        let multiplier = (net / gross) * baggage_retained * source_recovery / target_recovery;
        if multiplier <= Decimal::ZERO {
            return Err(LeapError::InvariantViolation(format!(
                "fee-adjusted multiplier {multiplier} for {} -> {target}",
                source.symbol()
            )));
        }

        let fee_percent = total_fees / gross * HUNDRED;
        let dip_advantage = from_change - to_change;

        Ok(LeapOpportunity {
            from_symbol: source.symbol().to_string(),
            to_symbol: target.to_string(),
            exchange: source.exchange().to_string(),
            from_is_cash: source.is_cash(),
            from_price,
            to_price: target_tick.price,
            from_change_24h: from_change,
            to_change_24h: to_change,
            dip_advantage,
            source_quantity,
            breadcrumb_quantity,
            gross_value: gross,
            sell_fee_cost: sell_fee,
            buy_fee_cost: buy_fee,
            slippage_cost,
            total_fees,
            post_sell_value: post_sell,
            net_value_after_fees: net,
            fee_percent,
            baggage_percent,
            required_dip_advantage: fee_percent + baggage_percent + self.config.safety_margin_pct,
            fee_adjusted_multiplier: multiplier,
        })
    }

    /// (gross value, source units) that would leave the source.
    fn leapable(&self, source: &LeapSource, snapshot: &MarketSnapshot) -> Result<(Decimal, Decimal), LeapError> {
        let (price, _) = self.source_quote(source, snapshot)?;
        let fraction = self.config.breadcrumb_fraction;
        let quantity = match source {
            LeapSource::Cash(c) => c.balance - c.balance * fraction,
            LeapSource::Friend(f) => {
                if self.priced(f, price).is_clear() {
                    f.quantity - f.quantity * fraction
                } else {
                    f.quantity
                }
            }
        };
        if quantity < Decimal::ZERO {
            return Err(LeapError::InvariantViolation(format!(
                "negative leapable quantity for {}",
                source.symbol()
            )));
        }
        Ok((quantity * price, quantity))
    }

    /// Source price and 24h change. Cash is 1 and 0.
    fn source_quote(&self, source: &LeapSource, snapshot: &MarketSnapshot) -> Result<(Decimal, Decimal), LeapError> {
        match source {
            LeapSource::Cash(_) => Ok((Decimal::ONE, Decimal::ZERO)),
            LeapSource::Friend(f) => {
                let tick = snapshot
                    .get(&f.symbol)
                    .ok_or_else(|| LeapError::unavailable("snapshot", format!("no tick for source {}", f.symbol)))?;
                if tick.price <= Decimal::ZERO {
                    return Err(LeapError::InvariantViolation(format!(
                        "source {} priced at {}",
                        f.symbol, tick.price
                    )));
                }
                Ok((tick.price, tick.change_24h_pct))
            }
        }
    }

    fn priced(&self, friend: &Friend, price: Decimal) -> Friend {
        let mut f = friend.clone();
        f.update_price(price);
        f
    }

    /// Drop every qualifying candidate that has a rival within the ambiguity band.
    fn drop_ambiguous(&self, candidates: Vec<LeapOpportunity>) -> Vec<LeapOpportunity> {
        let band = self.config.ambiguity_band_pct;
        if band <= Decimal::ZERO || candidates.len() < 2 {
            return candidates;
        }
        let advantages: Vec<Decimal> = candidates.iter().map(|c| c.dip_advantage).collect();
        candidates
            .into_iter()
            .enumerate()
            .filter(|(i, c)| {
                let contested = advantages
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != *i && (c.dip_advantage - *other).abs() < band);
                if contested {
                    debug!(target = %c.to_symbol, dip_advantage = %c.dip_advantage, "Ambiguous candidate dropped");
                }
                !contested
            })
            .map(|(_, c)| c)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
