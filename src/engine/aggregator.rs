//! Balance aggregator.
//!
//! Collects balances from every configured venue concurrently, merges
//! assets held in more than one place, and attaches the best cost basis
//! available. Used once at cold start and on an explicit reload; the ledger
//! is the source of truth between reloads.

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::portfolio::Ledger;
use crate::sources::cost_basis::AverageCostBook;
use crate::sources::{BalanceSource, CostBasisProvider, NoCostBasis};
use crate::types::{Friend, LeapError, MarketSnapshot, Provenance, DEFAULT_DUST_THRESHOLD};

pub const MERGED_EXCHANGE: &str = "merged";

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Where a holding's cost basis came from, most to least trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasisSource {
    Fifo,
    AverageCost,
    /// Nothing on record; cost is taken as current value at population time.
    Assumed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedHolding {
    pub asset: String,
    pub quantity: Decimal,
    /// The venue, or `"merged"` when held on several.
    pub exchange: String,
    pub venues: Vec<String>,
    pub cost_basis: Option<Decimal>,
    pub basis_source: BasisSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub holdings: BTreeMap<String, AggregatedHolding>,
    pub cash: Decimal,
    /// The venue holding the cash, `"merged"` when several do, `None` when
    /// no venue reported any.
    pub cash_exchange: Option<String>,
    pub provenance: Provenance,
}

/// Last good per-venue balances, kept for when every venue is down.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BalanceCache {
    cached_at: DateTime<Utc>,
    venues: BTreeMap<String, BTreeMap<String, Decimal>>,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

pub struct BalanceAggregator {
    sources: Vec<Arc<dyn BalanceSource>>,
    cost_basis: Arc<dyn CostBasisProvider>,
    average_costs: AverageCostBook,
    cache_path: Option<PathBuf>,
    venue_timeout: Duration,
    cash_symbols: Vec<String>,
    dust_threshold: Decimal,
}

impl BalanceAggregator {
    pub fn new(sources: Vec<Arc<dyn BalanceSource>>) -> Self {
        Self {
            sources,
            cost_basis: Arc::new(NoCostBasis),
            average_costs: AverageCostBook::default(),
            cache_path: None,
            venue_timeout: Duration::from_secs(10),
            cash_symbols: vec!["USD".into(), "USDT".into(), "USDC".into()],
            dust_threshold: DEFAULT_DUST_THRESHOLD,
        }
    }

    pub fn with_cost_basis(mut self, provider: Arc<dyn CostBasisProvider>) -> Self {
        self.cost_basis = provider;
        self
    }

    pub fn with_average_costs(mut self, book: AverageCostBook) -> Self {
        self.average_costs = book;
        self
    }

    pub fn with_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.venue_timeout = timeout;
        self
    }

    pub fn with_cash_symbols(mut self, symbols: Vec<String>) -> Self {
        self.cash_symbols = symbols.into_iter().map(|s| s.to_uppercase()).collect();
        self
    }

    pub fn with_dust_threshold(mut self, dust: Decimal) -> Self {
        self.dust_threshold = dust;
        self
    }

    pub fn venue_count(&self) -> usize {
        self.sources.len()
    }

    /// Query every venue at once, each bounded by the venue timeout.
    pub async fn aggregate(&self) -> Result<Aggregation, LeapError> {
        if self.sources.is_empty() {
            return Err(LeapError::unavailable("balances", "no balance sources configured"));
        }

        let timeout = self.venue_timeout;
        let fetches = self.sources.iter().map(|source| async move {
            let exchange = source.exchange().to_string();
            let result = tokio::time::timeout(timeout, source.get_balances()).await;
            (exchange, result)
        });

        let mut per_venue: BTreeMap<String, BTreeMap<String, Decimal>> = BTreeMap::new();
        let mut failed: Vec<String> = Vec::new();

        for (exchange, result) in join_all(fetches).await {
            match result {
                Ok(Ok(balances)) => {
                    debug!(exchange = %exchange, assets = balances.len(), "Venue balances fetched");
                    per_venue.insert(exchange, balances);
                }
                Ok(Err(e)) => {
                    warn!(exchange = %exchange, error = %e, "Venue balance fetch failed, omitting");
                    failed.push(exchange);
                }
                Err(_) => {
                    warn!(exchange = %exchange, timeout_ms = timeout.as_millis() as u64, "Venue balance fetch timed out, omitting");
                    failed.push(exchange);
                }
            }
        }

        if per_venue.is_empty() {
            return self.from_cache().await;
        }

        let provenance = if failed.is_empty() {
            if let Err(e) = self.write_cache(&per_venue).await {
                warn!(error = %e, "Failed to write balance cache");
            }
            Provenance::Live
        } else {
            Provenance::Partial { failed }
        };

        let aggregation = self.merge(&per_venue, provenance);
        info!(
            venues = per_venue.len(),
            holdings = aggregation.holdings.len(),
            cash = %aggregation.cash.round_dp(2),
            provenance = %aggregation.provenance,
            "Balances aggregated"
        );
        Ok(aggregation)
    }

    /// Replace the ledger's holdings with an aggregation, priced from `snapshot`.
    ///
    /// Quantities already tracked as breadcrumbs are not counted twice.
    /// Assets with no price in the snapshot are skipped. The cash venue and
    /// the aggregation's provenance are recorded on the ledger. Returns the
    /// number of friends populated.
    pub fn populate(&self, ledger: &mut Ledger, aggregation: &Aggregation, snapshot: &MarketSnapshot) -> usize {
        ledger.clear_holdings();
        ledger.credit_cash(aggregation.cash);
        ledger.mark_reloaded(aggregation.provenance.clone(), aggregation.cash_exchange.as_deref());

        let mut populated = 0;
        for holding in aggregation.holdings.values() {
            let Some(price) = snapshot.price(&holding.asset).filter(|p| *p > Decimal::ZERO) else {
                warn!(asset = %holding.asset, "No price for held asset, not tracked this load");
                continue;
            };

            let crumb_quantity = ledger
                .breadcrumb(&holding.asset)
                .map(|b| b.quantity)
                .unwrap_or(Decimal::ZERO);
            let quantity = holding.quantity - crumb_quantity;
            if quantity <= self.dust_threshold {
                continue;
            }

            let cost = match holding.cost_basis {
                Some(total) => total * quantity / holding.quantity,
                None => {
                    warn!(
                        asset = %holding.asset,
                        value = %(quantity * price).round_dp(2),
                        "No cost basis on record, assuming current value (low confidence)"
                    );
                    quantity * price
                }
            };

            ledger.add_friend(Friend::new(&holding.asset, quantity, cost, price, &holding.exchange));
            populated += 1;
        }
        populated
    }

    fn merge(&self, per_venue: &BTreeMap<String, BTreeMap<String, Decimal>>, provenance: Provenance) -> Aggregation {
        let mut quantities: BTreeMap<String, Vec<(String, Decimal)>> = BTreeMap::new();
        let mut cash = Decimal::ZERO;
        let mut cash_venues: Vec<String> = Vec::new();

        for (exchange, balances) in per_venue {
            for (asset, quantity) in balances {
                if *quantity <= self.dust_threshold {
                    continue;
                }
                let asset = asset.to_uppercase();
                if self.cash_symbols.contains(&asset) {
                    cash += *quantity;
                    if !cash_venues.contains(exchange) {
                        cash_venues.push(exchange.clone());
                    }
                    continue;
                }
                quantities.entry(asset).or_default().push((exchange.clone(), *quantity));
            }
        }

        let holdings = quantities
            .into_iter()
            .map(|(asset, venues)| {
                let holding = self.holding(&asset, &venues);
                (asset, holding)
            })
            .collect();

        Aggregation {
            holdings,
            cash,
            cash_exchange: match cash_venues.as_slice() {
                [] => None,
                [single] => Some(single.clone()),
                _ => Some(MERGED_EXCHANGE.to_string()),
            },
            provenance,
        }
    }

    fn holding(&self, asset: &str, venues: &[(String, Decimal)]) -> AggregatedHolding {
        let quantity: Decimal = venues.iter().map(|(_, q)| *q).sum();

        // FIFO only when every venue holding the asset has history for it.
        let fifo: Option<Decimal> = venues
            .iter()
            .map(|(exchange, q)| self.cost_basis.get_cost_basis(asset, exchange).map(|b| b.cost_for(*q)))
            .sum();

        let (cost_basis, basis_source) = match fifo {
            Some(cost) => (Some(cost), BasisSource::Fifo),
            None => match self.average_costs.avg_entry_price(asset) {
                Some(avg) => (Some(quantity * avg), BasisSource::AverageCost),
                None => (None, BasisSource::Assumed),
            },
        };

        AggregatedHolding {
            asset: asset.to_string(),
            quantity,
            exchange: match venues {
                [(single, _)] => single.clone(),
                _ => MERGED_EXCHANGE.to_string(),
            },
            venues: venues.iter().map(|(e, _)| e.clone()).collect(),
            cost_basis,
            basis_source,
        }
    }

    async fn write_cache(&self, per_venue: &BTreeMap<String, BTreeMap<String, Decimal>>) -> anyhow::Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        let cache = BalanceCache {
            cached_at: Utc::now(),
            venues: per_venue.clone(),
        };
        let json = serde_json::to_string_pretty(&cache).context("Failed to serialize balance cache")?;
        ensure_parent(path).await?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write balance cache: {}", path.display()))?;
        Ok(())
    }

    async fn from_cache(&self) -> Result<Aggregation, LeapError> {
        let Some(path) = &self.cache_path else {
            return Err(LeapError::unavailable("balances", "every venue failed and no cache is configured"));
        };
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LeapError::unavailable("balances", format!("every venue failed, no cache: {e}")))?;
        let cache: BalanceCache = serde_json::from_str(&json)
            .map_err(|e| LeapError::unavailable("balances", format!("balance cache unreadable: {e}")))?;

        warn!(cached_at = %cache.cached_at, "Every venue failed, using cached balances");
        Ok(self.merge(&cache.venues, Provenance::Stale { cached_at: cache.cached_at }))
    }
}

async fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
