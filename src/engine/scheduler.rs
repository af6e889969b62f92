//! Cycle scheduler: the PROTECT → SCAN → UPDATE → ANALYZE → LEAP → SCALP →
//! RECORD loop.
//!
//! Owns the ledger. Every mutation happens inside `run_cycle`, one tick at a
//! time; the only suspension points are the snapshot fetch, balance reloads
//! and the sleep between ticks.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::engine::accountant::{Accountant, CycleReport, ValueCheckpoint};
use crate::engine::aggregator::BalanceAggregator;
use crate::engine::executor::LeapExecutor;
use crate::engine::scalper::ScalpHarvester;
use crate::portfolio::{FullReport, Ledger};
use crate::sources::MarketDataSource;
use crate::storage::StateStore;
use crate::strategy::OpportunityScorer;
use crate::types::{
    Cash, CyclePhase, CycleStats, LeapError, LeapOpportunity, MarketSnapshot, Provenance, DEFAULT_DUST_THRESHOLD,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub snapshot_timeout: Duration,
    pub max_leaps_per_cycle: u32,
    pub scalping_enabled: bool,
    pub cash_symbol: String,
    pub cash_exchange: String,
    pub dust_threshold: Decimal,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            snapshot_timeout: Duration::from_secs(15),
            max_leaps_per_cycle: 1,
            scalping_enabled: true,
            cash_symbol: "USD".into(),
            cash_exchange: "binance".into(),
            dust_threshold: DEFAULT_DUST_THRESHOLD,
        }
    }
}

/// How the ledger was obtained at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Boot {
    /// Loaded from the state file.
    Restored,
    /// Populated from venue balances; `Stale` when they came from the cache.
    ColdStart(Provenance),
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct CycleScheduler {
    ledger: Ledger,
    market: Arc<dyn MarketDataSource>,
    aggregator: BalanceAggregator,
    scorer: Arc<OpportunityScorer>,
    executor: LeapExecutor,
    harvester: ScalpHarvester,
    store: StateStore,
    config: SchedulerConfig,
    last_report: Option<CycleReport>,
}

impl CycleScheduler {
    pub fn new(
        market: Arc<dyn MarketDataSource>,
        aggregator: BalanceAggregator,
        scorer: Arc<OpportunityScorer>,
        executor: LeapExecutor,
        harvester: ScalpHarvester,
        store: StateStore,
        config: SchedulerConfig,
    ) -> Self {
        let ledger = Ledger::new(Cash::new(&config.cash_symbol, Decimal::ZERO, &config.cash_exchange))
            .with_dust_threshold(config.dust_threshold);
        Self {
            ledger,
            market,
            aggregator,
            scorer,
            executor,
            harvester,
            store,
            config,
            last_report: None,
        }
    }

    /// Start from a known ledger instead of bootstrapping.
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger.with_dust_threshold(self.config.dust_threshold);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn last_cycle_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    /// Read-only snapshot of the ledger for reporting.
    pub fn get_full_report(&self) -> FullReport {
        FullReport::from_ledger(&self.ledger)
    }

    /// Restore the last saved state, or cold-start from venue balances.
    pub async fn bootstrap(&mut self) -> Result<Boot, LeapError> {
        if let Some(ledger) = self.store.load()? {
            self.ledger = ledger.with_dust_threshold(self.config.dust_threshold);
            info!(report = %self.get_full_report(), "Resumed from saved state");
            return Ok(Boot::Restored);
        }

        info!(venues = self.aggregator.venue_count(), "Cold start, aggregating balances");
        let (_, provenance) = self.reload_balances().await?;
        if let Err(e) = self.store.save(&self.ledger) {
            error!(error = %e, "Failed to persist cold-start state");
        }
        Ok(Boot::ColdStart(provenance))
    }

    /// Replace friends and cash with freshly aggregated venue balances.
    /// Breadcrumbs and lifetime statistics are kept.
    ///
    /// Returns the number of friends populated and where the balances came
    /// from. Cached balances suspend trading until a live reload succeeds.
    pub async fn reload_balances(&mut self) -> Result<(usize, Provenance), LeapError> {
        let aggregation = self.aggregator.aggregate().await?;
        if !aggregation.provenance.is_trustworthy() {
            warn!(provenance = %aggregation.provenance, "Populating ledger from cached balances, trading suspended");
        }
        let snapshot = self.fetch_snapshot().await?;
        let populated = self.aggregator.populate(&mut self.ledger, &aggregation, &snapshot);

        info!(
            friends = populated,
            cash = %self.ledger.cash().balance.round_dp(2),
            total_value = %self.ledger.total_value().round_dp(2),
            provenance = %aggregation.provenance,
            "Ledger populated from balances"
        );
        Ok((populated, aggregation.provenance))
    }

    /// Run one complete tick. Every phase is visited, in order, even when
    /// missing data or a broken invariant turns the trading phases into no-ops.
    pub async fn run_cycle(&mut self) -> CycleStats {
        let mut stats = CycleStats::new(self.ledger.stats().cycles + 1);
        let mut snapshot: Option<MarketSnapshot> = None;
        let mut opportunities: Vec<LeapOpportunity> = Vec::new();
        let mut checkpoint = ValueCheckpoint::capture(&self.ledger);
        let baseline = self.ledger.stats().clone();

        info!(cycle = stats.cycle_number, "Starting cycle");

        for phase in CyclePhase::ORDER {
            stats.phases.push(phase);
            let trading = !stats.halted && snapshot.is_some() && stats.provenance.is_trustworthy();

            match phase {
                CyclePhase::Protect => {
                    let pruned = self.ledger.prune_dust();
                    if !pruned.is_empty() {
                        info!(symbols = ?pruned, "Pruned dust positions");
                    }
                    let problems = self.ledger.check_invariants();
                    if !problems.is_empty() {
                        for problem in &problems {
                            error!(%problem, "Ledger invariant violated");
                        }
                        warn!("Trading halted for this cycle");
                        stats.halted = true;
                    }
                }
                CyclePhase::Scan => match self.fetch_snapshot().await {
                    Ok(s) => {
                        stats.provenance = self.ledger.balance_provenance().clone();
                        snapshot = Some(s);
                    }
                    Err(e) => {
                        warn!(error = %e, "No market data, skipping trading phases");
                        stats.provenance = Provenance::Unavailable;
                    }
                },
                CyclePhase::Update => {
                    if let Some(s) = &snapshot {
                        if !stats.provenance.is_trustworthy() {
                            stats.provenance = self.retry_stale_balances(s).await;
                        }
                        let updated = self.ledger.update_prices(s);
                        debug!(updated, "Prices refreshed");
                    }
                    checkpoint = ValueCheckpoint::capture(&self.ledger);
                }
                CyclePhase::Analyze => {
                    if let Some(s) = &snapshot {
                        opportunities = self.analyze(s);
                        stats.opportunities_found = opportunities.len();
                    }
                }
                CyclePhase::Leap => {
                    if let (true, Some(s)) = (trading, &snapshot) {
                        self.leap(&opportunities, s, &mut stats);
                    }
                }
                CyclePhase::Scalp => {
                    if trading && self.config.scalping_enabled {
                        let receipts = self.harvester.harvest(&mut self.ledger);
                        stats.scalps_executed = receipts.len() as u32;
                    }
                }
                CyclePhase::Record => {
                    let now = self.ledger.stats();
                    stats.breadcrumbs_planted =
                        (now.total_breadcrumbs_planted - baseline.total_breadcrumbs_planted) as u32;
                    stats.profit_realized = now.total_profit_realized - baseline.total_profit_realized;
                    stats.fees_paid = now.total_fees_paid - baseline.total_fees_paid;

                    self.last_report = Some(Accountant::reconcile(&self.ledger, &checkpoint, &stats));
                    self.ledger.record_cycle();

                    match self.store.save(&self.ledger) {
                        Ok(()) => stats.persisted = true,
                        Err(e) => error!(error = %e, "Failed to persist state, continuing in memory"),
                    }
                }
            }
        }

        info!(cycle = stats.cycle_number, summary = %stats, report = %self.get_full_report(), "Cycle complete");
        stats
    }

    /// Tick until `stop` turns true (or its sender goes away). The signal is
    /// honoured between ticks, never inside one.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            max_leaps = self.config.max_leaps_per_cycle,
            "Scheduler started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            let stats = self.run_cycle().await;
            if stats.halted {
                warn!(cycle = stats.cycle_number, "Cycle ran halted");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(report = %self.get_full_report(), "Scheduler stopped");
    }

    // -- Phases --------------------------------------------------------------

    async fn fetch_snapshot(&self) -> Result<MarketSnapshot, LeapError> {
        let name = self.market.name().to_string();
        match tokio::time::timeout(self.config.snapshot_timeout, self.market.fetch_snapshot()).await {
            Err(_) => Err(LeapError::unavailable(&name, "snapshot fetch timed out")),
            Ok(Err(e)) => Err(LeapError::unavailable(&name, e.to_string())),
            Ok(Ok(s)) if s.is_empty() => Err(LeapError::unavailable(&name, "empty snapshot")),
            Ok(Ok(s)) => {
                debug!(source = %name, symbols = s.len(), "Snapshot fetched");
                Ok(s)
            }
        }
    }

    /// Try a live reload while the ledger sits on cached balances. Returns
    /// the provenance the tick should run with.
    async fn retry_stale_balances(&mut self, snapshot: &MarketSnapshot) -> Provenance {
        let aggregation = match self.aggregator.aggregate().await {
            Ok(a) if a.provenance.is_trustworthy() => a,
            Ok(_) => {
                debug!("Venues still down, keeping cached balances");
                return self.ledger.balance_provenance().clone();
            }
            Err(e) => {
                warn!(error = %e, "Balance reload failed, keeping cached balances");
                return self.ledger.balance_provenance().clone();
            }
        };

        let populated = self.aggregator.populate(&mut self.ledger, &aggregation, snapshot);
        info!(
            friends = populated,
            provenance = %aggregation.provenance,
            "Live balances restored, trading resumes"
        );
        aggregation.provenance
    }

    /// Score every source; best multiplier first across all of them.
    fn analyze(&self, snapshot: &MarketSnapshot) -> Vec<LeapOpportunity> {
        let mut all: Vec<LeapOpportunity> = self
            .ledger
            .leap_sources()
            .iter()
            .flat_map(|source| self.scorer.find_leap_opportunities(source, snapshot))
            .collect();
        all.sort_by(|a, b| {
            b.fee_adjusted_multiplier
                .cmp(&a.fee_adjusted_multiplier)
                .then_with(|| a.from_symbol.cmp(&b.from_symbol))
                .then_with(|| a.to_symbol.cmp(&b.to_symbol))
        });
        if let Some(best) = all.first() {
            info!(count = all.len(), best = %best, "Leap opportunities");
        } else {
            debug!("No leap clears breakeven this cycle");
        }
        all
    }

    fn leap(&mut self, opportunities: &[LeapOpportunity], snapshot: &MarketSnapshot, stats: &mut CycleStats) {
        let mut touched: BTreeSet<String> = BTreeSet::new();
        for opp in opportunities {
            if stats.leaps_made >= self.config.max_leaps_per_cycle {
                break;
            }
            if touched.contains(&opp.from_symbol) || touched.contains(&opp.to_symbol) {
                debug!(from = %opp.from_symbol, to = %opp.to_symbol, "Skipping, holding already moved this cycle");
                continue;
            }
            if self.executor.execute(&mut self.ledger, opp, snapshot) {
                stats.leaps_made += 1;
                touched.insert(opp.from_symbol.clone());
                touched.insert(opp.to_symbol.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scalper::ScalpConfig;
    use crate::sources::file::StaticSnapshot;
    use crate::sources::MockMarketDataSource;
    use crate::strategy::{FeeModel, ScorerConfig};
    use crate::types::{Breadcrumb, Friend, MarketTick};
    use rust_decimal_macros::dec;

    fn temp_store() -> StateStore {
        StateStore::new(std::env::temp_dir().join(format!("leapfrog_sched_{}.json", uuid::Uuid::new_v4())))
    }

    fn snapshot(ticks: &[(&str, Decimal, Decimal)]) -> MarketSnapshot {
        let mut snap = MarketSnapshot::default();
        for (symbol, price, change) in ticks {
            snap.insert(symbol, MarketTick::new(*price, *change, dec!(1000000000)));
        }
        snap
    }

    fn scheduler(market: Arc<dyn MarketDataSource>, config: SchedulerConfig) -> CycleScheduler {
        let fees = FeeModel::default();
        let scorer = Arc::new(OpportunityScorer::new(ScorerConfig::default(), fees.clone()));
        CycleScheduler::new(
            market,
            BalanceAggregator::new(Vec::new()),
            scorer.clone(),
            LeapExecutor::new(scorer),
            ScalpHarvester::new(ScalpConfig::default(), fees),
            temp_store(),
            config,
        )
    }

    fn cash_ledger(amount: Decimal) -> Ledger {
        Ledger::new(Cash::new("USD", amount, "binance"))
    }

    #[tokio::test]
    async fn test_phases_in_order() {
        let market = StaticSnapshot::new(snapshot(&[("ETH", dec!(1800), dec!(-10))]));
        let mut s = scheduler(Arc::new(market), SchedulerConfig::default()).with_ledger(cash_ledger(dec!(1000)));

        let stats = s.run_cycle().await;
        assert_eq!(stats.phases, CyclePhase::ORDER.to_vec());
        assert_eq!(stats.leaps_made, 1);
        assert!(stats.persisted);
        assert_eq!(stats.provenance, Provenance::Live);
        assert!(s.ledger().friend("ETH").is_some());
        assert_eq!(s.ledger().stats().cycles, 1);
        assert!(s.last_cycle_report().unwrap().conserved);

        s.store().delete().unwrap();
    }

    #[tokio::test]
    async fn test_scan_failure_skips_trading() {
        let mut market = MockMarketDataSource::new();
        market.expect_name().return_const("flaky".to_string());
        market
            .expect_fetch_snapshot()
            .returning(|| Err(anyhow::anyhow!("connection reset")));
        let mut s = scheduler(Arc::new(market), SchedulerConfig::default()).with_ledger(cash_ledger(dec!(1000)));

        let stats = s.run_cycle().await;
        assert_eq!(stats.phases.len(), 7);
        assert_eq!(stats.provenance, Provenance::Unavailable);
        assert_eq!(stats.leaps_made, 0);
        assert_eq!(s.ledger().cash().balance, dec!(1000));
        assert!(stats.persisted);

        s.store().delete().unwrap();
    }

    #[tokio::test]
    async fn test_cached_balances_suspend_trading() {
        let market = StaticSnapshot::new(snapshot(&[("ETH", dec!(1800), dec!(-10))]));
        let cached_at = chrono::Utc::now() - chrono::Duration::hours(3);
        let ledger = cash_ledger(dec!(1000)).with_balance_provenance(Provenance::Stale { cached_at });
        let mut s = scheduler(Arc::new(market), SchedulerConfig::default()).with_ledger(ledger);

        for _ in 0..2 {
            let stats = s.run_cycle().await;
            assert_eq!(stats.provenance, Provenance::Stale { cached_at });
            assert_eq!(stats.opportunities_found, 1);
            assert_eq!(stats.leaps_made, 0);
            assert_eq!(stats.phases.len(), 7);
            assert!(stats.persisted);
        }
        assert_eq!(s.ledger().cash().balance, dec!(1000));
        assert!(s.ledger().friend("ETH").is_none());

        let reloaded = s.store().load().unwrap().unwrap();
        assert_eq!(reloaded.balance_provenance(), &Provenance::Stale { cached_at });
        s.store().delete().unwrap();
    }

    #[tokio::test]
    async fn test_invariant_violation_halts_trading() {
        let market = StaticSnapshot::new(snapshot(&[("ETH", dec!(1800), dec!(-10)), ("BAD", dec!(1), dec!(0))]));
        let mut ledger = cash_ledger(dec!(1000));
        ledger.add_friend(Friend::new("BAD", dec!(1), dec!(-5), dec!(1), "binance"));
        let mut s = scheduler(Arc::new(market), SchedulerConfig::default()).with_ledger(ledger);

        let stats = s.run_cycle().await;
        assert!(stats.halted);
        assert_eq!(stats.phases.len(), 7);
        assert_eq!(stats.leaps_made, 0);
        assert_eq!(s.ledger().cash().balance, dec!(1000));

        s.store().delete().unwrap();
    }

    #[tokio::test]
    async fn test_touched_holdings_not_leapt_twice() {
        let market = StaticSnapshot::new(snapshot(&[
            ("SOL", dec!(120), dec!(2)),
            ("ETH", dec!(1800), dec!(-12)),
            ("BTC", dec!(40000), dec!(-30)),
        ]));
        let mut ledger = cash_ledger(dec!(1000));
        ledger.add_friend(Friend::new("SOL", dec!(10), dec!(1000), dec!(120), "binance"));
        let config = SchedulerConfig {
            max_leaps_per_cycle: 2,
            scalping_enabled: false,
            ..SchedulerConfig::default()
        };
        let mut s = scheduler(Arc::new(market), config).with_ledger(ledger);

        let stats = s.run_cycle().await;
        assert_eq!(stats.leaps_made, 2);
        assert_eq!(stats.breadcrumbs_planted, 1);
        // SOL -> BTC ranks first; USD -> BTC and SOL -> ETH are then blocked.
        assert!(s.ledger().friend("SOL").is_none());
        assert!(s.ledger().breadcrumb("SOL").is_some());
        assert!(s.ledger().friend("BTC").is_some());
        assert!(s.ledger().friend("ETH").is_some());
        assert_eq!(s.ledger().cash().balance, dec!(50));

        s.store().delete().unwrap();
    }

    #[tokio::test]
    async fn test_scalp_phase_harvests() {
        let market = StaticSnapshot::new(snapshot(&[("SOL", dec!(110), dec!(0))]));
        let mut ledger = cash_ledger(Decimal::ZERO);
        ledger.plant_breadcrumb(Breadcrumb::new("SOL", dec!(2), dec!(200), dec!(100), "binance"));
        let mut s = scheduler(Arc::new(market), SchedulerConfig::default()).with_ledger(ledger);

        let stats = s.run_cycle().await;
        assert_eq!(stats.scalps_executed, 1);
        assert!(stats.profit_realized > Decimal::ZERO);
        assert_eq!(s.ledger().breadcrumb("SOL").unwrap().quantity, dec!(1));

        s.store().delete().unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let market = StaticSnapshot::new(snapshot(&[("ETH", dec!(1800), dec!(0))]));
        let config = SchedulerConfig { tick_interval: Duration::from_millis(10), ..SchedulerConfig::default() };
        let mut s = scheduler(Arc::new(market), config).with_ledger(cash_ledger(dec!(100)));

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });
        s.run(rx).await;

        assert!(s.ledger().stats().cycles >= 1);
        s.store().delete().unwrap();
    }

    #[tokio::test]
    async fn test_run_with_stop_already_set_does_nothing() {
        let market = StaticSnapshot::default();
        let mut s = scheduler(Arc::new(market), SchedulerConfig::default());
        let (_tx, rx) = watch::channel(true);
        s.run(rx).await;
        assert_eq!(s.ledger().stats().cycles, 0);
    }

    #[tokio::test]
    async fn test_bootstrap_restores_saved_state() {
        let store = temp_store();
        let mut saved = cash_ledger(dec!(321));
        saved.record_cycle();
        store.save(&saved).unwrap();

        let fees = FeeModel::default();
        let scorer = Arc::new(OpportunityScorer::new(ScorerConfig::default(), fees.clone()));
        let mut s = CycleScheduler::new(
            Arc::new(StaticSnapshot::default()),
            BalanceAggregator::new(Vec::new()),
            scorer.clone(),
            LeapExecutor::new(scorer),
            ScalpHarvester::new(ScalpConfig::default(), fees),
            store.clone(),
            SchedulerConfig::default(),
        );

        assert_eq!(s.bootstrap().await.unwrap(), Boot::Restored);
        assert_eq!(s.ledger(), &saved);
        store.delete().unwrap();
    }

    #[tokio::test]
    async fn test_cold_start_without_venues_fails() {
        let mut s = scheduler(Arc::new(StaticSnapshot::default()), SchedulerConfig::default());
        assert!(matches!(s.bootstrap().await, Err(LeapError::DataUnavailable { .. })));
    }
}
