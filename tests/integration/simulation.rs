//! Multi-tick simulation harness.
//!
//! Drives the full PROTECT → RECORD pipeline against scripted market data
//! and in-memory venues, checking the money invariants tick by tick and
//! the restart path after an interrupted tick.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use leapfrog::engine::aggregator::MERGED_EXCHANGE;
use leapfrog::engine::{
    BalanceAggregator, Boot, CycleScheduler, LeapExecutor, ScalpConfig, ScalpHarvester, SchedulerConfig,
};
use leapfrog::portfolio::{FullReport, Ledger};
use leapfrog::sources::{BalanceSource, MarketDataSource};
use leapfrog::storage::{PersistedState, StateStore};
use leapfrog::strategy::{FeeModel, OpportunityScorer, ScorerConfig};
use leapfrog::types::{Cash, CyclePhase, Provenance};

use crate::mock_sources::{snapshot, MockVenue, ScriptedMarket};

fn temp_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("leapfrog_it_{tag}_{}.json", uuid::Uuid::new_v4()))
}

fn scorer() -> Arc<OpportunityScorer> {
    Arc::new(OpportunityScorer::new(ScorerConfig::default(), FeeModel::default()))
}

fn engine(
    market: Arc<dyn MarketDataSource>,
    aggregator: BalanceAggregator,
    store: StateStore,
    config: SchedulerConfig,
) -> CycleScheduler {
    let scorer = scorer();
    CycleScheduler::new(
        market,
        aggregator,
        scorer.clone(),
        LeapExecutor::new(scorer),
        ScalpHarvester::new(ScalpConfig::default(), FeeModel::default()),
        store,
        config,
    )
}

fn cash_ledger(amount: Decimal) -> Ledger {
    Ledger::new(Cash::new("USD", amount, "binance"))
}

#[test]
fn test_full_report_drops_by_exactly_the_fees() {
    let snap = snapshot(&[("ETH", dec!(2000), dec!(-10)), ("SOL", dec!(100), dec!(1))]);
    let mut ledger = cash_ledger(dec!(1000));
    let scorer = scorer();

    let source = ledger.leap_sources().remove(0);
    let opps = scorer.find_leap_opportunities(&source, &snap);
    assert_eq!(opps.len(), 1);
    let opp = &opps[0];
    assert_eq!(opp.to_symbol, "ETH");

    let before = FullReport::from_ledger(&ledger);
    let receipt = LeapExecutor::new(scorer.clone())
        .try_execute(&mut ledger, opp, &snap)
        .unwrap();
    let after = FullReport::from_ledger(&ledger);

    assert_eq!(receipt.total_fees, opp.total_fees);
    assert_eq!(after.total_value, before.total_value - opp.total_fees);
    assert_eq!(after.stats.total_fees_paid, opp.total_fees);
    assert_eq!(after.stats.total_leaps, 1);
    assert!(ledger.check_invariants().is_empty());
}

#[tokio::test]
async fn test_multi_tick_invariants() {
    let market = Arc::new(ScriptedMarket::new(vec![
        snapshot(&[("ETH", dec!(2000), dec!(-10)), ("SOL", dec!(100), dec!(1))]),
        snapshot(&[("ETH", dec!(2200), dec!(0)), ("SOL", dec!(100), dec!(-8))]),
        snapshot(&[("ETH", dec!(2150), dec!(-2)), ("SOL", dec!(112), dec!(12))]),
        snapshot(&[("ETH", dec!(2150), dec!(0)), ("SOL", dec!(112), dec!(0))]),
    ]));
    let store = StateStore::new(temp_path("ticks"));
    let mut s = engine(market.clone(), BalanceAggregator::new(Vec::new()), store.clone(), SchedulerConfig::default())
        .with_ledger(cash_ledger(dec!(1000)));

    let mut fees_seen = Decimal::ZERO;
    let mut total_leaps = 0;
    for tick in 1..=4u64 {
        let stats = s.run_cycle().await;
        assert_eq!(stats.cycle_number, tick);
        assert_eq!(stats.phases, CyclePhase::ORDER.to_vec());
        assert!(stats.leaps_made <= 1);
        assert!(stats.persisted);

        let report = s.last_cycle_report().unwrap();
        assert!(report.conserved, "tick {tick} drifted by {}", report.drift);

        let fees = s.ledger().stats().total_fees_paid;
        assert!(fees >= fees_seen);
        fees_seen = fees;
        total_leaps += stats.leaps_made;

        assert!(s.ledger().check_invariants().is_empty());
    }

    // The first dip is always taken.
    assert!(total_leaps >= 1);
    assert!(fees_seen > Decimal::ZERO);
    assert_eq!(market.fetch_count(), 4);
    assert_eq!(s.ledger().stats().cycles, 4);

    let reloaded = store.load().unwrap().unwrap();
    assert_eq!(&reloaded, s.ledger());
    store.delete().unwrap();
}

#[tokio::test]
async fn test_market_outage_then_recovery() {
    let market = Arc::new(ScriptedMarket::new(vec![snapshot(&[
        ("ETH", dec!(2000), dec!(-10)),
        ("SOL", dec!(100), dec!(1)),
    ])]));
    market.set_error("upstream 503");
    let store = StateStore::new(temp_path("outage"));
    let mut s = engine(market.clone(), BalanceAggregator::new(Vec::new()), store.clone(), SchedulerConfig::default())
        .with_ledger(cash_ledger(dec!(1000)));

    let stats = s.run_cycle().await;
    assert_eq!(stats.provenance, Provenance::Unavailable);
    assert_eq!(stats.phases.len(), 7);
    assert_eq!(stats.leaps_made, 0);
    assert_eq!(s.ledger().cash().balance, dec!(1000));

    market.clear_error();
    let stats = s.run_cycle().await;
    assert_eq!(stats.provenance, Provenance::Live);
    assert_eq!(stats.leaps_made, 1);
    assert!(s.ledger().friend("ETH").is_some());
    assert_eq!(s.ledger().stats().cycles, 2);

    store.delete().unwrap();
}

#[tokio::test]
async fn test_restart_after_interrupted_tick() {
    let market = Arc::new(ScriptedMarket::new(vec![
        snapshot(&[("ETH", dec!(2000), dec!(0)), ("SOL", dec!(100), dec!(0))]),
        snapshot(&[("ETH", dec!(2000), dec!(-10)), ("SOL", dec!(100), dec!(1))]),
    ]));
    let store = StateStore::new(temp_path("crash"));
    let mut s = engine(market.clone(), BalanceAggregator::new(Vec::new()), store.clone(), SchedulerConfig::default())
        .with_ledger(cash_ledger(dec!(1000)));

    // Tick 1 completes and persists. Nothing moves.
    let stats = s.run_cycle().await;
    assert!(stats.persisted);
    assert_eq!(stats.leaps_made, 0);
    let persisted = s.ledger().clone();

    // Tick 2 gets as far as LEAP in memory...
    let snap = market.fetch_snapshot().await.unwrap();
    let mut live = s.ledger().clone();
    let source = live.leap_sources().remove(0);
    let opp = scorer().find_leap_opportunities(&source, &snap).remove(0);
    LeapExecutor::new(scorer()).try_execute(&mut live, &opp, &snap).unwrap();
    assert_ne!(live, persisted);

    // ...and the process dies halfway through writing it out.
    let json = serde_json::to_string_pretty(&PersistedState::from_ledger(&live)).unwrap();
    let tmp = format!("{}.tmp", store.path().display());
    std::fs::write(&tmp, &json[..json.len() / 2]).unwrap();
    drop(s);

    let mut restarted = engine(market, BalanceAggregator::new(Vec::new()), store.clone(), SchedulerConfig::default());
    assert_eq!(restarted.bootstrap().await.unwrap(), Boot::Restored);
    assert_eq!(restarted.ledger(), &persisted);
    assert!(!std::path::Path::new(&tmp).exists());

    store.delete().unwrap();
}

#[tokio::test]
async fn test_cold_start_from_venues() {
    let market = Arc::new(ScriptedMarket::new(vec![snapshot(&[
        ("ETH", dec!(2000), dec!(0)),
        ("SOL", dec!(100), dec!(0)),
    ])]));
    let kraken = Arc::new(MockVenue::new("kraken", &[("USD", dec!(100)), ("ETH", dec!(0.5)), ("SOL", dec!(10))]));
    let venues: Vec<Arc<dyn BalanceSource>> = vec![
        Arc::new(MockVenue::new("binance", &[("USDT", dec!(500)), ("ETH", dec!(1))])),
        kraken.clone(),
        Arc::new(MockVenue::failing("coinbase", "401 unauthorized")),
    ];
    let store = StateStore::new(temp_path("cold"));
    let mut s = engine(market, BalanceAggregator::new(venues), store.clone(), SchedulerConfig::default());

    let failed = Provenance::Partial { failed: vec!["coinbase".to_string()] };
    assert_eq!(s.bootstrap().await.unwrap(), Boot::ColdStart(failed.clone()));
    assert_eq!(s.ledger().cash().balance, dec!(600));
    // USDT on binance and USD on kraken.
    assert_eq!(s.ledger().cash().exchange, MERGED_EXCHANGE);
    assert_eq!(s.ledger().balance_provenance(), &failed);

    let eth = s.ledger().friend("ETH").unwrap();
    assert_eq!(eth.quantity, dec!(1.5));
    assert_eq!(eth.exchange, MERGED_EXCHANGE);
    // No trade history and no average costs: zero baggage assumed.
    assert_eq!(eth.cost_basis, dec!(3000));
    assert!(eth.is_clear());

    let sol = s.ledger().friend("SOL").unwrap();
    assert_eq!(sol.exchange, "kraken");
    assert_eq!(s.ledger().total_value(), dec!(4600));

    // The cold-start ledger is on disk before the first tick.
    assert_eq!(&store.load().unwrap().unwrap(), s.ledger());

    // An explicit reload picks up new balances.
    kraken.set_balance("SOL", dec!(20));
    assert_eq!(s.reload_balances().await.unwrap(), (2, failed));
    assert_eq!(s.ledger().friend("SOL").unwrap().quantity, dec!(20));

    store.delete().unwrap();
}

#[tokio::test]
async fn test_stale_cold_start_waits_for_live_balances() {
    let cache = temp_path("stale_cache");
    let venue = Arc::new(MockVenue::new("binance", &[("USDT", dec!(1000))]));
    let venues = || vec![venue.clone() as Arc<dyn BalanceSource>];
    BalanceAggregator::new(venues()).with_cache(&cache).aggregate().await.unwrap();
    venue.set_error("maintenance");

    let market = Arc::new(ScriptedMarket::new(vec![snapshot(&[
        ("ETH", dec!(2000), dec!(-10)),
        ("SOL", dec!(100), dec!(1)),
    ])]));
    let store = StateStore::new(temp_path("stale"));
    let aggregator = BalanceAggregator::new(venues()).with_cache(&cache);
    let mut s = engine(market, aggregator, store.clone(), SchedulerConfig::default());

    let boot = s.bootstrap().await.unwrap();
    assert!(matches!(boot, Boot::ColdStart(Provenance::Stale { .. })));
    assert_eq!(s.ledger().cash().balance, dec!(1000));

    // Cached balances: the dip is seen but not traded.
    let stats = s.run_cycle().await;
    assert!(matches!(stats.provenance, Provenance::Stale { .. }));
    assert_eq!(stats.opportunities_found, 1);
    assert_eq!(stats.leaps_made, 0);
    assert_eq!(s.get_full_report().total_value, dec!(1000));

    // The venue comes back and the next tick trades on live balances.
    venue.clear_error();
    let stats = s.run_cycle().await;
    assert_eq!(stats.provenance, Provenance::Live);
    assert_eq!(stats.leaps_made, 1);
    assert!(s.ledger().friend("ETH").is_some());
    assert_eq!(s.ledger().balance_provenance(), &Provenance::Live);
    assert!(s.last_cycle_report().unwrap().conserved);

    store.delete().unwrap();
    let _ = std::fs::remove_file(&cache);
}

#[tokio::test]
async fn test_slow_venue_is_omitted_not_waited_on() {
    let venues: Vec<Arc<dyn BalanceSource>> = vec![
        Arc::new(MockVenue::new("binance", &[("USDT", dec!(250))])),
        Arc::new(MockVenue::new("slow", &[("ETH", dec!(3))]).with_delay(Duration::from_secs(5))),
    ];
    let aggregator = BalanceAggregator::new(venues).with_timeout(Duration::from_millis(50));

    let started = tokio::time::Instant::now();
    let result = aggregator.aggregate().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(result.provenance, Provenance::Partial { failed: vec!["slow".to_string()] });
    assert_eq!(result.cash, dec!(250));
    assert!(result.holdings.is_empty());
}

#[tokio::test]
async fn test_cached_balances_used_when_every_venue_fails() {
    let cache = temp_path("cache");
    let venue = Arc::new(MockVenue::new("binance", &[("USDT", dec!(75)), ("ETH", dec!(2))]));
    let aggregator = BalanceAggregator::new(vec![venue.clone() as Arc<dyn BalanceSource>]).with_cache(&cache);

    let live = aggregator.aggregate().await.unwrap();
    assert_eq!(live.provenance, Provenance::Live);

    venue.set_error("maintenance");
    let stale = aggregator.aggregate().await.unwrap();
    assert!(matches!(stale.provenance, Provenance::Stale { .. }));
    assert!(!stale.provenance.is_trustworthy());
    assert_eq!(stale.cash, dec!(75));
    assert_eq!(stale.holdings["ETH"].quantity, dec!(2));

    let _ = std::fs::remove_file(&cache);
}
