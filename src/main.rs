//! LEAPFROG: fee-exact leap decision and portfolio reallocation engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the ledger from disk (or cold-starts from venue balances), and
//! runs the cycle loop until Ctrl+C.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use leapfrog::config::AppConfig;
use leapfrog::engine::{
    BalanceAggregator, Boot, CycleScheduler, LeapExecutor, ScalpHarvester, SchedulerConfig,
};
use leapfrog::sources::cost_basis::{AverageCostBook, FifoCostLedger};
use leapfrog::sources::file::{JsonBalanceFile, JsonSnapshotFile};
use leapfrog::sources::{BalanceSource, CostBasisProvider, NoCostBasis};
use leapfrog::storage::StateStore;
use leapfrog::strategy::OpportunityScorer;

const BANNER: &str = r#"
 _     _____    _    ____  _____ ____   ___   ____
| |   | ____|  / \  |  _ \|  ___|  _ \ / _ \ / ___|
| |   |  _|   / _ \ | |_) | |_  | |_) | | | | |  _
| |___| |___ / ___ \|  __/|  _| |  _ <| |_| | |_| |
|_____|_____/_/   \_\_|   |_|   |_| \_\\___/ \____|

  Fee-exact leap decision & portfolio reallocation
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = AppConfig::path_from_env();
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        config = %config_path,
        tick_interval_secs = cfg.agent.tick_interval_secs,
        venues = cfg.venues.len(),
        dry_run = cfg.agent.dry_run,
        "LEAPFROG starting up"
    );

    // -- Sources ---------------------------------------------------------

    let market = Arc::new(JsonSnapshotFile::new(&cfg.sources.snapshot_file));

    let venues: Vec<Arc<dyn BalanceSource>> = cfg
        .venues
        .iter()
        .filter(|v| v.enabled)
        .map(|v| Arc::new(JsonBalanceFile::new(&v.exchange, &v.balances_file)) as Arc<dyn BalanceSource>)
        .collect();
    if venues.is_empty() {
        warn!("No balance venues configured; cold start will fail without saved state");
    }

    let cost_basis: Arc<dyn CostBasisProvider> = match &cfg.sources.trade_history_file {
        Some(path) => Arc::new(
            FifoCostLedger::load(Path::new(path)).context("Failed to build FIFO cost ledger")?,
        ),
        None => {
            info!("No trade history configured, FIFO cost basis unavailable");
            Arc::new(NoCostBasis)
        }
    };

    let average_costs = match &cfg.sources.average_cost_file {
        Some(path) => AverageCostBook::load(Path::new(path))?,
        None => AverageCostBook::default(),
    };

    let mut aggregator = BalanceAggregator::new(venues)
        .with_cost_basis(cost_basis)
        .with_average_costs(average_costs)
        .with_timeout(cfg.venue_timeout())
        .with_cash_symbols(cfg.cash_symbols())
        .with_dust_threshold(cfg.agent.dust_threshold);
    if let Some(cache) = &cfg.sources.balance_cache_file {
        aggregator = aggregator.with_cache(cache);
    }

    // -- Engine ----------------------------------------------------------

    let fees = cfg.fee_model();
    let scorer = Arc::new(OpportunityScorer::new(cfg.scorer_config(), fees.clone()));
    let executor = LeapExecutor::new(scorer.clone()).with_dry_run(cfg.agent.dry_run);
    let harvester = ScalpHarvester::new(cfg.scalp_config(), fees);

    let mut scheduler = CycleScheduler::new(
        market,
        aggregator,
        scorer,
        executor,
        harvester,
        StateStore::new(&cfg.agent.state_file),
        SchedulerConfig {
            tick_interval: cfg.tick_interval(),
            snapshot_timeout: cfg.snapshot_timeout(),
            max_leaps_per_cycle: cfg.leap.max_leaps_per_cycle,
            scalping_enabled: cfg.scalp.enabled,
            cash_symbol: cfg.cash.symbol.clone(),
            cash_exchange: cfg.cash.exchange.clone(),
            dust_threshold: cfg.agent.dust_threshold,
        },
    );

    match scheduler.bootstrap().await.context("Failed to initialise ledger")? {
        Boot::Restored => info!("Resumed from saved state"),
        Boot::ColdStart(provenance) if provenance.is_trustworthy() => {
            info!(%provenance, "Fresh start from venue balances")
        }
        Boot::ColdStart(provenance) => {
            warn!(%provenance, "Fresh start from cached balances, trading waits for live venues")
        }
    }
    info!(report = %scheduler.get_full_report(), "Portfolio");

    // -- Main loop -------------------------------------------------------

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, finishing current cycle.");
        }
        let _ = stop_tx.send(true);
    });

    info!(
        interval_secs = cfg.agent.tick_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );
    scheduler.run(stop_rx).await;

    // Save final state
    scheduler
        .store()
        .save(scheduler.ledger())
        .context("Failed to save final state")?;

    let report = scheduler.get_full_report();
    info!(
        value = format!("${:.2}", report.total_value),
        realized = format!("${:.2}", report.pnl.realized),
        leaps = report.stats.total_leaps,
        scalps = report.stats.total_scalps,
        fees = format!("${:.4}", report.stats.total_fees_paid),
        cycles = report.stats.cycles,
        "LEAPFROG shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("leapfrog=info"));

    let json_logging = std::env::var("LEAPFROG_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
