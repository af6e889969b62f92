//! Core engine: balance aggregation, leap execution, scalping and the
//! cycle loop that drives them.

pub mod aggregator;
pub mod accountant;
pub mod executor;
pub mod scalper;
pub mod scheduler;

pub use aggregator::{AggregatedHolding, Aggregation, BalanceAggregator, BasisSource};
pub use executor::{LeapExecutor, LeapReceipt};
pub use scalper::{ScalpConfig, ScalpHarvester, ScalpReceipt};
pub use scheduler::{Boot, CycleScheduler, SchedulerConfig};
