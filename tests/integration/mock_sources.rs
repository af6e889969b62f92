//! In-memory sources for integration testing.
//!
//! Deterministic `MarketDataSource` and `BalanceSource` doubles whose
//! snapshots, balances, failures and latency are controlled from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use leapfrog::sources::{BalanceSource, MarketDataSource};
use leapfrog::types::{MarketSnapshot, MarketTick};

/// Build a liquid snapshot from `(symbol, price, change_24h_pct)` rows.
pub fn snapshot(ticks: &[(&str, Decimal, Decimal)]) -> MarketSnapshot {
    let mut snap = MarketSnapshot::default();
    for (symbol, price, change) in ticks {
        snap.insert(symbol, MarketTick::new(*price, *change, dec!(2500000000)));
    }
    snap
}

/// Market feed that plays back a script of snapshots, one per fetch.
/// Once the script runs out the last snapshot repeats.
pub struct ScriptedMarket {
    script: Mutex<VecDeque<MarketSnapshot>>,
    last: Mutex<Option<MarketSnapshot>>,
    fetches: AtomicUsize,
    /// If set, every fetch returns this error.
    force_error: Arc<Mutex<Option<String>>>,
}

impl ScriptedMarket {
    pub fn new(script: Vec<MarketSnapshot>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for ScriptedMarket {
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }

        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = Some(next);
        }
        last.clone().ok_or_else(|| anyhow!("script is empty"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// One venue's balance endpoint.
pub struct MockVenue {
    exchange: String,
    balances: Mutex<BTreeMap<String, Decimal>>,
    delay: Option<Duration>,
    force_error: Mutex<Option<String>>,
}

impl MockVenue {
    pub fn new(exchange: &str, balances: &[(&str, Decimal)]) -> Self {
        Self {
            exchange: exchange.to_string(),
            balances: Mutex::new(balances.iter().map(|(a, q)| (a.to_string(), *q)).collect()),
            delay: None,
            force_error: Mutex::new(None),
        }
    }

    /// A venue that always fails.
    pub fn failing(exchange: &str, msg: &str) -> Self {
        let venue = Self::new(exchange, &[]);
        venue.set_error(msg);
        venue
    }

    /// Respond only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn set_balance(&self, asset: &str, quantity: Decimal) {
        self.balances.lock().unwrap().insert(asset.to_string(), quantity);
    }
}

#[async_trait]
impl BalanceSource for MockVenue {
    async fn get_balances(&self) -> Result<BTreeMap<String, Decimal>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(self.balances.lock().unwrap().clone())
    }

    fn exchange(&self) -> &str {
        &self.exchange
    }
}
