//! Persistence layer.
//!
//! Saves and loads the ledger to/from a JSON file. Writes go to
//! `<path>.tmp`, are synced, then renamed over `<path>`, so a crash leaves
//! either the previous document or the new one, never half of either.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::portfolio::Ledger;
use crate::types::{Breadcrumb, Cash, Friend, LeapError, LifetimeStats, Provenance};

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "leapfrog_state.json";

const STATE_VERSION: u32 = 2;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to serialize state: {0}")]
    Serialization(String),

    #[error("Failed to write state file {path}: {message}")]
    Write { path: String, message: String },

    #[error("Failed to read state file {path}: {message}")]
    Read { path: String, message: String },

    #[error("State file {path} is corrupted: {message}")]
    Corrupted { path: String, message: String },
}

impl From<PersistError> for LeapError {
    fn from(e: PersistError) -> Self {
        LeapError::PersistenceFailure(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// The on-disk document. Unknown fields are ignored on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default = "legacy_version")]
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    /// Largest friend at save time. Informational for readers; older
    /// single-position documents carry only this.
    #[serde(default)]
    pub main_position: Option<Friend>,
    #[serde(default)]
    pub friends: BTreeMap<String, Friend>,
    pub cash: Cash,
    #[serde(default)]
    pub breadcrumbs: BTreeMap<String, Breadcrumb>,
    #[serde(default)]
    pub statistics: LifetimeStats,
    /// Provenance of the last balance load. Stale balances stay flagged
    /// across a restart.
    #[serde(default)]
    pub balance_provenance: Provenance,
}

fn legacy_version() -> u32 {
    1
}

impl PersistedState {
    pub fn from_ledger(ledger: &Ledger) -> Self {
        Self {
            version: STATE_VERSION,
            saved_at: Utc::now(),
            main_position: ledger.main_position().cloned(),
            friends: ledger.friends().map(|f| (f.symbol.clone(), f.clone())).collect(),
            cash: ledger.cash().clone(),
            breadcrumbs: ledger.breadcrumbs().map(|b| (b.symbol.clone(), b.clone())).collect(),
            statistics: ledger.stats().clone(),
            balance_provenance: ledger.balance_provenance().clone(),
        }
    }

    pub fn into_ledger(self) -> Ledger {
        let mut friends = self.friends;
        if friends.is_empty() {
            if let Some(main) = self.main_position {
                debug!(symbol = %main.symbol, "Folding legacy main position into friends");
                friends.insert(main.symbol.clone(), main);
            }
        }
        Ledger::from_parts(
            self.cash,
            friends.into_values(),
            self.breadcrumbs.into_values(),
            self.statistics,
        )
        .with_balance_provenance(self.balance_provenance)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE)
    }
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Atomically replace the state file with the ledger's current state.
    pub fn save(&self, ledger: &Ledger) -> Result<(), PersistError> {
        let doc = PersistedState::from_ledger(ledger);
        let json = serde_json::to_string_pretty(&doc).map_err(|e| PersistError::Serialization(e.to_string()))?;

        let write_err = |path: &Path, e: std::io::Error| PersistError::Write {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
            }
        }

        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp).map_err(|e| write_err(&tmp, e))?;
            file.write_all(json.as_bytes()).map_err(|e| write_err(&tmp, e))?;
            file.sync_all().map_err(|e| write_err(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| write_err(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            friends = doc.friends.len(),
            breadcrumbs = doc.breadcrumbs.len(),
            cycles = doc.statistics.cycles,
            "State saved"
        );
        Ok(())
    }

    /// Load the last complete save. `None` if nothing was ever saved.
    pub fn load(&self) -> Result<Option<Ledger>, PersistError> {
        let tmp = self.tmp_path();
        if tmp.exists() {
            warn!(path = %tmp.display(), "Discarding incomplete write from an interrupted save");
            if let Err(e) = fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), error = %e, "Failed to remove stray temp file");
            }
        }

        if !self.path.exists() {
            info!(path = %self.path.display(), "No saved state found, starting fresh");
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path).map_err(|e| PersistError::Read {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        let doc: PersistedState = serde_json::from_str(&json).map_err(|e| PersistError::Corrupted {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;

        let version = doc.version;
        let saved_at = doc.saved_at;
        let ledger = doc.into_ledger();

        info!(
            path = %self.path.display(),
            version,
            saved_at = %saved_at,
            friends = ledger.friend_count(),
            cash = %ledger.cash().balance.round_dp(2),
            cycles = ledger.stats().cycles,
            "State loaded from disk"
        );
        Ok(Some(ledger))
    }

    /// Delete the state file (for testing or reset).
    pub fn delete(&self) -> Result<(), PersistError> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| PersistError::Write {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn temp_store() -> StateStore {
        StateStore::new(std::env::temp_dir().join(format!("leapfrog_test_state_{}.json", uuid::Uuid::new_v4())))
    }

    fn ledger() -> Ledger {
        let mut l = Ledger::new(Cash::new("USD", dec!(250.5), "binance"));
        l.add_friend(Friend::new("ETH", dec!(1.25), dec!(3000), dec!(1900), "binance"));
        l.add_friend(Friend::new("SOL", dec!(10), dec!(1000), dec!(120), "kraken"));
        l.plant_breadcrumb(Breadcrumb::new("BTC", dec!(0.001), dec!(60), dec!(60000), "binance"));
        l.record_fees(dec!(1.23456789), dec!(0.1));
        l.record_leap(dec!(-12.5), true);
        l.record_cycle();
        l
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = temp_store();
        let original = ledger();
        store.save(&original).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, original);

        store.delete().unwrap();
    }

    #[test]
    fn test_stale_balance_flag_survives_restart() {
        let store = temp_store();
        let cached_at = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 3, 1, 8, 30, 0).unwrap();
        let original = ledger().with_balance_provenance(Provenance::Stale { cached_at });
        store.save(&original).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.balance_provenance(), &Provenance::Stale { cached_at });
        assert!(!loaded.balance_provenance().is_trustworthy());

        store.delete().unwrap();
    }

    #[test]
    fn test_load_nonexistent() {
        let store = temp_store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_stray_tmp_ignored_and_removed() {
        let store = temp_store();
        let original = ledger();
        store.save(&original).unwrap();

        // A save that died mid-write.
        fs::write(store.tmp_path(), "{\"version\": 2, \"cash\": {\"sym").unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(!store.tmp_path().exists());

        store.delete().unwrap();
    }

    #[test]
    fn test_no_tmp_left_after_save() {
        let store = temp_store();
        store.save(&ledger()).unwrap();
        assert!(!store.tmp_path().exists());
        store.delete().unwrap();
    }

    #[test]
    fn test_corrupted_file_is_error() {
        let store = temp_store();
        fs::write(store.path(), "not json").unwrap();
        assert!(matches!(store.load(), Err(PersistError::Corrupted { .. })));
        store.delete().unwrap();
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let store = temp_store();
        fs::write(
            store.path(),
            r#"{
                "version": 2,
                "saved_at": "2026-01-01T00:00:00Z",
                "cash": {"symbol": "USD", "balance": "100", "exchange": "binance"},
                "friends": {},
                "statistics": {"cycles": 7, "dashboard_theme": "dark"},
                "ui_layout": {"columns": 3}
            }"#,
        )
        .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.cash().balance, dec!(100));
        assert_eq!(loaded.stats().cycles, 7);
        // Documents written before provenance was recorded read as live.
        assert_eq!(loaded.balance_provenance(), &Provenance::Live);
        store.delete().unwrap();
    }

    #[test]
    fn test_legacy_main_position_folded() {
        let store = temp_store();
        fs::write(
            store.path(),
            r#"{
                "saved_at": "2025-06-01T12:00:00Z",
                "main_position": {
                    "symbol": "ETH", "quantity": "1", "cost_basis": "3000",
                    "entry_price": "3000", "current_price": "1900", "exchange": "binance"
                },
                "cash": {"symbol": "USD", "balance": "0"}
            }"#,
        )
        .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.friend_count(), 1);
        assert_eq!(loaded.friend("ETH").unwrap().cost_basis, dec!(3000));
        store.delete().unwrap();
    }

    #[test]
    fn test_document_layout() {
        let doc = PersistedState::from_ledger(&ledger());
        let value = serde_json::to_value(&doc).unwrap();
        for key in ["version", "saved_at", "main_position", "friends", "cash", "breadcrumbs", "statistics"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["main_position"]["symbol"], "ETH");
        assert_eq!(value["version"], STATE_VERSION);
    }

    #[test]
    fn test_persist_error_maps_to_leap_error() {
        let err: LeapError = PersistError::Serialization("boom".into()).into();
        assert!(matches!(err, LeapError::PersistenceFailure(_)));
    }
}
