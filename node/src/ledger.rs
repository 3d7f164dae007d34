// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ledger Service
//!
//! Applies transfers to the balance table and anchors each one.
//!
//! # Apply Order
//! 1. validate
//! 2. duplicate check
//! 3. overdraft policy
//! 4. append intent to the log (write-ahead)
//! 5. mutate balances
//! 6. build and persist the `XAP-` anchor
//! 7. append the `Anchored` marker
//!
//! A failure at step 6 is reported as `PartiallyApplied`, never as success.
//! The next open re-anchors it from the log.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use timevault_kernel::{build_anchor, AnchorKind, AnchorRecord, Intent, IntentRequest, KernelError, NodeIdentity};

use crate::config::{NodeConfig, OverdraftPolicy};
use crate::events::{apply_to_balances, read_intent_log, replay, IntentLogError, IntentLogWriter, LogEntry};
use crate::store::{RecordStore, StoreError};

pub type SharedLedger = Arc<Mutex<Ledger>>;

/// Run a mutation on the blocking pool. Appends and anchor writes fsync, so
/// they stay off the async workers.
pub async fn mutate<T, F>(ledger: &SharedLedger, f: F) -> Result<T, LedgerError>
where
    F: FnOnce(&mut Ledger) -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    let ledger = ledger.clone();
    tokio::task::spawn_blocking(move || f(&mut ledger.blocking_lock()))
        .await
        .map_err(|e| LedgerError::Task(e.to_string()))?
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("intent {0} already applied")]
    DuplicateIntent(String),

    #[error("overdraft: {account} holds {balance}, cannot send {amount}")]
    Overdraft { account: String, balance: f64, amount: f64 },

    /// Balances changed but the anchor did not make it to disk.
    #[error("intent {intent_id} applied but not anchored: {reason}")]
    PartiallyApplied { intent_id: String, reason: String },

    #[error("intent log: {0}")]
    Log(#[from] IntentLogError),

    #[error("record store: {0}")]
    Store(#[from] StoreError),

    #[error("kernel: {0}")]
    Kernel(KernelError),

    #[error("ledger task failed: {0}")]
    Task(String),
}

impl From<KernelError> for LedgerError {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::InvalidIntent(msg) => LedgerError::InvalidIntent(msg),
            other => LedgerError::Kernel(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub applied_id: String,
    pub anchor_id: String,
    /// Post-transfer balances of the two accounts involved.
    pub balances: BTreeMap<String, f64>,
    pub intent: Intent,
}

/// Distribution summary over the balance table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Equilibrium {
    pub accounts: usize,
    pub total: f64,
    pub coherence_mean: f64,
    pub entropy: f64,
    pub balance_index: f64,
}

impl Equilibrium {
    pub fn of(balances: &BTreeMap<String, f64>) -> Self {
        let n = balances.len();
        if n == 0 {
            return Self { accounts: 0, total: 0.0, coherence_mean: 0.0, entropy: 0.0, balance_index: 1.0 };
        }
        let total: f64 = balances.values().sum();
        let mean = total / n as f64;
        let variance = balances.values().map(|b| (b - mean).powi(2)).sum::<f64>() / n as f64;
        let entropy = variance.sqrt() / (mean.abs() + 1e-9);
        Self {
            accounts: n,
            total,
            coherence_mean: mean,
            entropy,
            balance_index: 1.0 - entropy.min(1.0),
        }
    }
}

pub struct Ledger {
    identity: Arc<NodeIdentity>,
    store: Arc<RecordStore>,
    log: IntentLogWriter,
    balances: BTreeMap<String, f64>,
    applied: HashSet<String>,
    overdraft: OverdraftPolicy,
}

impl Ledger {
    /// Replay the intent log and re-anchor anything left unanchored.
    pub fn open(cfg: &NodeConfig, identity: Arc<NodeIdentity>, store: Arc<RecordStore>) -> Result<Self, LedgerError> {
        let started = std::time::Instant::now();
        let entries = read_intent_log(&cfg.intent_log_path)?;
        let outcome = replay(&entries, &cfg.seed_balances);
        let log = IntentLogWriter::open(&cfg.intent_log_path)?;

        let mut ledger = Self {
            identity,
            store,
            log,
            balances: outcome.balances,
            applied: outcome.applied,
            overdraft: cfg.overdraft,
        };

        let mut reanchored = 0usize;
        for intent in &outcome.unanchored {
            if ledger.recover_anchor(intent)? {
                reanchored += 1;
            }
        }

        metrics::histogram!("timevault_replay_duration_seconds", started.elapsed().as_secs_f64());
        tracing::info!(
            "Ledger replayed {} intents ({} accounts, {} re-anchored) from {:?}",
            outcome.intents_replayed,
            ledger.balances.len(),
            reanchored,
            cfg.intent_log_path
        );
        Ok(ledger)
    }

    pub fn into_shared(self) -> SharedLedger {
        Arc::new(Mutex::new(self))
    }

    pub fn apply_transfer(&mut self, request: IntentRequest) -> Result<TransferReceipt, LedgerError> {
        self.apply_transfer_at(request, Utc::now())
    }

    pub fn apply_transfer_at(&mut self, request: IntentRequest, now: DateTime<Utc>) -> Result<TransferReceipt, LedgerError> {
        let intent = request.normalize(now);
        if let Err(e) = self.admit(&intent) {
            metrics::counter!("timevault_intents_rejected_total", 1);
            tracing::debug!("Rejected intent {}: {}", intent.id, e);
            return Err(e);
        }

        self.log.append(&LogEntry::Intent(intent.clone()))?;
        apply_to_balances(&mut self.balances, &intent);
        self.applied.insert(intent.id.clone());
        metrics::counter!("timevault_intents_applied_total", 1);

        let anchor_id = match self.persist_execution_anchor(&intent, now) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Intent {} applied but anchoring failed: {}", intent.id, e);
                return Err(LedgerError::PartiallyApplied { intent_id: intent.id, reason: e.to_string() });
            }
        };

        let balances = [&intent.from, &intent.to]
            .into_iter()
            .map(|account| (account.clone(), self.balance(account)))
            .collect();

        tracing::debug!("Applied {} {} -> {} ({}) as {}", intent.id, intent.from, intent.to, intent.amount, anchor_id);
        Ok(TransferReceipt { applied_id: intent.id.clone(), anchor_id, balances, intent })
    }

    /// Persist a pre-commit `CAP-` anchor. Balances are untouched.
    pub fn anchor_capability(&mut self, request: IntentRequest) -> Result<AnchorRecord, LedgerError> {
        self.anchor_capability_at(request, Utc::now())
    }

    pub fn anchor_capability_at(&mut self, request: IntentRequest, now: DateTime<Utc>) -> Result<AnchorRecord, LedgerError> {
        let intent = request.normalize(now);
        intent.validate()?;
        let anchor = build_anchor(intent, AnchorKind::Capability, &self.identity, now)?;
        self.store.put_anchor(&anchor)?;
        tracing::debug!("Capability anchor {} for {}", anchor.id, anchor.intent.id);
        Ok(anchor)
    }

    pub fn balance(&self, account: &str) -> f64 {
        self.balances.get(account).copied().unwrap_or(0.0)
    }

    pub fn balances(&self) -> &BTreeMap<String, f64> {
        &self.balances
    }

    pub fn is_applied(&self, intent_id: &str) -> bool {
        self.applied.contains(intent_id)
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Live anchors, optionally only those sent by `from`.
    pub fn search(&self, from: Option<&str>) -> Vec<AnchorRecord> {
        match from {
            Some(account) => self
                .store
                .anchors_for_account(account)
                .into_iter()
                .filter(|a| a.intent.from == account)
                .collect(),
            None => self.store.list_anchors(),
        }
    }

    pub fn equilibrium(&self) -> Equilibrium {
        Equilibrium::of(&self.balances)
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn identity(&self) -> &Arc<NodeIdentity> {
        &self.identity
    }

    fn admit(&self, intent: &Intent) -> Result<(), LedgerError> {
        intent.validate()?;
        if self.applied.contains(&intent.id) {
            return Err(LedgerError::DuplicateIntent(intent.id.clone()));
        }
        if self.overdraft == OverdraftPolicy::Reject && intent.from != intent.to {
            let balance = self.balance(&intent.from);
            if balance - intent.amount < 0.0 {
                return Err(LedgerError::Overdraft {
                    account: intent.from.clone(),
                    balance,
                    amount: intent.amount,
                });
            }
        }
        Ok(())
    }

    fn persist_execution_anchor(&mut self, intent: &Intent, now: DateTime<Utc>) -> Result<String, LedgerError> {
        let anchor = build_anchor(intent.clone(), AnchorKind::Execution, &self.identity, now)?;
        self.store.put_anchor(&anchor)?;

        let marker = LogEntry::Anchored { intent_id: intent.id.clone(), anchor_id: anchor.id.clone() };
        if let Err(e) = self.log.append(&marker) {
            // The anchor file exists; recovery finds it and only rewrites the marker.
            tracing::warn!("Anchor {} stored but marker not logged: {}", anchor.id, e);
        }
        Ok(anchor.id)
    }

    /// Anchor a replayed intent if neither its anchor nor its stub exists.
    fn recover_anchor(&mut self, intent: &Intent) -> Result<bool, LedgerError> {
        let probe = build_anchor(intent.clone(), AnchorKind::Execution, &self.identity, intent.timestamp)?;
        if self.store.get_anchor(&probe.id).is_some() || self.store.get_stub(&probe.id).is_some() {
            self.log.append(&LogEntry::Anchored { intent_id: intent.id.clone(), anchor_id: probe.id })?;
            return Ok(false);
        }

        let id = self.persist_execution_anchor(intent, Utc::now())?;
        tracing::info!("Re-anchored intent {} as {}", intent.id, id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_equilibrium_empty() {
        let eq = Equilibrium::of(&BTreeMap::new());
        assert_eq!(eq.accounts, 0);
        assert_eq!(eq.entropy, 0.0);
        assert_eq!(eq.balance_index, 1.0);
    }

    #[test]
    fn test_equilibrium_uniform_is_balanced() {
        let eq = Equilibrium::of(&table(&[("a", 10.0), ("b", 10.0), ("c", 10.0)]));
        assert_eq!(eq.coherence_mean, 10.0);
        assert!(eq.entropy.abs() < 1e-12);
        assert!((eq.balance_index - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_equilibrium_skewed() {
        // mean 50, pstdev 50 -> entropy ~1
        let eq = Equilibrium::of(&table(&[("a", 0.0), ("b", 100.0)]));
        assert_eq!(eq.total, 100.0);
        assert!((eq.entropy - 1.0).abs() < 1e-6);
        assert!(eq.balance_index.abs() < 1e-6);
    }

    #[test]
    fn test_kernel_errors_map_to_invalid_intent() {
        let e = LedgerError::from(KernelError::InvalidIntent("bad".into()));
        assert!(matches!(e, LedgerError::InvalidIntent(_)));
        let e = LedgerError::from(KernelError::Serialization("x".into()));
        assert!(matches!(e, LedgerError::Kernel(_)));
    }
}
