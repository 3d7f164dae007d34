// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Intent Replay - Ledger Recovery
//!
//! The intent log is the source of truth for balances.
//!
//! # Recovery Protocol
//! 1. Start from the configured seed balances
//! 2. Apply every logged intent in order (duplicates by id are skipped)
//! 3. Collect intents with no `Anchored` marker so the caller can re-anchor them
//!
//! # Invariants
//! - replay(log) reproduces the balances the node held before it stopped
//! - an intent id is applied at most once

use std::collections::{BTreeMap, HashSet};

use timevault_kernel::{Intent, IntentType};

use crate::events::intent_log::LogEntry;

#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub balances: BTreeMap<String, f64>,
    pub applied: HashSet<String>,
    /// Applied intents whose execution anchor was never confirmed, in log order.
    pub unanchored: Vec<Intent>,
    pub intents_replayed: usize,
}

/// Move `intent.amount` from `intent.from` to `intent.to`.
pub fn apply_to_balances(balances: &mut BTreeMap<String, f64>, intent: &Intent) {
    match intent.kind {
        IntentType::Transfer => {
            *balances.entry(intent.from.clone()).or_insert(0.0) -= intent.amount;
            *balances.entry(intent.to.clone()).or_insert(0.0) += intent.amount;
        }
    }
}

pub fn replay(entries: &[LogEntry], seed: &[(String, f64)]) -> ReplayOutcome {
    let mut outcome = ReplayOutcome::default();
    for (account, amount) in seed {
        outcome.balances.insert(account.clone(), *amount);
    }

    let mut anchored: HashSet<&str> = HashSet::new();
    for entry in entries {
        if let LogEntry::Anchored { intent_id, .. } = entry {
            anchored.insert(intent_id.as_str());
        }
    }

    for entry in entries {
        let LogEntry::Intent(intent) = entry else { continue };
        if !outcome.applied.insert(intent.id.clone()) {
            tracing::warn!("Skipping duplicate intent {} in log", intent.id);
            continue;
        }
        apply_to_balances(&mut outcome.balances, intent);
        outcome.intents_replayed += 1;
        if !anchored.contains(intent.id.as_str()) {
            outcome.unanchored.push(intent.clone());
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use timevault_kernel::IntentRequest;

    fn intent(id: &str, from: &str, to: &str, amount: f64) -> Intent {
        let mut req = IntentRequest::transfer(from, to, amount);
        req.id = Some(id.to_string());
        req.normalize(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_replay_balances_and_unanchored() {
        let entries = vec![
            LogEntry::Intent(intent("T1", "alice", "bob", 500.0)),
            LogEntry::Anchored { intent_id: "T1".into(), anchor_id: "XAP-a".into() },
            LogEntry::Intent(intent("T2", "bob", "carol", 200.0)),
        ];

        let outcome = replay(&entries, &[("alice".to_string(), 1000.0)]);
        assert_eq!(outcome.balances["alice"], 500.0);
        assert_eq!(outcome.balances["bob"], 300.0);
        assert_eq!(outcome.balances["carol"], 200.0);
        assert_eq!(outcome.intents_replayed, 2);
        assert_eq!(outcome.unanchored.len(), 1);
        assert_eq!(outcome.unanchored[0].id, "T2");
    }

    #[test]
    fn test_replay_skips_duplicate_ids() {
        let t = intent("T1", "alice", "bob", 5.0);
        let entries = vec![LogEntry::Intent(t.clone()), LogEntry::Intent(t)];

        let outcome = replay(&entries, &[]);
        assert_eq!(outcome.intents_replayed, 1);
        assert_eq!(outcome.balances["bob"], 5.0);
    }
}
