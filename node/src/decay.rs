// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Decay Engine
//!
//! Evicts expired anchors to stubs, keeps reinforced ones alive and turns
//! stubs back into (reconstructed) anchors on demand.
//!
//! # Sweep
//! - One record at a time, under the store's record lock for that record only
//! - Stub is written before the anchor file is removed
//! - Unreadable anchor and stub files are purged
//! - Cancellation is checked between records

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use timevault_kernel::{build_stub, reconstruct_from_stub, AnchorRecord, DecayPolicy};

use crate::store::{RecordStore, ScanEntry, StoreError};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub decayed: usize,
    pub purged: usize,
    pub permanent: usize,
    /// Stopped early by cancellation.
    pub interrupted: bool,
}

pub struct DecayEngine {
    store: Arc<RecordStore>,
    policy: DecayPolicy,
}

impl DecayEngine {
    pub fn new(store: Arc<RecordStore>, policy: DecayPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &DecayPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Run one sweep to completion.
    pub fn sweep_now(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweep(now, &CancellationToken::new())
    }

    pub fn sweep(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();

        for path in self.store.anchor_files() {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let _guard = self.store.record_guard();
            match self.store.inspect_file(&path) {
                ScanEntry::Missing => continue,
                ScanEntry::Corrupt(reason) => {
                    report.scanned += 1;
                    tracing::warn!("Corrupt record {:?}: {}", path, reason);
                    match self.store.purge(&path) {
                        Ok(()) => {
                            report.purged += 1;
                            metrics::counter!("timevault_records_purged_total", 1);
                        }
                        Err(e) => tracing::warn!("Failed to purge {:?}: {}", path, e),
                    }
                }
                ScanEntry::Anchor(anchor) => {
                    report.scanned += 1;
                    if anchor.permanent {
                        report.permanent += 1;
                        continue;
                    }
                    if !self.policy.is_expired(&anchor, now) {
                        continue;
                    }
                    match self.evict(&anchor, now) {
                        Ok(()) => {
                            report.decayed += 1;
                            metrics::counter!("timevault_anchors_decayed_total", 1);
                        }
                        Err(e) => tracing::warn!("Failed to decay {}: {}", anchor.id, e),
                    }
                }
            }
        }

        if !report.interrupted {
            self.purge_corrupt_stubs(cancel, &mut report);
        }

        metrics::histogram!("timevault_decay_sweep_duration_seconds", started.elapsed().as_secs_f64());
        if report.decayed > 0 || report.purged > 0 {
            tracing::info!(
                "Decay sweep: scanned {}, decayed {}, purged {}",
                report.scanned,
                report.decayed,
                report.purged
            );
        }
        report
    }

    /// Stubs are never evicted, but an unreadable one is removed like any
    /// other corrupt record.
    fn purge_corrupt_stubs(&self, cancel: &CancellationToken, report: &mut SweepReport) {
        for path in self.store.stub_files() {
            if cancel.is_cancelled() {
                report.interrupted = true;
                return;
            }

            let _guard = self.store.record_guard();
            let Some(Err(reason)) = self.store.inspect_stub_file(&path) else {
                continue;
            };
            report.scanned += 1;
            tracing::warn!("Corrupt stub {:?}: {}", path, reason);
            match self.store.purge(&path) {
                Ok(()) => {
                    report.purged += 1;
                    metrics::counter!("timevault_records_purged_total", 1);
                }
                Err(e) => tracing::warn!("Failed to purge {:?}: {}", path, e),
            }
        }
    }

    fn evict(&self, anchor: &AnchorRecord, now: DateTime<Utc>) -> Result<(), StoreError> {
        let stub = build_stub(anchor, now);
        self.store.put_stub(&stub)?;
        self.store.remove_anchor(&anchor.id)?;
        tracing::debug!("Decayed {} to stub", anchor.id);
        Ok(())
    }

    /// Register a reinforcement on a live anchor. `false` if there is none.
    ///
    /// Permanent anchors report `true` and are left as they are.
    pub fn reinforce(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let _guard = self.store.record_guard();
        let Some(mut anchor) = self.store.get_anchor(id) else {
            return Ok(false);
        };
        if anchor.permanent {
            return Ok(true);
        }
        anchor.reinforce(now);
        self.store.put_anchor(&anchor)?;
        tracing::debug!("Reinforced {} (score {})", id, anchor.resonance_score());
        Ok(true)
    }

    /// Turn the stub `id` back into a persisted, reconstructed anchor.
    ///
    /// A live anchor with that id is returned as is.
    pub fn reconstruct(&self, id: &str, now: DateTime<Utc>) -> Result<Option<AnchorRecord>, StoreError> {
        let _guard = self.store.record_guard();
        if let Some(anchor) = self.store.get_anchor(id) {
            return Ok(Some(anchor));
        }
        let Some(stub) = self.store.get_stub(id) else {
            return Ok(None);
        };

        let anchor = reconstruct_from_stub(&stub, now);
        self.store.put_anchor(&anchor)?;
        self.store.remove_stub(id)?;
        tracing::info!("Reconstructed {} from stub", id);
        Ok(Some(anchor))
    }
}

/// Periodic sweep in the background.
pub struct DecayTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DecayTask {
    /// First sweep runs one `interval` after spawning.
    pub fn spawn(engine: Arc<DecayEngine>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let engine = engine.clone();
                        let sweep_token = token.clone();
                        let result = tokio::task::spawn_blocking(move || engine.sweep(Utc::now(), &sweep_token)).await;
                        match result {
                            Ok(report) => tracing::debug!("Periodic decay sweep: {:?}", report),
                            Err(e) => tracing::error!("Decay sweep task failed: {}", e),
                        }
                    }
                }
            }
            tracing::info!("Decay task stopped");
        });

        Self { cancel, handle }
    }

    /// Cancel and wait for the task. An in-flight sweep stops at the next record.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Decay task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
