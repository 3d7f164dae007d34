// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Decay policy: how long a non-permanent anchor stays alive.
//!
//! `effective_window = base_half_life + min(score * bonus_per_reinforcement, max_bonus)`
//!
//! The clock starts at the anchor's `timestamp`, which reinforcement resets.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anchor::AnchorRecord;
use crate::config::{DEFAULT_BASE_HALF_LIFE_SECS, DEFAULT_BONUS_PER_REINFORCEMENT_SECS, DEFAULT_MAX_BONUS_SECS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayPolicy {
    pub base_half_life: Duration,
    pub bonus_per_reinforcement: Duration,
    pub max_bonus: Duration,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            base_half_life: Duration::from_secs(DEFAULT_BASE_HALF_LIFE_SECS),
            bonus_per_reinforcement: Duration::from_secs(DEFAULT_BONUS_PER_REINFORCEMENT_SECS),
            max_bonus: Duration::from_secs(DEFAULT_MAX_BONUS_SECS),
        }
    }
}

impl DecayPolicy {
    pub fn effective_window(&self, score: u32) -> Duration {
        let bonus = self.bonus_per_reinforcement.saturating_mul(score).min(self.max_bonus);
        self.base_half_life.saturating_add(bonus)
    }

    /// Whether `anchor` is past its window at `now`.
    ///
    /// Permanent anchors never expire. A timestamp in the future counts as age
    /// zero.
    pub fn is_expired(&self, anchor: &AnchorRecord, now: DateTime<Utc>) -> bool {
        if anchor.permanent {
            return false;
        }
        match now.signed_duration_since(anchor.timestamp).to_std() {
            Ok(age) => age > self.effective_window(anchor.resonance_score()),
            Err(_) => false,
        }
    }

    /// Instant after which `anchor` becomes eligible for decay.
    pub fn expires_at(&self, anchor: &AnchorRecord) -> Option<DateTime<Utc>> {
        if anchor.permanent {
            return None;
        }
        let window = chrono::Duration::from_std(self.effective_window(anchor.resonance_score())).ok()?;
        anchor.timestamp.checked_add_signed(window)
    }
}
