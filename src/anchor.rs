// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Anchor Records
//!
//! An anchor is the durable, signed artifact of an intent.
//!
//! # Invariants
//! - `entropy_hash` = digest of the canonical intent bytes
//! - `id` = kind prefix + first `ANCHOR_ID_HEX_LEN` chars of `entropy_hash`
//! - `signature` covers the canonical intent bytes
//! - once written, `intent` and `entropy_hash` never change; only `status`,
//!   `resonance` and `timestamp` are updated in place

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_bytes, entropy_hash};
use crate::config::{ANCHOR_ID_HEX_LEN, CAPABILITY_PREFIX, EXECUTION_PREFIX};
use crate::error::KernelResult;
use crate::identity::{verify_hex, NodeIdentity};
use crate::intent::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStatus {
    Pending,
    Anchored,
    Decayed,
    Reconstructed,
}

/// Record namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnchorKind {
    /// Pre-commit capability anchor (`CAP-`).
    Capability,
    /// Post-commit execution anchor (`XAP-`).
    Execution,
}

impl AnchorKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            AnchorKind::Capability => CAPABILITY_PREFIX,
            AnchorKind::Execution => EXECUTION_PREFIX,
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            AnchorKind::Capability => "cap.v1",
            AnchorKind::Execution => "xap.v1",
        }
    }

    pub fn initial_status(&self) -> AnchorStatus {
        match self {
            AnchorKind::Capability => AnchorStatus::Pending,
            AnchorKind::Execution => AnchorStatus::Anchored,
        }
    }

    /// Recover the namespace from a record id.
    pub fn of_id(id: &str) -> Option<AnchorKind> {
        if id.starts_with(CAPABILITY_PREFIX) {
            Some(AnchorKind::Capability)
        } else if id.starts_with(EXECUTION_PREFIX) {
            Some(AnchorKind::Execution)
        } else {
            None
        }
    }
}

/// Reinforcement counter extending the decay window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resonance {
    pub score: u32,
    pub last_reinforced: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub intent: Intent,
    pub entropy_hash: String,
    pub status: AnchorStatus,
    pub version: String,
    pub permanent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resonance: Option<Resonance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Build a signed anchor for `intent`. Pure: nothing is persisted.
pub fn build_anchor(
    intent: Intent,
    kind: AnchorKind,
    identity: &NodeIdentity,
    now: DateTime<Utc>,
) -> KernelResult<AnchorRecord> {
    let bytes = canonical_bytes(&intent)?;
    let digest = entropy_hash(&bytes);
    let id = anchor_id(kind, &digest);
    let signature = identity.sign(&bytes);

    Ok(AnchorRecord {
        id,
        timestamp: now,
        permanent: intent.permanent,
        intent,
        entropy_hash: digest,
        status: kind.initial_status(),
        version: kind.version().to_string(),
        resonance: None,
        signer: Some(identity.node_id().to_string()),
        public_key: Some(identity.public_key()),
        signature: Some(signature),
    })
}

/// Anchor id for a digest in the given namespace.
pub fn anchor_id(kind: AnchorKind, digest: &str) -> String {
    format!("{}{}", kind.prefix(), &digest[..ANCHOR_ID_HEX_LEN.min(digest.len())])
}

impl AnchorRecord {
    pub fn kind(&self) -> Option<AnchorKind> {
        AnchorKind::of_id(&self.id)
    }

    pub fn resonance_score(&self) -> u32 {
        self.resonance.as_ref().map_or(0, |r| r.score)
    }

    /// Register one reinforcement and restart the decay clock.
    ///
    /// Permanent anchors never decay and carry no resonance; they are left
    /// untouched.
    pub fn reinforce(&mut self, now: DateTime<Utc>) {
        if self.permanent {
            return;
        }
        let score = self.resonance_score().saturating_add(1);
        self.resonance = Some(Resonance { score, last_reinforced: now });
        self.timestamp = now;
    }

    /// Recompute the digest of the stored intent.
    pub fn recompute_entropy_hash(&self) -> KernelResult<String> {
        Ok(entropy_hash(&canonical_bytes(&self.intent)?))
    }

    /// Check the stored signature against the stored public key.
    ///
    /// Unsigned records (reconstructions) return `Ok(false)`.
    pub fn verify_signature(&self) -> KernelResult<bool> {
        match (&self.public_key, &self.signature) {
            (Some(pk), Some(sig)) => verify_hex(pk, &canonical_bytes(&self.intent)?, sig),
            _ => Ok(false),
        }
    }
}
