// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Decay stubs and lossy reconstruction.
//!
//! A stub is what survives an evicted anchor: its id, its content address and
//! enough of the intent to regenerate an equivalent anchor. The original
//! timestamp, intent id and signature are gone for good.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anchor::{AnchorRecord, AnchorStatus};
use crate::config::{DEFAULT_UNIT, REGEN_ID_PREFIX, REPLAY_VERSION_SUFFIX};
use crate::intent::{Intent, IntentType};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StubHint {
    #[serde(rename = "type")]
    pub kind: IntentType,
    pub from: String,
    pub to: String,
    pub unit: String,
    pub amount: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stub {
    pub id: String,
    pub entropy_hash: String,
    pub decayed_at: DateTime<Utc>,
    pub version: String,
    pub status: AnchorStatus,
    pub permanent: bool,
    pub hint: StubHint,
}

pub fn build_stub(anchor: &AnchorRecord, now: DateTime<Utc>) -> Stub {
    Stub {
        id: anchor.id.clone(),
        entropy_hash: anchor.entropy_hash.clone(),
        decayed_at: now,
        version: anchor.version.clone(),
        status: AnchorStatus::Decayed,
        permanent: false,
        hint: StubHint {
            kind: anchor.intent.kind,
            from: anchor.intent.from.clone(),
            to: anchor.intent.to.clone(),
            unit: anchor.intent.unit.clone(),
            amount: anchor.intent.amount,
        },
    }
}

/// Regenerate a best-effort anchor from a stub.
///
/// Keeps `id` and `entropy_hash`; the intent id becomes `REGEN-<suffix>` and
/// both timestamps are `now`. The result is unsigned.
pub fn reconstruct_from_stub(stub: &Stub, now: DateTime<Utc>) -> AnchorRecord {
    let suffix = stub.id.split_once('-').map_or(stub.id.as_str(), |(_, rest)| rest);
    let unit = if stub.hint.unit.is_empty() { DEFAULT_UNIT.to_string() } else { stub.hint.unit.clone() };

    let intent = Intent {
        id: format!("{}{}", REGEN_ID_PREFIX, suffix),
        kind: stub.hint.kind,
        from: stub.hint.from.clone(),
        to: stub.hint.to.clone(),
        amount: stub.hint.amount,
        unit,
        timestamp: now,
        permanent: false,
    };

    let version = if stub.version.ends_with(REPLAY_VERSION_SUFFIX) {
        stub.version.clone()
    } else {
        format!("{}{}", stub.version, REPLAY_VERSION_SUFFIX)
    };

    AnchorRecord {
        id: stub.id.clone(),
        timestamp: now,
        intent,
        entropy_hash: stub.entropy_hash.clone(),
        status: AnchorStatus::Reconstructed,
        version,
        permanent: false,
        resonance: None,
        signer: None,
        public_key: None,
        signature: None,
    }
}
