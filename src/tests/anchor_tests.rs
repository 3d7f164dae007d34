// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use chrono::Duration;

use crate::anchor::{build_anchor, AnchorKind, AnchorStatus};
use crate::canonical::{canonical_bytes, entropy_hash};
use crate::identity::verify_hex;
use crate::tests::{fixed_identity, t0, transfer};

#[test]
fn test_execution_anchor_shape() {
    let id = fixed_identity();
    let intent = transfer("alice", "bob", 500.0);
    let anchor = build_anchor(intent.clone(), AnchorKind::Execution, &id, t0()).unwrap();

    let digest = entropy_hash(&canonical_bytes(&intent).unwrap());
    assert_eq!(anchor.entropy_hash, digest);
    assert_eq!(anchor.id, format!("XAP-{}", &digest[..12]));
    assert_eq!(anchor.status, AnchorStatus::Anchored);
    assert_eq!(anchor.version, "xap.v1");
    assert_eq!(anchor.intent, intent);
    assert!(!anchor.permanent);
    assert!(anchor.resonance.is_none());
    assert_eq!(anchor.signer.as_deref(), Some(id.node_id()));
    assert_eq!(anchor.kind(), Some(AnchorKind::Execution));
}

#[test]
fn test_capability_anchor_is_pending() {
    let anchor = build_anchor(transfer("alice", "bob", 1.0), AnchorKind::Capability, &fixed_identity(), t0()).unwrap();

    assert!(anchor.id.starts_with("CAP-"));
    assert_eq!(anchor.status, AnchorStatus::Pending);
    assert_eq!(anchor.version, "cap.v1");
}

#[test]
fn test_signature_covers_canonical_intent() {
    let id = fixed_identity();
    let anchor = build_anchor(transfer("alice", "bob", 3.0), AnchorKind::Execution, &id, t0()).unwrap();

    let bytes = canonical_bytes(&anchor.intent).unwrap();
    let pk = anchor.public_key.as_deref().unwrap();
    let sig = anchor.signature.as_deref().unwrap();
    assert!(verify_hex(pk, &bytes, sig).unwrap());
    assert!(anchor.verify_signature().unwrap());

    let mut tampered = anchor.clone();
    tampered.intent.amount = 3000.0;
    assert!(!tampered.verify_signature().unwrap());
}

#[test]
fn test_permanent_copied_from_intent() {
    let mut intent = transfer("alice", "bob", 1.0);
    intent.permanent = true;
    let anchor = build_anchor(intent, AnchorKind::Execution, &fixed_identity(), t0()).unwrap();
    assert!(anchor.permanent);
}

#[test]
fn test_reinforce_updates_resonance_and_clock() {
    let mut anchor = build_anchor(transfer("alice", "bob", 1.0), AnchorKind::Execution, &fixed_identity(), t0()).unwrap();
    let digest = anchor.entropy_hash.clone();

    let later = t0() + Duration::hours(5);
    anchor.reinforce(later);
    anchor.reinforce(later + Duration::hours(1));

    let res = anchor.resonance.as_ref().unwrap();
    assert_eq!(res.score, 2);
    assert_eq!(res.last_reinforced, later + Duration::hours(1));
    assert_eq!(anchor.timestamp, later + Duration::hours(1));
    assert_eq!(anchor.entropy_hash, digest);
    assert_eq!(anchor.recompute_entropy_hash().unwrap(), digest);
}

#[test]
fn test_reinforce_leaves_permanent_anchor_alone() {
    let mut intent = transfer("alice", "bob", 1.0);
    intent.permanent = true;
    let mut anchor = build_anchor(intent, AnchorKind::Execution, &fixed_identity(), t0()).unwrap();

    anchor.reinforce(t0() + Duration::hours(1));
    assert!(anchor.resonance.is_none());
    assert_eq!(anchor.timestamp, t0());
}

#[test]
fn test_kind_of_id() {
    assert_eq!(AnchorKind::of_id("CAP-abc"), Some(AnchorKind::Capability));
    assert_eq!(AnchorKind::of_id("XAP-abc"), Some(AnchorKind::Execution));
    assert_eq!(AnchorKind::of_id("index"), None);
}
