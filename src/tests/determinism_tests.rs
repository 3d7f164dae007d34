// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::anchor::{build_anchor, AnchorKind};
use crate::intent::{Intent, IntentRequest};
use crate::tests::{fixed_identity, t0};

const ORDER_A: &str = r#"{"id":"TXN-1","type":"transfer","from":"alice","to":"bob","amount":500,"unit":"xyls","timestamp":"2025-03-01T12:00:00Z","permanent":false}"#;
const ORDER_B: &str = r#"{"permanent":false,"timestamp":"2025-03-01T12:00:00Z","unit":"xyls","amount":500.0,"to":"bob","from":"alice","type":"transfer","id":"TXN-1"}"#;

#[test]
fn test_entropy_hash_independent_of_key_order() {
    let a: Intent = serde_json::from_str(ORDER_A).unwrap();
    let b: Intent = serde_json::from_str(ORDER_B).unwrap();

    let id = fixed_identity();
    let xa = build_anchor(a, AnchorKind::Execution, &id, t0()).unwrap();
    let xb = build_anchor(b, AnchorKind::Execution, &id, t0()).unwrap();

    assert_eq!(xa.entropy_hash, xb.entropy_hash);
    assert_eq!(xa.id, xb.id);
    assert_eq!(xa.signature, xb.signature);
}

#[test]
fn test_entropy_hash_survives_reserialization() {
    let intent = IntentRequest::transfer("alice", "bob", 12.25).normalize(t0());
    let id = fixed_identity();
    let first = build_anchor(intent.clone(), AnchorKind::Execution, &id, t0()).unwrap();

    let json = serde_json::to_string(&first).unwrap();
    let reparsed: crate::anchor::AnchorRecord = serde_json::from_str(&json).unwrap();

    assert_eq!(reparsed.recompute_entropy_hash().unwrap(), first.entropy_hash);
    assert_eq!(reparsed, first);
}

#[test]
fn test_anchor_time_does_not_affect_address() {
    let intent = IntentRequest::transfer("alice", "bob", 1.0).normalize(t0());
    let id = fixed_identity();
    let a = build_anchor(intent.clone(), AnchorKind::Execution, &id, t0()).unwrap();
    let b = build_anchor(intent, AnchorKind::Execution, &id, t0() + chrono::Duration::days(1)).unwrap();
    assert_eq!(a.id, b.id);
    assert_ne!(a.timestamp, b.timestamp);
}

#[test]
fn test_namespaces_share_digest() {
    let intent = IntentRequest::transfer("alice", "bob", 1.0).normalize(t0());
    let id = fixed_identity();
    let cap = build_anchor(intent.clone(), AnchorKind::Capability, &id, t0()).unwrap();
    let xap = build_anchor(intent, AnchorKind::Execution, &id, t0()).unwrap();
    assert_eq!(cap.entropy_hash, xap.entropy_hash);
    assert_eq!(&cap.id[4..], &xap.id[4..]);
}
