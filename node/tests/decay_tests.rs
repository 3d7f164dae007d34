use std::fs;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use timevault_kernel::{build_anchor, AnchorKind, AnchorRecord, AnchorStatus, DecayPolicy, IntentRequest, NodeIdentity};
use timevault_node::config::SignaturePolicy;
use timevault_node::decay::{DecayEngine, DecayTask};
use timevault_node::store::{RecordStore, StoredRecord};

const HOUR: i64 = 3600;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn policy() -> DecayPolicy {
    DecayPolicy {
        base_half_life: Duration::from_secs(24 * 3600),
        bonus_per_reinforcement: Duration::from_secs(12 * 3600),
        max_bonus: Duration::from_secs(168 * 3600),
    }
}

fn anchor(id: &str, permanent: bool, at: DateTime<Utc>) -> AnchorRecord {
    let mut req = IntentRequest::transfer("alice", "bob", 5.0);
    req.id = Some(id.to_string());
    req.permanent = permanent;
    let identity = NodeIdentity::from_secret_bytes([3u8; 32]);
    build_anchor(req.normalize(at), AnchorKind::Execution, &identity, at).unwrap()
}

fn setup(signatures: SignaturePolicy) -> (tempfile::TempDir, Arc<RecordStore>, DecayEngine) {
    let dir = tempdir().unwrap();
    let store = Arc::new(RecordStore::open(dir.path(), signatures).unwrap());
    let engine = DecayEngine::new(store.clone(), policy());
    (dir, store, engine)
}

fn after(hours: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(hours * HOUR)
}

#[test]
fn test_expired_anchor_becomes_stub() {
    let (_dir, store, engine) = setup(SignaturePolicy::Trust);
    let a = anchor("T-1", false, t0());
    store.put_anchor(&a).unwrap();

    // Exactly at the window boundary: still alive
    let report = engine.sweep_now(after(24));
    assert_eq!(report.decayed, 0);
    assert!(store.get_anchor(&a.id).is_some());

    let report = engine.sweep_now(after(25));
    assert_eq!(report.scanned, 1);
    assert_eq!(report.decayed, 1);
    assert!(store.get_anchor(&a.id).is_none());

    let stub = store.get_stub(&a.id).unwrap();
    assert_eq!(stub.entropy_hash, a.entropy_hash);
    assert_eq!(stub.status, AnchorStatus::Decayed);
    assert_eq!(stub.hint.amount, 5.0);

    // Lookup by id and by digest still resolves, to the stub
    assert!(matches!(store.get(&a.id), Some(StoredRecord::Stub(_))));
    assert_eq!(store.find_by_digest(&a.entropy_hash), Some(a.id.clone()));
}

#[test]
fn test_permanent_anchor_never_decays() {
    let (_dir, store, engine) = setup(SignaturePolicy::Trust);
    let a = anchor("T-perm", true, t0());
    store.put_anchor(&a).unwrap();

    let report = engine.sweep_now(after(24 * 365 * 10));
    assert_eq!(report.permanent, 1);
    assert_eq!(report.decayed, 0);
    assert_eq!(store.get_anchor(&a.id).unwrap(), a);
    assert!(store.get_stub(&a.id).is_none());
}

#[test]
fn test_reinforcement_extends_window() {
    let (_dir, store, engine) = setup(SignaturePolicy::Trust);
    let a = anchor("T-1", false, t0());
    store.put_anchor(&a).unwrap();

    // Three reinforcements at t0: window = 24h + 36h
    for _ in 0..3 {
        assert!(engine.reinforce(&a.id, t0()).unwrap());
    }
    assert_eq!(store.get_anchor(&a.id).unwrap().resonance_score(), 3);

    engine.sweep_now(after(59));
    assert!(store.get_anchor(&a.id).is_some(), "survives past the base window");

    engine.sweep_now(after(61));
    assert!(store.get_anchor(&a.id).is_none(), "evicted after the extended window");
    assert!(store.get_stub(&a.id).is_some());
}

#[test]
fn test_reinforce_unknown_and_permanent() {
    let (_dir, store, engine) = setup(SignaturePolicy::Trust);
    assert!(!engine.reinforce("XAP-000000000000", t0()).unwrap());
    assert!(!engine.reinforce("../escape", t0()).unwrap());

    let p = anchor("T-perm", true, t0());
    store.put_anchor(&p).unwrap();
    assert!(engine.reinforce(&p.id, after(1)).unwrap());
    assert_eq!(store.get_anchor(&p.id).unwrap(), p);
}

#[test]
fn test_concurrent_reinforcements_are_not_lost() {
    let (_dir, store, engine) = setup(SignaturePolicy::Trust);
    let a = anchor("T-1", false, t0());
    store.put_anchor(&a).unwrap();
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let id = a.id.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    assert!(engine.reinforce(&id, t0()).unwrap());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.get_anchor(&a.id).unwrap().resonance_score(), 100);
}

#[test]
fn test_reconstruct_from_stub() {
    let (_dir, store, engine) = setup(SignaturePolicy::Trust);
    let a = anchor("T-1", false, t0());
    store.put_anchor(&a).unwrap();
    engine.sweep_now(after(48));

    let now = after(50);
    let regen = engine.reconstruct(&a.id, now).unwrap().unwrap();
    assert_eq!(regen.id, a.id);
    assert_eq!(regen.entropy_hash, a.entropy_hash);
    assert_eq!(regen.status, AnchorStatus::Reconstructed);
    assert_eq!(regen.timestamp, now);
    assert!(regen.intent.id.starts_with("REGEN-"));
    assert_eq!(regen.version, "xap.v1.replay");
    assert!(regen.signature.is_none());

    // Persisted as a live anchor, stub gone
    assert_eq!(store.get_anchor(&a.id).unwrap(), regen);
    assert!(store.get_stub(&a.id).is_none());

    // Asking again returns the live record
    assert_eq!(engine.reconstruct(&a.id, after(51)).unwrap().unwrap(), regen);
    assert!(engine.reconstruct("XAP-ffffffffffff", now).unwrap().is_none());
}

#[test]
fn test_corrupt_file_skipped_then_purged() {
    let (dir, store, engine) = setup(SignaturePolicy::Trust);
    let good = anchor("T-good", false, t0());
    store.put_anchor(&good).unwrap();
    let bad_path = dir.path().join("XAP-badbadbadbad.json");
    fs::write(&bad_path, b"{ not json").unwrap();

    assert_eq!(store.list_anchors(), vec![good.clone()]);
    assert!(store.get_anchor("XAP-badbadbadbad").is_none());
    assert_eq!(store.census().corrupt, 1);

    let report = engine.sweep_now(t0());
    assert_eq!(report.purged, 1);
    assert_eq!(report.decayed, 0);
    assert!(!bad_path.exists());
    assert!(store.get_anchor(&good.id).is_some());
}

#[test]
fn test_corrupt_stub_is_purged() {
    let (dir, store, engine) = setup(SignaturePolicy::Trust);
    let good = anchor("T-good", false, t0());
    store.put_anchor(&good).unwrap();
    engine.sweep_now(after(48));
    assert!(store.get_stub(&good.id).is_some());

    let bad_path = dir.path().join("XAP-badbadbadbad.stub.json");
    fs::write(&bad_path, b"{ not json").unwrap();
    assert_eq!(store.list_stubs().len(), 1);
    assert_eq!(store.census().corrupt, 1);

    let report = engine.sweep_now(after(49));
    assert_eq!(report.purged, 1);
    assert_eq!(report.scanned, 1);
    assert!(!bad_path.exists());
    assert!(store.get_stub(&good.id).is_some());

    let report = engine.sweep_now(after(50));
    assert_eq!(report.purged, 0);
    assert_eq!(store.census().corrupt, 0);
}

#[test]
fn test_verify_on_read_hides_tampered_anchor() {
    let dir = tempdir().unwrap();
    let a = anchor("T-1", false, t0());
    {
        let store = RecordStore::open(dir.path(), SignaturePolicy::Trust).unwrap();
        let path = store.put_anchor(&a).unwrap();
        let mut tampered = a.clone();
        tampered.intent.amount = 5_000.0;
        fs::write(&path, serde_json::to_vec(&tampered).unwrap()).unwrap();
    }

    let trusting = RecordStore::open(dir.path(), SignaturePolicy::Trust).unwrap();
    assert_eq!(trusting.get_anchor(&a.id).unwrap().intent.amount, 5_000.0);

    let verifying = RecordStore::open(dir.path(), SignaturePolicy::VerifyOnRead).unwrap();
    assert!(verifying.get_anchor(&a.id).is_none());
    assert!(verifying.list_anchors().is_empty());
}

#[test]
fn test_cancelled_sweep_stops_early() {
    let (_dir, store, engine) = setup(SignaturePolicy::Trust);
    store.put_anchor(&anchor("T-1", false, t0())).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = engine.sweep(after(100), &cancel);
    assert!(report.interrupted);
    assert_eq!(report.decayed, 0);
    assert_eq!(store.list_anchors().len(), 1);
}

#[test]
fn test_index_rebuilt_on_open() {
    let dir = tempdir().unwrap();
    let a = anchor("T-1", false, t0());
    {
        let store = RecordStore::open(dir.path(), SignaturePolicy::Trust).unwrap();
        store.put_anchor(&a).unwrap();
    }
    fs::remove_file(dir.path().join("index.json")).unwrap();

    let store = RecordStore::open(dir.path(), SignaturePolicy::Trust).unwrap();
    assert_eq!(store.find_by_digest(&a.entropy_hash), Some(a.id.clone()));
    assert_eq!(store.anchors_for_account("bob").len(), 1);
    assert!(dir.path().join("index.json").exists());
}

#[tokio::test]
async fn test_decay_task_sweeps_and_shuts_down() {
    let dir = tempdir().unwrap();
    let store = Arc::new(RecordStore::open(dir.path(), SignaturePolicy::Trust).unwrap());
    let a = anchor("T-old", false, t0());
    store.put_anchor(&a).unwrap();

    let engine = Arc::new(DecayEngine::new(store.clone(), policy()));
    let task = DecayTask::spawn(engine, Duration::from_millis(20));

    let mut evicted = false;
    for _ in 0..100 {
        if store.get_stub(&a.id).is_some() {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(evicted, "periodic sweep should evict an anchor from 2025");

    task.shutdown().await;
}
