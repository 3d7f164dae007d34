// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Record Store (the vault directory)
//!
//! One JSON file per record:
//! - `<id>.json`       live anchor
//! - `<id>.stub.json`  decayed stub
//! - `index.json`      digest → id and account → ids (advisory, rebuilt on open)
//!
//! # Guarantees
//! - Every write is temp file + fsync + rename: readers never see a partial file
//! - Unreadable records are treated as absent on read and reported to the sweep
//! - The in-memory index is rebuilt from the directory on open

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use timevault_kernel::{AnchorKind, AnchorRecord, AnchorStatus, Stub};

use crate::config::SignaturePolicy;

pub const ANCHOR_SUFFIX: &str = ".json";
pub const STUB_SUFFIX: &str = ".stub.json";
pub const INDEX_FILE: &str = "index.json";
const TMP_SUFFIX: &str = ".tmp";
const INDEX_VERSION: &str = "tv.index.v2";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid record id: {0:?}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A record found by id: the live anchor if there is one, else its stub.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoredRecord {
    Anchor(AnchorRecord),
    Stub(Stub),
}

/// Outcome of loading one anchor file for the decay sweep.
#[derive(Debug)]
pub enum ScanEntry {
    Anchor(AnchorRecord),
    Corrupt(String),
    /// Removed between listing and loading.
    Missing,
}

/// Counts over the vault, for inspection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultCensus {
    pub anchors: usize,
    pub pending: usize,
    pub reconstructed: usize,
    pub permanent: usize,
    pub stubs: usize,
    pub corrupt: usize,
    pub indexed_digests: usize,
}

/// On-disk shape of `index.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFile {
    pub version: String,
    pub digests: BTreeMap<String, String>,
    pub accounts: BTreeMap<String, BTreeSet<String>>,
}

impl IndexFile {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[derive(Default)]
struct VaultIndex {
    digests: BTreeMap<String, String>,
    accounts: BTreeMap<String, BTreeSet<String>>,
}

impl VaultIndex {
    /// Execution anchors win over capability anchors of the same digest.
    fn insert_digest(&mut self, digest: &str, id: &str) {
        let keep_existing = matches!(
            (self.digests.get(digest).and_then(|cur| AnchorKind::of_id(cur)), AnchorKind::of_id(id)),
            (Some(AnchorKind::Execution), Some(AnchorKind::Capability))
        );
        if !keep_existing {
            self.digests.insert(digest.to_string(), id.to_string());
        }
    }

    fn insert_anchor(&mut self, anchor: &AnchorRecord) {
        self.insert_digest(&anchor.entropy_hash, &anchor.id);
        for account in [&anchor.intent.from, &anchor.intent.to] {
            self.accounts.entry(account.clone()).or_default().insert(anchor.id.clone());
        }
    }

    fn remove_live(&mut self, id: &str) {
        self.accounts.retain(|_, ids| {
            ids.remove(id);
            !ids.is_empty()
        });
    }

    fn to_file(&self) -> IndexFile {
        IndexFile {
            version: INDEX_VERSION.to_string(),
            digests: self.digests.clone(),
            accounts: self.accounts.clone(),
        }
    }
}

pub struct RecordStore {
    dir: PathBuf,
    index: RwLock<VaultIndex>,
    record_lock: Mutex<()>,
    flush_lock: Mutex<()>,
    signatures: SignaturePolicy,
    tmp_counter: AtomicU64,
}

impl RecordStore {
    /// Open (creating if needed) the vault at `dir` and rebuild its index.
    pub fn open(dir: impl AsRef<Path>, signatures: SignaturePolicy) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let store = Self {
            dir,
            index: RwLock::new(VaultIndex::default()),
            record_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
            signatures,
            tmp_counter: AtomicU64::new(0),
        };
        store.remove_stale_tmp_files();
        store.rebuild_index();
        store.flush_index();
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Serializes read-modify-write of a single record. Hold it for one
    /// record at a time, never across a whole scan.
    pub fn record_guard(&self) -> MutexGuard<'_, ()> {
        self.record_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn anchor_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{}{}", id, ANCHOR_SUFFIX)))
    }

    pub fn stub_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{}{}", id, STUB_SUFFIX)))
    }

    // ---- writes ----------------------------------------------------------

    pub fn put_anchor(&self, anchor: &AnchorRecord) -> Result<PathBuf> {
        let path = self.anchor_path(&anchor.id)?;
        let bytes = serde_json::to_vec_pretty(anchor).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.write_atomic(&path, &bytes)?;

        self.index_mut().insert_anchor(anchor);
        self.flush_index();
        tracing::debug!("Stored anchor {} ({:?})", anchor.id, anchor.status);
        Ok(path)
    }

    pub fn put_stub(&self, stub: &Stub) -> Result<PathBuf> {
        let path = self.stub_path(&stub.id)?;
        let bytes = serde_json::to_vec_pretty(stub).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.write_atomic(&path, &bytes)?;

        self.index_mut().insert_digest(&stub.entropy_hash, &stub.id);
        self.flush_index();
        tracing::debug!("Stored stub {}", stub.id);
        Ok(path)
    }

    /// Delete a live anchor file. Returns whether it existed.
    pub fn remove_anchor(&self, id: &str) -> Result<bool> {
        let path = self.anchor_path(id)?;
        let existed = remove_if_exists(&path)?;
        self.index_mut().remove_live(id);
        self.flush_index();
        Ok(existed)
    }

    pub fn remove_stub(&self, id: &str) -> Result<bool> {
        let path = self.stub_path(id)?;
        remove_if_exists(&path)
    }

    /// Delete an unreadable record file outright.
    pub fn purge(&self, path: &Path) -> Result<()> {
        remove_if_exists(path)?;
        if let Some(id) = file_id(path, ANCHOR_SUFFIX) {
            let mut index = self.index_mut();
            index.remove_live(&id);
            let stub_survives = self.stub_path(&id).map(|p| p.exists()).unwrap_or(false);
            if !stub_survives {
                index.digests.retain(|_, v| v != &id);
            }
        } else if let Some(id) = file_id(path, STUB_SUFFIX) {
            let anchor_survives = self.anchor_path(&id).map(|p| p.exists()).unwrap_or(false);
            if !anchor_survives {
                self.index_mut().digests.retain(|_, v| v != &id);
            }
        }
        self.flush_index();
        tracing::warn!("Purged corrupt record file {:?}", path);
        Ok(())
    }

    // ---- reads -----------------------------------------------------------

    /// Live anchor by id. Corrupt or (by policy) unverifiable files read as absent.
    pub fn get_anchor(&self, id: &str) -> Option<AnchorRecord> {
        let path = self.anchor_path(id).ok()?;
        match self.load_anchor(&path)? {
            Ok(anchor) if anchor.id == id => self.admit(anchor),
            Ok(anchor) => {
                tracing::warn!("Anchor file {:?} holds foreign id {}", path, anchor.id);
                None
            }
            Err(reason) => {
                tracing::warn!("Unreadable anchor {:?}: {}", path, reason);
                None
            }
        }
    }

    pub fn get_stub(&self, id: &str) -> Option<Stub> {
        let path = self.stub_path(id).ok()?;
        match self.load_stub(&path)? {
            Ok(stub) => Some(stub),
            Err(reason) => {
                tracing::warn!("Unreadable stub {:?}: {}", path, reason);
                None
            }
        }
    }

    /// Anchor by id, falling back to its stub.
    pub fn get(&self, id: &str) -> Option<StoredRecord> {
        self.get_anchor(id)
            .map(StoredRecord::Anchor)
            .or_else(|| self.get_stub(id).map(StoredRecord::Stub))
    }

    /// Record id for an entropy hash.
    pub fn find_by_digest(&self, digest: &str) -> Option<String> {
        self.index_ref().digests.get(digest).cloned()
    }

    /// All readable live anchors, ordered by id.
    pub fn list_anchors(&self) -> Vec<AnchorRecord> {
        self.anchor_files()
            .into_iter()
            .filter_map(|path| match self.load_anchor(&path)? {
                Ok(anchor) => self.admit(anchor),
                Err(reason) => {
                    tracing::warn!("Skipping unreadable anchor {:?}: {}", path, reason);
                    None
                }
            })
            .collect()
    }

    /// Live anchors where `account` is sender or receiver, via the account index.
    pub fn anchors_for_account(&self, account: &str) -> Vec<AnchorRecord> {
        let ids: Vec<String> = self
            .index_ref()
            .accounts
            .get(account)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.get_anchor(id))
            .filter(|a| a.intent.from == account || a.intent.to == account)
            .collect()
    }

    pub fn list_stubs(&self) -> Vec<Stub> {
        self.files_with(STUB_SUFFIX)
            .into_iter()
            .filter_map(|path| file_id(&path, STUB_SUFFIX))
            .filter_map(|id| self.get_stub(&id))
            .collect()
    }

    /// Paths of every anchor file, sorted.
    pub fn anchor_files(&self) -> Vec<PathBuf> {
        self.files_with(ANCHOR_SUFFIX)
    }

    pub fn stub_files(&self) -> Vec<PathBuf> {
        self.files_with(STUB_SUFFIX)
    }

    /// Every anchor file with its load outcome, for offline inspection.
    /// Takes no record lock.
    pub fn scan(&self) -> Vec<(PathBuf, ScanEntry)> {
        self.anchor_files()
            .into_iter()
            .map(|path| {
                let entry = self.inspect_file(&path);
                (path, entry)
            })
            .collect()
    }

    /// Load one anchor file for the sweep. No signature policy applied.
    pub fn inspect_file(&self, path: &Path) -> ScanEntry {
        match self.load_anchor(path) {
            None => ScanEntry::Missing,
            Some(Ok(anchor)) => ScanEntry::Anchor(anchor),
            Some(Err(reason)) => ScanEntry::Corrupt(reason),
        }
    }

    /// Load one stub file for the sweep: `None` if gone, `Some(Err)` if unreadable.
    pub fn inspect_stub_file(&self, path: &Path) -> Option<std::result::Result<Stub, String>> {
        self.load_stub(path)
    }

    pub fn census(&self) -> VaultCensus {
        let mut census = VaultCensus::default();
        for path in self.anchor_files() {
            match self.load_anchor(&path) {
                Some(Ok(anchor)) => {
                    census.anchors += 1;
                    census.permanent += usize::from(anchor.permanent);
                    census.pending += usize::from(anchor.status == AnchorStatus::Pending);
                    census.reconstructed += usize::from(anchor.status == AnchorStatus::Reconstructed);
                }
                Some(Err(_)) => census.corrupt += 1,
                None => {}
            }
        }
        for path in self.stub_files() {
            match self.load_stub(&path) {
                Some(Ok(_)) => census.stubs += 1,
                Some(Err(_)) => census.corrupt += 1,
                None => {}
            }
        }
        census.indexed_digests = self.index_ref().digests.len();
        census
    }

    // ---- internals -------------------------------------------------------

    fn index_ref(&self) -> std::sync::RwLockReadGuard<'_, VaultIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_mut(&self) -> std::sync::RwLockWriteGuard<'_, VaultIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self, anchor: AnchorRecord) -> Option<AnchorRecord> {
        if self.signatures == SignaturePolicy::VerifyOnRead && anchor.signature.is_some() {
            match anchor.verify_signature() {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!("Signature mismatch on anchor {}", anchor.id);
                    return None;
                }
                Err(e) => {
                    tracing::warn!("Unverifiable anchor {}: {}", anchor.id, e);
                    return None;
                }
            }
        }
        Some(anchor)
    }

    /// `None` if the file does not exist, `Some(Err)` if it cannot be parsed.
    fn load_anchor(&self, path: &Path) -> Option<std::result::Result<AnchorRecord, String>> {
        let bytes = read_if_exists(path)?;
        Some(serde_json::from_slice::<AnchorRecord>(&bytes).map_err(|e| e.to_string()))
    }

    fn load_stub(&self, path: &Path) -> Option<std::result::Result<Stub, String>> {
        let bytes = read_if_exists(path)?;
        Some(serde_json::from_slice::<Stub>(&bytes).map_err(|e| e.to_string()))
    }

    fn files_with(&self, suffix: &str) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot list vault {:?}: {}", self.dir, e);
                return Vec::new();
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| file_id(path, suffix).is_some())
            .collect();
        paths.sort();
        paths
    }

    fn rebuild_index(&self) {
        let mut index = VaultIndex::default();
        for path in self.anchor_files() {
            if let Some(Ok(anchor)) = self.load_anchor(&path) {
                index.insert_anchor(&anchor);
            }
        }
        for stub in self.list_stubs() {
            if !index.digests.contains_key(&stub.entropy_hash) {
                index.insert_digest(&stub.entropy_hash, &stub.id);
            }
        }
        tracing::info!(
            "Vault index rebuilt: {} digests, {} accounts",
            index.digests.len(),
            index.accounts.len()
        );
        *self.index_mut() = index;
    }

    /// Persist the index. The file is advisory, so failures only warn.
    ///
    /// Snapshot and rename happen under one lock so the last writer leaves the
    /// newest snapshot on disk.
    fn flush_index(&self) {
        let _flush = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let file = self.index_ref().to_file();
        let result = serde_json::to_vec_pretty(&file)
            .map_err(|e| StoreError::Serialization(e.to_string()))
            .and_then(|bytes| self.write_atomic(&self.index_path(), &bytes));
        if let Err(e) = result {
            tracing::warn!("Failed to persist vault index: {}", e);
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("record");
        let tmp_path = self.dir.join(format!(".{}.{}{}", file_name, seq, TMP_SUFFIX));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove_stale_tmp_files(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else { return };
        for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
            let is_tmp = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(TMP_SUFFIX));
            if is_tmp {
                tracing::debug!("Removing interrupted write {:?}", path);
                let _ = fs::remove_file(&path);
            }
        }
    }
}

/// Ids become file names: only `[A-Za-z0-9_-]` is allowed.
fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// Record id encoded in `path` for the given suffix, if it is such a record file.
fn file_id(path: &Path, suffix: &str) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name == INDEX_FILE || name.starts_with('.') {
        return None;
    }
    if suffix == ANCHOR_SUFFIX && name.ends_with(STUB_SUFFIX) {
        return None;
    }
    let id = name.strip_suffix(suffix)?;
    validate_id(id).ok()?;
    Some(id.to_string())
}

fn read_if_exists(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!("Cannot read {:?}: {}", path, e);
            None
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
