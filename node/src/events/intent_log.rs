// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Append-Only Intent Log
//!
//! Write-ahead record of every applied intent.
//! - An intent is appended and fsync'd BEFORE balances change
//! - An `Anchored` marker follows once its execution anchor is on disk
//! - A torn final record (crash mid-append) is dropped and truncated on reopen
//!
//! # File Format
//! ```text
//! [Header: 16 bytes][Frame][Frame]...
//! Frame = [len: u32 LE][crc32: u32 LE][bincode LogEntry; len bytes]
//! ```
//!
//! Header:
//! - magic: u32 ("TVIL")
//! - version: u32 (1)
//! - reserved: u64 (0)

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use timevault_kernel::Intent;

const MAGIC: u32 = u32::from_le_bytes(*b"TVIL");
const VERSION: u32 = 1;
const HEADER_LEN: usize = 16;
const FRAME_PREFIX_LEN: usize = 8;
/// Upper bound on one encoded entry. Anything larger is a damaged prefix.
const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Error, Debug)]
pub enum IntentLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid header")]
    InvalidHeader,

    #[error("Corrupted frame at byte offset {0}")]
    Corrupted(usize),

    #[error("Intent log is unusable after a failed append could not be rolled back")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, IntentLogError>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// Intent accepted; balances are updated right after this is durable.
    Intent(Intent),
    /// Execution anchor for `intent_id` has been persisted.
    Anchored { intent_id: String, anchor_id: String },
}

fn header_bytes() -> [u8; HEADER_LEN] {
    let mut bytes = [0u8; HEADER_LEN];
    bytes[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    bytes[4..8].copy_from_slice(&VERSION.to_le_bytes());
    bytes
}

fn check_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < HEADER_LEN {
        return Err(IntentLogError::InvalidHeader);
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if magic != MAGIC || version != VERSION {
        return Err(IntentLogError::InvalidHeader);
    }
    Ok(())
}

fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(entry, bincode::config::standard())
        .map_err(|e| IntentLogError::Serialization(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(IntentLogError::Serialization(format!("entry too large: {} bytes", payload.len())));
    }
    let len = payload.len() as u32;

    let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Parsed log contents.
#[derive(Debug, Default)]
pub struct LogScan {
    pub entries: Vec<LogEntry>,
    /// Byte length of the intact prefix (header + whole frames).
    pub valid_len: usize,
    /// Bytes after `valid_len` that belong to a torn final frame.
    pub torn_bytes: usize,
}

/// Parse a complete log image.
///
/// A damaged frame is treated as a torn write only when it is the last thing
/// in the file: its declared length is plausible and no intact frame follows
/// it. Any other damage is corruption.
pub fn scan_bytes(bytes: &[u8]) -> Result<LogScan> {
    if bytes.is_empty() {
        return Ok(LogScan::default());
    }
    check_header(bytes)?;

    let mut scan = LogScan { valid_len: HEADER_LEN, ..LogScan::default() };
    let mut offset = HEADER_LEN;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < FRAME_PREFIX_LEN {
            break;
        }
        let (len, crc) = frame_prefix(bytes, offset);
        if len > MAX_FRAME_LEN {
            return Err(IntentLogError::Corrupted(offset));
        }
        if remaining - FRAME_PREFIX_LEN < len {
            ensure_tail(bytes, offset)?;
            break;
        }

        let start = offset + FRAME_PREFIX_LEN;
        let end = start + len;
        let payload = &bytes[start..end];
        let is_last = end == bytes.len();

        if crc32fast::hash(payload) != crc {
            if is_last {
                ensure_tail(bytes, offset)?;
                break;
            }
            return Err(IntentLogError::Corrupted(offset));
        }

        let entry = match bincode::serde::decode_from_slice::<LogEntry, _>(payload, bincode::config::standard()) {
            Ok((entry, _)) => entry,
            Err(_) if is_last => {
                ensure_tail(bytes, offset)?;
                break;
            }
            Err(_) => return Err(IntentLogError::Corrupted(offset)),
        };

        scan.entries.push(entry);
        offset = end;
        scan.valid_len = offset;
    }

    scan.torn_bytes = bytes.len() - scan.valid_len;
    Ok(scan)
}

fn frame_prefix(bytes: &[u8], offset: usize) -> (usize, u32) {
    let len = u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]) as usize;
    let crc = u32::from_le_bytes([bytes[offset + 4], bytes[offset + 5], bytes[offset + 6], bytes[offset + 7]]);
    (len, crc)
}

/// Whether a whole, checksummed frame starts at `offset`.
fn intact_frame_at(bytes: &[u8], offset: usize) -> bool {
    if bytes.len() - offset < FRAME_PREFIX_LEN {
        return false;
    }
    let (len, crc) = frame_prefix(bytes, offset);
    let start = offset + FRAME_PREFIX_LEN;
    len > 0 && len <= MAX_FRAME_LEN && len <= bytes.len() - start && crc32fast::hash(&bytes[start..start + len]) == crc
}

/// A bad frame at `offset` may only be dropped if nothing intact comes after it.
fn ensure_tail(bytes: &[u8], offset: usize) -> Result<()> {
    if (offset + 1..bytes.len()).any(|candidate| intact_frame_at(bytes, candidate)) {
        return Err(IntentLogError::Corrupted(offset));
    }
    Ok(())
}

/// Read every intact entry from the log at `path`. A missing file is an empty log.
pub fn read_intent_log(path: impl AsRef<Path>) -> Result<Vec<LogEntry>> {
    let path = path.as_ref();
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let scan = scan_bytes(&bytes)?;
    if scan.torn_bytes > 0 {
        tracing::warn!("Intent log {:?} ends with {} torn bytes; ignoring them", path, scan.torn_bytes);
    }
    Ok(scan.entries)
}

/// Append-only writer.
///
/// # Safety Guarantees
/// - `append` returns only after the frame is fsync'd
/// - A failed append is cut back off the file, so a rejected entry never replays
/// - If that rollback fails too, the writer refuses every further append
/// - Reopening truncates a torn tail so new frames follow intact ones
pub struct IntentLogWriter {
    path: PathBuf,
    file: File,
    /// Length of the durable, intact prefix.
    len: u64,
    entry_count: u64,
    poisoned: bool,
}

impl IntentLogWriter {
    /// Open or create the log file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let existing = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let scan = scan_bytes(&existing)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        let len = if existing.is_empty() {
            file.write_all(&header_bytes())?;
            file.sync_all()?;
            HEADER_LEN
        } else {
            if scan.torn_bytes > 0 {
                tracing::warn!("Truncating {} torn bytes from intent log {:?}", scan.torn_bytes, path);
                file.set_len(scan.valid_len as u64)?;
                file.sync_all()?;
            }
            scan.valid_len
        };

        Ok(Self {
            path,
            file,
            len: len as u64,
            entry_count: scan.entries.len() as u64,
            poisoned: false,
        })
    }

    /// Append one entry and fsync it.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let frame = encode_frame(entry)?;
        self.write_frame(&frame, |file, frame| {
            file.write_all(frame)?;
            file.sync_data()
        })
    }

    fn write_frame<F>(&mut self, frame: &[u8], write: F) -> Result<()>
    where
        F: FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
    {
        if self.poisoned {
            return Err(IntentLogError::Poisoned);
        }
        if let Err(e) = write(&mut self.file, frame) {
            self.roll_back();
            return Err(e.into());
        }
        self.len += frame.len() as u64;
        self.entry_count += 1;
        Ok(())
    }

    /// Cut the file back to the last durable frame.
    fn roll_back(&mut self) {
        let result = self.file.set_len(self.len).and_then(|()| self.file.sync_all());
        if let Err(e) = result {
            tracing::error!("Cannot roll back intent log {:?} to {} bytes: {}", self.path, self.len, e);
            self.poisoned = true;
        } else {
            tracing::warn!("Rolled back failed append on intent log {:?}", self.path);
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;
    use timevault_kernel::IntentRequest;

    fn sample(id: &str) -> LogEntry {
        let mut req = IntentRequest::transfer("alice", "bob", 10.0);
        req.id = Some(id.to_string());
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        LogEntry::Intent(req.normalize(now))
    }

    #[test]
    fn test_create_and_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.log");

        let mut writer = IntentLogWriter::open(&path).unwrap();
        writer.append(&sample("T1")).unwrap();
        writer
            .append(&LogEntry::Anchored { intent_id: "T1".into(), anchor_id: "XAP-000000000001".into() })
            .unwrap();
        assert_eq!(writer.entry_count(), 2);
        drop(writer);

        let entries = read_intent_log(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], sample("T1"));

        let reopened = IntentLogWriter::open(&path).unwrap();
        assert_eq!(reopened.entry_count(), 2);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        assert!(read_intent_log(dir.path().join("absent.log")).unwrap().is_empty());
    }

    #[test]
    fn test_torn_tail_is_dropped_and_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.log");

        let mut writer = IntentLogWriter::open(&path).unwrap();
        writer.append(&sample("T1")).unwrap();
        writer.append(&sample("T2")).unwrap();
        drop(writer);

        // Chop the last frame in half
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let entries = read_intent_log(&path).unwrap();
        assert_eq!(entries, vec![sample("T1")]);

        let mut writer = IntentLogWriter::open(&path).unwrap();
        assert_eq!(writer.entry_count(), 1);
        writer.append(&sample("T3")).unwrap();
        drop(writer);

        let entries = read_intent_log(&path).unwrap();
        assert_eq!(entries, vec![sample("T1"), sample("T3")]);
    }

    #[test]
    fn test_mid_file_corruption_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.log");

        let mut writer = IntentLogWriter::open(&path).unwrap();
        writer.append(&sample("T1")).unwrap();
        writer.append(&sample("T2")).unwrap();
        drop(writer);

        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_LEN + FRAME_PREFIX_LEN + 1] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(read_intent_log(&path), Err(IntentLogError::Corrupted(_))));
    }

    #[test]
    fn test_foreign_header_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.log");
        fs::write(&path, [0u8; HEADER_LEN]).unwrap();

        assert!(matches!(IntentLogWriter::open(&path), Err(IntentLogError::InvalidHeader)));
    }

    #[test]
    fn test_damaged_length_prefix_mid_file_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.log");

        let mut writer = IntentLogWriter::open(&path).unwrap();
        for id in ["T1", "T2", "T3", "T4", "T5"] {
            writer.append(&sample(id)).unwrap();
        }
        drop(writer);
        let original = fs::read(&path).unwrap();

        // High byte of the first frame's length: points far past EOF
        let mut bytes = original.clone();
        bytes[HEADER_LEN + 3] ^= 0x01;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(read_intent_log(&path), Err(IntentLogError::Corrupted(_))));
        assert!(matches!(IntentLogWriter::open(&path), Err(IntentLogError::Corrupted(_))));
        assert_eq!(fs::read(&path).unwrap().len(), original.len());

        // Low byte: still a plausible length, but intact frames follow
        let mut bytes = original.clone();
        bytes[HEADER_LEN + 1] ^= 0x01;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(read_intent_log(&path), Err(IntentLogError::Corrupted(_))));
        assert!(IntentLogWriter::open(&path).is_err());
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_failed_append_is_rolled_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intents.log");

        let mut writer = IntentLogWriter::open(&path).unwrap();
        writer.append(&sample("T1")).unwrap();

        // Half a frame reaches the file before the write fails
        let frame = encode_frame(&sample("T2")).unwrap();
        let err = writer.write_frame(&frame, |file, frame| {
            file.write_all(&frame[..frame.len() / 2])?;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        });
        assert!(matches!(err, Err(IntentLogError::Io(_))));

        // The whole frame is written but the sync fails
        let frame = encode_frame(&sample("T3")).unwrap();
        let err = writer.write_frame(&frame, |file, frame| {
            file.write_all(frame)?;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "sync failed"))
        });
        assert!(err.is_err());
        assert!(!writer.is_poisoned());
        assert_eq!(writer.entry_count(), 1);

        writer.append(&sample("T4")).unwrap();
        drop(writer);

        assert_eq!(read_intent_log(&path).unwrap(), vec![sample("T1"), sample("T4")]);
    }
}
