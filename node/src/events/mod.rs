// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Event-Sourced Ledger Persistence
//!
//! # Architecture
//! - Intent log = primary truth for balances (append-only, durable)
//! - Anchor files = derived artifacts, rebuilt for any intent left unanchored
//!
//! # Guarantees
//! - Intents are fsync'd before balances change
//! - Crash recovery via replay
//! - A torn final write is discarded, never half-applied

pub mod intent_log;
pub mod replay;

pub use intent_log::{read_intent_log, IntentLogError, IntentLogWriter, LogEntry};
pub use replay::{apply_to_balances, replay, ReplayOutcome};
