// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Configuration constants.

/// Hex characters of the entropy hash kept in an anchor id.
pub const ANCHOR_ID_HEX_LEN: usize = 12;

/// Hex characters of the public key digest kept in a node id.
pub const NODE_ID_HEX_LEN: usize = 6;

/// Hex characters of the digest kept in a derived intent id.
pub const TXN_ID_HEX_LEN: usize = 8;

/// Unit assumed when a producer omits one.
pub const DEFAULT_UNIT: &str = "xyls";

pub const CAPABILITY_PREFIX: &str = "CAP-";
pub const EXECUTION_PREFIX: &str = "XAP-";
pub const NODE_ID_PREFIX: &str = "NODE-";
pub const TXN_ID_PREFIX: &str = "TXN-";
pub const REGEN_ID_PREFIX: &str = "REGEN-";

/// Suffix appended to the version tag of a reconstructed anchor.
pub const REPLAY_VERSION_SUFFIX: &str = ".replay";

pub const DEFAULT_BASE_HALF_LIFE_SECS: u64 = 24 * 3600;
pub const DEFAULT_BONUS_PER_REINFORCEMENT_SECS: u64 = 12 * 3600;
pub const DEFAULT_MAX_BONUS_SECS: u64 = 168 * 3600;
