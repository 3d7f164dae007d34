// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Malformed or semantically invalid intent. Rejected, never retried.
    #[error("invalid intent: {0}")]
    InvalidIntent(String),
    /// Key material that cannot be decoded into an ed25519 key.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    /// Canonical serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

pub type KernelResult<T> = core::result::Result<T, KernelError>;
