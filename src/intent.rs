// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Intents: the unit of work submitted to the ledger.
//!
//! `IntentRequest` is the wire shape a producer sends. It is normalized into
//! an `Intent` (every field present) before anything is hashed, logged or
//! applied. Unknown fields and unknown intent types fail at parse time.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::short_digest_upper;
use crate::config::{DEFAULT_UNIT, TXN_ID_HEX_LEN, TXN_ID_PREFIX};
use crate::error::{KernelError, KernelResult};

/// Closed set of supported intent types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Transfer,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Transfer => "transfer",
        }
    }
}

/// Intent as received from a producer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntentRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: IntentType,
    pub from: String,
    pub to: String,
    pub amount: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub permanent: bool,
}

impl IntentRequest {
    /// Transfer request with every optional field left to normalization.
    pub fn transfer(from: impl Into<String>, to: impl Into<String>, amount: f64) -> Self {
        Self {
            id: None,
            kind: IntentType::Transfer,
            from: from.into(),
            to: to.into(),
            amount,
            unit: None,
            timestamp: None,
            permanent: false,
        }
    }

    /// Parse a JSON payload. Any serde failure is an `InvalidIntent`.
    pub fn from_json(payload: &[u8]) -> KernelResult<Self> {
        serde_json::from_slice(payload).map_err(|e| KernelError::InvalidIntent(e.to_string()))
    }

    /// Fill in the timestamp, unit and (when absent) the id.
    pub fn normalize(self, now: DateTime<Utc>) -> Intent {
        let timestamp = self.timestamp.unwrap_or(now);
        let id = match self.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => derive_intent_id(&self.from, &self.to, &timestamp),
        };
        Intent {
            id,
            kind: self.kind,
            from: self.from,
            to: self.to,
            amount: self.amount,
            unit: self.unit.unwrap_or_else(|| DEFAULT_UNIT.to_string()),
            timestamp,
            permanent: self.permanent,
        }
    }
}

/// Normalized intent. This is the exact value that is hashed and signed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Intent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IntentType,
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub permanent: bool,
}

impl Intent {
    pub fn validate(&self) -> KernelResult<()> {
        match self.kind {
            IntentType::Transfer => {
                if self.id.trim().is_empty() {
                    return Err(KernelError::InvalidIntent("empty intent id".into()));
                }
                if self.from.trim().is_empty() || self.to.trim().is_empty() {
                    return Err(KernelError::InvalidIntent("transfer needs both `from` and `to`".into()));
                }
                if !self.amount.is_finite() || self.amount < 0.0 {
                    return Err(KernelError::InvalidIntent(format!(
                        "amount must be a finite, non-negative number (got {})",
                        self.amount
                    )));
                }
            }
        }
        Ok(())
    }
}

/// `TXN-` + first hex chars of digest(from ‖ to ‖ timestamp).
pub fn derive_intent_id(from: &str, to: &str, timestamp: &DateTime<Utc>) -> String {
    let seed = format!("{}{}{}", from, to, timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true));
    format!("{}{}", TXN_ID_PREFIX, short_digest_upper(seed.as_bytes(), TXN_ID_HEX_LEN))
}
