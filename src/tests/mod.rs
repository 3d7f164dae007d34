pub mod anchor_tests;
pub mod determinism_tests;

use chrono::{DateTime, TimeZone, Utc};

use crate::identity::NodeIdentity;
use crate::intent::{Intent, IntentRequest};

pub(crate) fn fixed_identity() -> NodeIdentity {
    NodeIdentity::from_secret_bytes([42u8; 32])
}

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub(crate) fn transfer(from: &str, to: &str, amount: f64) -> Intent {
    IntentRequest::transfer(from, to, amount).normalize(t0())
}
