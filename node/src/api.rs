// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::VaultCensus;

#[derive(Serialize, Deserialize)]
pub struct BalanceResponse {
    pub account: String,
    pub balance: f64,
}

#[derive(Serialize, Deserialize)]
pub struct BalancesResponse {
    pub balances: BTreeMap<String, f64>,
}

#[derive(Deserialize, Default)]
pub struct SearchParams {
    pub from: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct ApplyIntentResponse {
    pub ok: bool,
    pub applied_id: String,
    pub anchor_id: String,
    /// Post-transfer balances of the two accounts involved.
    pub balances: BTreeMap<String, f64>,
}

#[derive(Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub ok: bool,
    pub anchor_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct ReinforceResponse {
    pub id: String,
    pub reinforced: bool,
}

#[derive(Serialize, Deserialize)]
pub struct NodeInfoResponse {
    pub node_id: String,
    pub public_key: String,
    pub peers: usize,
    pub applied_intents: usize,
    pub vault: VaultCensus,
}
