// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use timevault_kernel::DecayPolicy;

pub const VAULT_DIR_NAME: &str = "timevault";
pub const INTENT_LOG_NAME: &str = "intents.log";
pub const KEY_DIR_NAME: &str = "keys";

/// What the ledger does with a transfer that would leave `from` negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverdraftPolicy {
    #[default]
    Allow,
    Reject,
}

/// Whether stored anchor signatures are checked when records are read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignaturePolicy {
    #[default]
    Trust,
    VerifyOnRead,
}

#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Deliver a peer's own messages back to it.
    pub echo: bool,
    /// Apply inbound `transfer` messages through the ledger instead of relaying them.
    pub apply_intents: bool,
    /// A peer that cannot take a frame within this time is dropped.
    pub send_timeout: Duration,
    /// Frames buffered per subscriber before it counts as lagging.
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            echo: false,
            apply_intents: true,
            send_timeout: Duration::from_secs(5),
            channel_capacity: 256,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    pub vault_dir: PathBuf,
    pub intent_log_path: PathBuf,
    pub key_dir: PathBuf,
    pub auth_token: Option<String>,
    pub decay_interval: Duration,
    pub decay_policy: DecayPolicy,
    pub overdraft: OverdraftPolicy,
    pub signatures: SignaturePolicy,
    pub hub: HubConfig,
    /// Opening balances, applied before the intent log is replayed.
    pub seed_balances: Vec<(String, f64)>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8766)),
            vault_dir: PathBuf::from("data").join(VAULT_DIR_NAME),
            intent_log_path: PathBuf::from("data").join(INTENT_LOG_NAME),
            key_dir: PathBuf::from(KEY_DIR_NAME),
            auth_token: None,
            decay_interval: Duration::from_secs(60),
            decay_policy: DecayPolicy::default(),
            overdraft: OverdraftPolicy::default(),
            signatures: SignaturePolicy::default(),
            hub: HubConfig::default(),
            seed_balances: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Defaults with every on-disk path under `data_dir`.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            vault_dir: data_dir.join(VAULT_DIR_NAME),
            intent_log_path: data_dir.join(INTENT_LOG_NAME),
            key_dir: data_dir.join(KEY_DIR_NAME),
            ..Self::default()
        }
    }
}

/// Command line / environment for the `timevault-node` binary.
#[derive(Parser, Debug)]
#[command(name = "timevault-node")]
#[command(about = "TimeVault ledger node: intents, anchors, decay and the live feed")]
pub struct NodeArgs {
    #[arg(long, env = "TIMEVAULT_BIND", default_value = "127.0.0.1:8766")]
    pub bind: SocketAddr,

    /// Holds the vault directory and the intent log.
    #[arg(long, env = "TIMEVAULT_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory with node_private.key, node_public.key and node_id.txt.
    #[arg(long, env = "TIMEVAULT_KEY_DIR", default_value = "keys")]
    pub key_dir: PathBuf,

    #[arg(long, env = "TIMEVAULT_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    #[arg(long, env = "TIMEVAULT_DECAY_INTERVAL_SECS", default_value_t = 60)]
    pub decay_interval_secs: u64,

    #[arg(long, env = "TIMEVAULT_HALF_LIFE_SECS")]
    pub half_life_secs: Option<u64>,

    #[arg(long, env = "TIMEVAULT_REINFORCE_BONUS_SECS")]
    pub reinforce_bonus_secs: Option<u64>,

    #[arg(long, env = "TIMEVAULT_MAX_BONUS_SECS")]
    pub max_bonus_secs: Option<u64>,

    /// Refuse transfers that would take the sender below zero.
    #[arg(long, env = "TIMEVAULT_REJECT_OVERDRAFTS")]
    pub reject_overdrafts: bool,

    /// Check anchor signatures on every read.
    #[arg(long, env = "TIMEVAULT_VERIFY_SIGNATURES")]
    pub verify_signatures: bool,

    #[arg(long, env = "TIMEVAULT_HUB_ECHO")]
    pub hub_echo: bool,

    /// Relay inbound transfers on the feed without applying them.
    #[arg(long, env = "TIMEVAULT_HUB_RELAY_ONLY")]
    pub hub_relay_only: bool,

    #[arg(long, env = "TIMEVAULT_HUB_SEND_TIMEOUT_MS", default_value_t = 5000)]
    pub hub_send_timeout_ms: u64,

    /// Opening balance, `account=amount`. Repeatable.
    #[arg(long = "seed", env = "TIMEVAULT_SEED", value_delimiter = ',', value_parser = parse_seed)]
    pub seed: Vec<(String, f64)>,
}

impl NodeArgs {
    pub fn into_config(self) -> NodeConfig {
        let mut cfg = NodeConfig::with_data_dir(&self.data_dir);
        cfg.bind_addr = self.bind;
        cfg.key_dir = self.key_dir;
        cfg.auth_token = self.auth_token.filter(|t| !t.is_empty());
        cfg.decay_interval = Duration::from_secs(self.decay_interval_secs.max(1));

        if let Some(secs) = self.half_life_secs {
            cfg.decay_policy.base_half_life = Duration::from_secs(secs);
        }
        if let Some(secs) = self.reinforce_bonus_secs {
            cfg.decay_policy.bonus_per_reinforcement = Duration::from_secs(secs);
        }
        if let Some(secs) = self.max_bonus_secs {
            cfg.decay_policy.max_bonus = Duration::from_secs(secs);
        }

        if self.reject_overdrafts {
            cfg.overdraft = OverdraftPolicy::Reject;
        }
        if self.verify_signatures {
            cfg.signatures = SignaturePolicy::VerifyOnRead;
        }

        cfg.hub.echo = self.hub_echo;
        cfg.hub.apply_intents = !self.hub_relay_only;
        cfg.hub.send_timeout = Duration::from_millis(self.hub_send_timeout_ms);
        cfg.seed_balances = self.seed;
        cfg
    }
}

/// Parse `account=amount`.
pub fn parse_seed(raw: &str) -> Result<(String, f64), String> {
    let (account, amount) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected account=amount, got {:?}", raw))?;
    let account = account.trim();
    if account.is_empty() {
        return Err(format!("empty account in {:?}", raw));
    }
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|e| format!("bad amount in {:?}: {}", raw, e))?;
    if !amount.is_finite() {
        return Err(format!("amount must be finite in {:?}", raw));
    }
    Ok((account.to_string(), amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed() {
        assert_eq!(parse_seed("alice=1000").unwrap(), ("alice".to_string(), 1000.0));
        assert_eq!(parse_seed(" bob = -2.5 ").unwrap(), ("bob".to_string(), -2.5));
        assert!(parse_seed("alice").is_err());
        assert!(parse_seed("=5").is_err());
        assert!(parse_seed("alice=lots").is_err());
        assert!(parse_seed("alice=inf").is_err());
    }

    #[test]
    fn test_args_into_config() {
        let args = NodeArgs::parse_from([
            "timevault-node",
            "--data-dir",
            "/srv/tv",
            "--reject-overdrafts",
            "--hub-relay-only",
            "--half-life-secs",
            "30",
            "--seed",
            "alice=100,bob=5",
        ]);
        let cfg = args.into_config();

        assert_eq!(cfg.vault_dir, PathBuf::from("/srv/tv").join(VAULT_DIR_NAME));
        assert_eq!(cfg.intent_log_path, PathBuf::from("/srv/tv").join(INTENT_LOG_NAME));
        assert_eq!(cfg.overdraft, OverdraftPolicy::Reject);
        assert_eq!(cfg.signatures, SignaturePolicy::Trust);
        assert!(!cfg.hub.apply_intents);
        assert_eq!(cfg.decay_policy.base_half_life, Duration::from_secs(30));
        assert_eq!(cfg.seed_balances.len(), 2);
    }
}
