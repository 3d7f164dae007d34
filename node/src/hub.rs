// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Broadcast Hub (`/v1/feed`)
//!
//! Fans messages out to every connected WebSocket peer.
//!
//! ## Protocol
//!
//! ### Server → Client
//! ```json
//! {"type": "bridge_ready", "peer_id": 3, "node_id": "NODE-1A2B3C", "peers": 2}
//! {"ok": true, "type": "transfer", "from": "...", "to": "...", "amount": 5, "applied_id": "...", "anchor_id": "..."}
//! {"type": "equilibrium", "accounts": 2, ...}
//! {"type": "malformed", "peer_id": 3, "raw": "...", "error": "..."}
//! ```
//!
//! ### Client → Server
//! Any text. `{"type": "transfer", ...}` is applied through the ledger when
//! `apply_intents` is on; everything else is relayed to the other peers.
//!
//! A peer that lags behind the channel, times out on send or errors is
//! dropped. Other peers are unaffected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use timevault_kernel::{IntentRequest, IntentType};

use crate::config::HubConfig;
use crate::ledger::{self, Equilibrium, SharedLedger, TransferReceipt};

pub type PeerId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Published by the node itself; reaches every peer.
    Node,
    Peer(PeerId),
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub origin: Origin,
    pub payload: Arc<str>,
}

#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub connected_at: DateTime<Utc>,
}

/// Node-generated messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubNotice {
    BridgeReady { peer_id: PeerId, node_id: String, peers: usize },
    Malformed { peer_id: PeerId, raw: String, error: String },
    Equilibrium(Equilibrium),
}

/// Published after a transfer is applied.
#[derive(Debug, Clone, Serialize)]
pub struct IntentAck {
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: IntentType,
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub applied_id: String,
    pub anchor_id: String,
}

impl From<&TransferReceipt> for IntentAck {
    fn from(receipt: &TransferReceipt) -> Self {
        Self {
            ok: true,
            kind: receipt.intent.kind,
            from: receipt.intent.from.clone(),
            to: receipt.intent.to.clone(),
            amount: receipt.intent.amount,
            applied_id: receipt.applied_id.clone(),
            anchor_id: receipt.anchor_id.clone(),
        }
    }
}

/// Sent only to the peer whose intent failed.
#[derive(Debug, Clone, Serialize)]
pub struct IntentRejection {
    pub ok: bool,
    pub error: String,
}

/// What an inbound text message turned out to be.
#[derive(Debug)]
pub enum Inbound {
    Intent(IntentRequest),
    /// Claims to be an intent but does not parse as one.
    InvalidIntent(String),
    Relay,
    Malformed(String),
}

pub struct Hub {
    sender: broadcast::Sender<Frame>,
    peers: DashMap<PeerId, PeerInfo>,
    next_peer: AtomicU64,
    config: HubConfig,
    node_id: String,
}

impl Hub {
    pub fn new(config: HubConfig, node_id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            peers: DashMap::new(),
            next_peer: AtomicU64::new(1),
            config,
            node_id: node_id.into(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn register(&self) -> (PeerId, broadcast::Receiver<Frame>) {
        let peer_id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let rx = self.sender.subscribe();
        self.peers.insert(peer_id, PeerInfo { connected_at: Utc::now() });
        metrics::gauge!("timevault_hub_peers", self.peers.len() as f64);
        tracing::info!("Peer {} connected ({} total)", peer_id, self.peers.len());
        (peer_id, rx)
    }

    pub fn unregister(&self, peer_id: PeerId) -> bool {
        let removed = self.peers.remove(&peer_id).is_some();
        if removed {
            metrics::gauge!("timevault_hub_peers", self.peers.len() as f64);
            tracing::info!("Peer {} disconnected ({} remaining)", peer_id, self.peers.len());
        }
        removed
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_info(&self, peer_id: PeerId) -> Option<PeerInfo> {
        self.peers.get(&peer_id).map(|p| p.value().clone())
    }

    /// Queue `payload` for every subscriber. Returns how many receivers exist.
    pub fn publish(&self, origin: Origin, payload: impl Into<Arc<str>>) -> usize {
        self.sender.send(Frame { origin, payload: payload.into() }).unwrap_or(0)
    }

    pub fn publish_json<T: Serialize>(&self, origin: Origin, message: &T) -> usize {
        match serde_json::to_string(message) {
            Ok(text) => self.publish(origin, text),
            Err(e) => {
                tracing::warn!("Dropping unserializable hub message: {}", e);
                0
            }
        }
    }

    /// Publish the ack and the new equilibrium for an applied transfer.
    pub fn announce_transfer(&self, receipt: &TransferReceipt, equilibrium: Equilibrium) {
        self.publish_json(Origin::Node, &IntentAck::from(receipt));
        self.publish_json(Origin::Node, &HubNotice::Equilibrium(equilibrium));
    }

    /// Whether `frame` goes out to `peer_id`.
    pub fn should_deliver(&self, frame: &Frame, peer_id: PeerId) -> bool {
        match frame.origin {
            Origin::Node => true,
            Origin::Peer(sender) => sender != peer_id || self.config.echo,
        }
    }

    pub fn classify(&self, raw: &str) -> Inbound {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => return Inbound::Malformed(e.to_string()),
        };
        let is_transfer = value.get("type").and_then(Value::as_str) == Some(IntentType::Transfer.as_str());
        if !is_transfer {
            return Inbound::Relay;
        }
        match serde_json::from_value::<IntentRequest>(value) {
            Ok(request) => Inbound::Intent(request),
            Err(e) => Inbound::InvalidIntent(e.to_string()),
        }
    }

    fn handshake(&self, peer_id: PeerId) -> String {
        let notice = HubNotice::BridgeReady {
            peer_id,
            node_id: self.node_id.clone(),
            peers: self.peer_count(),
        };
        serde_json::to_string(&notice).unwrap_or_default()
    }
}

/// Drive one WebSocket connection until either side goes away.
pub async fn serve_peer(hub: Arc<Hub>, ledger: SharedLedger, socket: WebSocket) {
    let (peer_id, mut rx) = hub.register();
    let (mut sink, mut stream) = socket.split();
    let send_timeout = hub.config.send_timeout;

    let greeting = Message::Text(hub.handshake(peer_id));
    if !matches!(tokio::time::timeout(send_timeout, sink.send(greeting)).await, Ok(Ok(()))) {
        tracing::warn!("Peer {} failed handshake", peer_id);
        hub.unregister(peer_id);
        return;
    }

    // Replies meant for this peer only.
    let (direct_tx, mut direct_rx) = mpsc::channel::<String>(16);

    let writer_hub = hub.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                frame = rx.recv() => match frame {
                    Ok(frame) if writer_hub.should_deliver(&frame, peer_id) => frame.payload.to_string(),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Peer {} lagged by {} frames, dropping", peer_id, skipped);
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                direct = direct_rx.recv() => match direct {
                    Some(text) => text,
                    None => break,
                },
            };

            match tokio::time::timeout(send_timeout, sink.send(Message::Text(text))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Send to peer {} failed: {}", peer_id, e);
                    break;
                }
                Err(_) => {
                    tracing::warn!("Send to peer {} timed out", peer_id);
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    let reader_hub = hub.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => {
                        let raw = String::from_utf8_lossy(e.as_bytes()).into_owned();
                        reader_hub.publish_json(
                            Origin::Peer(peer_id),
                            &HubNotice::Malformed { peer_id, raw, error: "binary frame is not UTF-8".into() },
                        );
                        continue;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("Peer {} read error: {}", peer_id, e);
                    break;
                }
            };
            handle_text(&reader_hub, &ledger, peer_id, text, &direct_tx).await;
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    hub.unregister(peer_id);
}

async fn handle_text(hub: &Hub, ledger: &SharedLedger, peer_id: PeerId, text: String, direct: &mpsc::Sender<String>) {
    metrics::counter!("timevault_hub_messages_total", 1);

    match hub.classify(&text) {
        Inbound::Intent(request) if hub.config.apply_intents => {
            let outcome = ledger::mutate(ledger, move |ledger| {
                let receipt = ledger.apply_transfer(request)?;
                Ok((receipt, ledger.equilibrium()))
            })
            .await;
            match outcome {
                Ok((receipt, equilibrium)) => hub.announce_transfer(&receipt, equilibrium),
                Err(e) => reject(direct, peer_id, e.to_string()).await,
            }
        }
        Inbound::InvalidIntent(error) if hub.config.apply_intents => {
            reject(direct, peer_id, format!("invalid intent: {}", error)).await;
        }
        Inbound::Malformed(error) => {
            tracing::debug!("Malformed message from peer {}: {}", peer_id, error);
            hub.publish_json(Origin::Peer(peer_id), &HubNotice::Malformed { peer_id, raw: text, error });
        }
        _ => {
            hub.publish(Origin::Peer(peer_id), text);
        }
    }
}

async fn reject(direct: &mpsc::Sender<String>, peer_id: PeerId, error: String) {
    let body = IntentRejection { ok: false, error };
    if let Ok(text) = serde_json::to_string(&body) {
        if direct.send(text).await.is_err() {
            tracing::debug!("Peer {} gone before rejection was sent", peer_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub(echo: bool) -> Hub {
        Hub::new(HubConfig { echo, ..HubConfig::default() }, "NODE-TEST00")
    }

    #[test]
    fn test_classify() {
        let hub = hub(false);
        assert!(matches!(
            hub.classify(r#"{"type":"transfer","from":"a","to":"b","amount":1}"#),
            Inbound::Intent(_)
        ));
        assert!(matches!(
            hub.classify(r#"{"type":"transfer","from":"a","amount":1}"#),
            Inbound::InvalidIntent(_)
        ));
        assert!(matches!(hub.classify(r#"{"type":"chat","text":"hi"}"#), Inbound::Relay));
        assert!(matches!(hub.classify("[1,2,3]"), Inbound::Relay));
        assert!(matches!(hub.classify("{not json"), Inbound::Malformed(_)));
    }

    #[test]
    fn test_delivery_rules() {
        let quiet = hub(false);
        let echo = hub(true);
        let own = Frame { origin: Origin::Peer(7), payload: Arc::from("x") };
        let node = Frame { origin: Origin::Node, payload: Arc::from("x") };

        assert!(!quiet.should_deliver(&own, 7));
        assert!(quiet.should_deliver(&own, 8));
        assert!(quiet.should_deliver(&node, 7));
        assert!(echo.should_deliver(&own, 7));
    }

    #[tokio::test]
    async fn test_register_and_publish() {
        let hub = hub(false);
        let (a, mut rx_a) = hub.register();
        let (b, _rx_b) = hub.register();
        assert_ne!(a, b);
        assert_eq!(hub.peer_count(), 2);

        assert_eq!(hub.publish(Origin::Peer(b), "hello"), 2);
        let frame = rx_a.recv().await.unwrap();
        assert_eq!(&*frame.payload, "hello");
        assert!(hub.should_deliver(&frame, a));

        assert!(hub.unregister(a));
        assert!(!hub.unregister(a));
        assert_eq!(hub.peer_count(), 1);
    }

    #[test]
    fn test_notice_shapes() {
        let ready = serde_json::to_value(HubNotice::BridgeReady { peer_id: 1, node_id: "NODE-X".into(), peers: 1 }).unwrap();
        assert_eq!(ready["type"], "bridge_ready");

        let eq = Equilibrium { accounts: 1, total: 1.0, coherence_mean: 1.0, entropy: 0.0, balance_index: 1.0 };
        let eq = serde_json::to_value(HubNotice::Equilibrium(eq)).unwrap();
        assert_eq!(eq["type"], "equilibrium");
        assert_eq!(eq["balance_index"], 1.0);
    }
}
