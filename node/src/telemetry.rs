// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "timevault_node=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Prometheus recorder
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => tracing::warn!("Prometheus recorder not installed: {}", e),
    }

    metrics::describe_counter!("timevault_intents_applied_total", "Transfers applied to the ledger");
    metrics::describe_counter!("timevault_intents_rejected_total", "Transfers rejected before logging");
    metrics::describe_counter!("timevault_anchors_decayed_total", "Anchors evicted to stubs");
    metrics::describe_counter!("timevault_records_purged_total", "Unreadable record files deleted by the sweep");
    metrics::describe_counter!("timevault_hub_messages_total", "Messages received from feed peers");
    metrics::describe_gauge!("timevault_hub_peers", "Connected feed peers");
    metrics::describe_histogram!("timevault_decay_sweep_duration_seconds", "Time taken by one decay sweep");
    metrics::describe_histogram!("timevault_replay_duration_seconds", "Time taken to replay the intent log");

    metrics::gauge!("timevault_node_up", 1.0);
}

/// Render the Prometheus exposition text.
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
