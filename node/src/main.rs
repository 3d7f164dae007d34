// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::Context;
use clap::Parser;
use timevault_node::config::NodeArgs;
use timevault_node::decay::DecayTask;
use timevault_node::identity;
use timevault_node::server::{build_router, AppState};
use timevault_node::telemetry::init_telemetry;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();

    let cfg = NodeArgs::parse().into_config();
    tracing::info!(
        "Initializing TimeVault node: vault {:?}, intent log {:?}, decay {:?}",
        cfg.vault_dir,
        cfg.intent_log_path,
        cfg.decay_policy
    );

    let identity = identity::load(&cfg.key_dir)
        .with_context(|| format!("loading node identity from {:?}", cfg.key_dir))?;
    let state = AppState::bootstrap(&cfg, identity).context("opening vault and ledger")?;

    let decay_task = DecayTask::spawn(state.decay.clone(), cfg.decay_interval);

    let app = build_router(state, cfg.auth_token.clone());

    let addr = cfg.bind_addr;
    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shutting down decay task");
    decay_task.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
