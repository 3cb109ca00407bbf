//! LMS Gateway - Main Entry Point

use anyhow::Context;
use lms_tenancy::{maintenance::MaintenanceTask, Governance, GovernanceConfig, InMemoryStore};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("LMS Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "/etc/lms/governance.json".into());

    let config = GovernanceConfig::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!(path = %config_path, error = %e, "Config not loaded, using defaults");
        let mut config = GovernanceConfig::default();
        config.apply_env();
        config
    });

    let store = Arc::new(InMemoryStore::new());
    let gov = Governance::with_store(&config, store);

    if config.maintenance.enabled {
        MaintenanceTask::new(gov.clone(), &config.maintenance).spawn();
    }

    let app = routes::router(gov);

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Gateway listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
