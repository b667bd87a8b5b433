//! AgentHub broker binary. Configuration is environment-driven; see
//! `hub-config` for the variables and their defaults.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use hub_broker::AgentHubService;
use hub_config::BrokerConfig;
use hub_proto::AgentHubServer;
use hub_telemetry::{serve_health, HealthState, HubMetrics};
use tonic::transport::Server;
use tracing::{error, info};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BrokerConfig::from_env().context("loading broker configuration")?;
    hub_telemetry::init(config.telemetry());

    let metrics = Arc::new(HubMetrics::new());
    let health = Arc::new(HealthState::new());
    let service = AgentHubService::new(Arc::clone(&metrics));

    let (health_stop_tx, mut health_stop_rx) = tokio::sync::watch::channel(false);
    let health_task = tokio::spawn(serve_health(
        config.health(),
        Arc::clone(&health),
        Arc::clone(&metrics),
        async move {
            let _ = health_stop_rx.changed().await;
        },
    ));

    health.set_ready(true);
    info!(addr = %config.listen(), "agenthub broker listening");

    let server = Server::builder()
        .add_service(AgentHubServer::new(service))
        .serve_with_shutdown(config.listen(), shutdown_signal(Arc::clone(&health)));

    tokio::select! {
        result = server => result.context("broker server failed")?,
        () = force_shutdown() => {
            info!("grace period elapsed; closing remaining streams");
        }
    }

    let _ = health_stop_tx.send(true);
    if let Ok(Err(err)) = health_task.await {
        error!(%err, "health endpoint failed");
    }
    Ok(())
}

async fn shutdown_signal(health: Arc<HealthState>) {
    let _ = tokio::signal::ctrl_c().await;
    health.set_ready(false);
    info!("shutdown signal received; draining in-flight requests");
}

async fn force_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;
}
