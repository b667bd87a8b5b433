//! Cortex orchestrator binary. Configuration is environment-driven; see
//! `hub-config` for the variables and their defaults.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use hub_client::HubClient;
use hub_config::CortexConfig;
use hub_cortex::{run, Cortex, InMemorySessionManager, RemoteDecisionEngine};
use hub_telemetry::{serve_health, HealthState, HubMetrics};
use tracing::{error, info, warn};

const CONNECT_BACKOFF: Duration = Duration::from_secs(2);
const CONNECT_ATTEMPTS: usize = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CortexConfig::from_env().context("loading cortex configuration")?;
    hub_telemetry::init(config.telemetry());

    let engine =
        RemoteDecisionEngine::new(config.llm()).context("building remote decision engine")?;

    let metrics = Arc::new(HubMetrics::new());
    let health = Arc::new(HealthState::new());

    let (health_stop_tx, mut health_stop_rx) = tokio::sync::watch::channel(false);
    let health_task = tokio::spawn(serve_health(
        config.health(),
        Arc::clone(&health),
        Arc::clone(&metrics),
        async move {
            let _ = health_stop_rx.changed().await;
        },
    ));

    let client = connect_with_retry(&config).await?;
    let cortex = Arc::new(Cortex::new(
        config.agent_id(),
        Arc::new(client.clone()),
        Arc::new(engine),
        Arc::new(InMemorySessionManager::new()),
        Arc::clone(&metrics),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    health.set_ready(true);
    info!(agent_id = config.agent_id(), "cortex dispatching");
    run(cortex, client, shutdown_rx)
        .await
        .context("cortex dispatch loop failed")?;

    health.set_ready(false);
    let _ = health_stop_tx.send(true);
    if let Ok(Err(err)) = health_task.await {
        error!(%err, "health endpoint failed");
    }
    Ok(())
}

async fn connect_with_retry(config: &CortexConfig) -> anyhow::Result<HubClient> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        match HubClient::connect(config.client()).await {
            Ok(client) => return Ok(client),
            Err(err) => {
                warn!(
                    attempt,
                    endpoint = config.client().endpoint(),
                    %err,
                    "broker not reachable; retrying"
                );
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
        }
    }
    anyhow::bail!(
        "broker at {} unreachable after {CONNECT_ATTEMPTS} attempts",
        config.client().endpoint()
    )
}
