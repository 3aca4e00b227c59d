mod observability;
mod refresh;

use mpbridge_infra::services::BridgeServices;
use mpbridge_infra::{config::AppConfig, logging::init_tracing};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let services = BridgeServices::connect(&config).await?;
    let period = config.token_refresh_interval();
    info!(period_secs = period.as_secs(), "worker starting");

    refresh::run_refresh_schedule(services.credentials.clone(), period, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for shutdown signal");
        }
    })
    .await;

    if let Some(rendered) = observability::render_metrics() {
        debug!(metrics = %rendered, "final metrics snapshot");
    }
    info!("worker shutdown");

    Ok(())
}
