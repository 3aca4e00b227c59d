use std::future::Future;
use std::time::{Duration, Instant};

use mpbridge_domain::credentials::CredentialManager;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::observability;

/// Refreshes the shared access token right away and then on every `period`
/// until `shutdown` resolves. Failures are logged and retried next tick.
pub async fn run_refresh_schedule<F>(credentials: CredentialManager, period: Duration, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("token refresh schedule stopping");
                return;
            }
            _ = ticker.tick() => refresh_once(&credentials).await,
        }
    }
}

async fn refresh_once(credentials: &CredentialManager) {
    info!("scheduled access token refresh starting");
    let started = Instant::now();
    let result = credentials.refresh().await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(_) => {
            observability::register_token_refresh("ok", duration_ms);
            if let Ok(Some(remaining)) = credentials.remaining_lifetime().await {
                observability::set_token_expires_in(remaining);
            }
            info!(duration_ms, "scheduled access token refresh finished");
        }
        Err(err) => {
            observability::register_token_refresh("error", duration_ms);
            error!(error = %err, "scheduled access token refresh failed");
        }
    }
}
