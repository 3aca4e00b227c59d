use std::sync::OnceLock;

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const TOKEN_REFRESH_TOTAL: &str = "mpbridge_worker_token_refresh_total";
const TOKEN_REFRESH_DURATION_MS: &str = "mpbridge_worker_token_refresh_duration_ms";
const TOKEN_EXPIRES_IN_GAUGE: &str = "mpbridge_worker_token_expires_in_secs";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

pub fn register_token_refresh(result: &str, duration_ms: f64) {
    counter!(TOKEN_REFRESH_TOTAL, "result" => result.to_string()).increment(1);
    histogram!(TOKEN_REFRESH_DURATION_MS, "result" => result.to_string())
        .record(duration_ms.max(0.0));
}

pub fn set_token_expires_in(secs: i64) {
    gauge!(TOKEN_EXPIRES_IN_GAUGE).set(secs.max(0) as f64);
}
