//! Platform daemon entry point.
//!
//! Loads the layered configuration, initializes tracing and the metrics
//! exporter, bootstraps the platform, and serves until SIGTERM/Ctrl+C. A
//! failed bootstrap exits non-zero with the single step-naming diagnostic
//! from [`tally_core::error::BootstrapError`]; the process never serves
//! traffic from a partially-initialized platform.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use tally_core::config::PlatformConfig;
use tally_platform::{Platform, wait_for_signal};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = PrometheusBuilder::new().install() {
        // Metrics are not worth refusing to start over
        tracing::warn!(error = %e, "metrics exporter not installed");
    }

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = PlatformConfig::load(config_path.as_deref())
        .context("failed to load platform configuration")?;

    let platform = Platform::initialize(config)
        .await
        .context("refusing to serve: platform bootstrap failed")?;

    wait_for_signal()
        .await
        .context("failed to wait for shutdown signal")?;

    if let Err(failures) = platform.shutdown().await {
        for failure in &failures {
            tracing::error!(%failure, "resource release failed");
        }
        anyhow::bail!("shutdown completed with {} failure(s)", failures.len());
    }

    Ok(())
}
