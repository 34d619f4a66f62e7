//! Devbot Controller
//!
//! GitOps controller for the Devbot CRDs:
//! - Repository: tracks a forge repository's branches and maintains its push webhook
//! - Application: materializes one Environment per branch of its repositories
//! - Environment: materializes one Deployment per repository
//! - Deployment: runs the clone, bake and apply jobs for the selected revision

mod backoff;
mod config;
mod controller;
mod duration;
mod error;
mod metrics;
mod naming;
mod reconcile_helpers;
mod reconciler;
mod server;
mod watcher;
mod webhook;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use controller::Controller;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Log filter from `RUST_LOG`, else `LOG_LEVEL`, else `info`
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .filter(|level| !level.trim().is_empty())
                .and_then(|level| EnvFilter::try_new(level).ok())
        })
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting Devbot Controller");

    let config = Config::from_env()?;
    config.log_summary();

    let controller = Controller::new(config).await?;
    controller.run().await?;

    info!("Devbot Controller stopped");
    Ok(())
}
