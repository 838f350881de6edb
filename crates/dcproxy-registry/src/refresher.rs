//! Periodic certificate refresh.
//!
//! Re-negotiates every registered server once per refresh delay so that
//! resolver certificate rotation is picked up. Startup registration is
//! done by the caller, so the first pass runs one full delay after start.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::registry::ServersInfo;

pub struct CertRefresher {
    registry: Arc<ServersInfo>,
    delay: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl CertRefresher {
    pub fn new(
        registry: Arc<ServersInfo>,
        delay: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            delay,
            shutdown,
        }
    }

    /// Build a refresher using the delay from the registry's context.
    pub fn from_context(registry: Arc<ServersInfo>, shutdown: broadcast::Receiver<()>) -> Self {
        let delay = registry.context().cert_refresh_delay;
        Self::new(registry, delay, shutdown)
    }

    /// Run until the shutdown signal fires (or its sender is dropped).
    pub async fn run(mut self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.delay.is_zero(), "certificate refresh delay must be non-zero");

        let mut interval = interval_at(Instant::now() + self.delay, self.delay);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(delay_secs = self.delay.as_secs(), "certificate refresher started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("certificate refresher shutting down");
                    return Ok(());
                }

                _ = interval.tick() => {
                    let report = self.registry.refresh().await;
                    if !report.failed.is_empty() {
                        tracing::debug!(failed = ?report.failed_names(), "servers left stale");
                    }
                }
            }
        }
    }
}
