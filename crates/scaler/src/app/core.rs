use std::time::Duration;

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::app::reconciler::Reconciler;

/// Application core: a reconciler plus the cadence it runs at.
pub struct Application {
    reconciler: Reconciler,
    interval: Duration,
}

impl Application {
    pub fn new(reconciler: Reconciler, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Run a single pass and report its outcome.
    pub async fn run_once(&self) -> Result<()> {
        self.reconciler
            .reconcile_once()
            .await
            .map_err(|e| anyhow::anyhow!("Reconciliation failed: {e:?}"))
    }

    /// Reconcile every interval until `cancellation_token` fires.
    ///
    /// A failed pass is logged and retried on the next tick.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        tracing::info!(interval = ?self.interval, "Starting reconciliation loop");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    tracing::info!("Reconciliation loop shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!("{e}");
                    }
                }
            }
        }
    }

    /// Wait for SIGTERM or SIGINT, then cancel `cancellation_token`.
    pub async fn wait_for_shutdown(cancellation_token: CancellationToken) -> Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }

        cancellation_token.cancel();
        Ok(())
    }
}
