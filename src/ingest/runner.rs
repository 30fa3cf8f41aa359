//! Background loop that runs the ingester on a fixed interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{CommandStore, IngestError, JobIngester};
use crate::storage::JobPersister;

struct Running {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Polls a [`JobIngester`] every `interval` on a tokio task.
///
/// Failed runs are logged and retried on the next tick; they never stop the
/// loop.
pub struct IngesterRunner<P: JobPersister + 'static, C: CommandStore + 'static> {
    ingester: Arc<JobIngester<P, C>>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl<P: JobPersister + 'static, C: CommandStore + 'static> IngesterRunner<P, C> {
    /// Create a stopped runner.
    pub fn new(ingester: Arc<JobIngester<P, C>>, interval: Duration) -> Self {
        Self {
            ingester,
            interval,
            running: Mutex::new(None),
        }
    }

    /// Get the ingester driven by this runner.
    pub fn ingester(&self) -> &Arc<JobIngester<P, C>> {
        &self.ingester
    }

    /// Whether the loop is running.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Start polling.
    pub async fn start(&self) -> Result<(), IngestError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(IngestError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let ingester = Arc::clone(&self.ingester);
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = ingester.ingest().await {
                            tracing::warn!(error = %e, "Job command ingestion failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::debug!("Ingester loop stopped");
        });

        *running = Some(Running { shutdown_tx, task });
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Ingester started");
        Ok(())
    }

    /// Stop polling and wait for an in-flight run to complete.
    pub async fn stop(&self) -> Result<(), IngestError> {
        let Some(Running { shutdown_tx, task }) = self.running.lock().await.take() else {
            return Err(IngestError::NotRunning);
        };
        let _ = shutdown_tx.send(true);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Ingester task ended abnormally");
        }
        tracing::info!("Ingester stopped");
        Ok(())
    }
}
