//! Periodic flushing of accumulated metrics to a sink.

use crate::metrics::{MetricsAccumulator, MetricsBatch};
use crate::sink::{persist, MetricsSink};
use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Flush cadence unless configured otherwise.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FlushError {
    /// The sink refused the batch. The batch is not retried.
    #[error("metrics sink failed for period {period} ({endpoints} endpoints): {source}")]
    Sink {
        period: NaiveDate,
        endpoints: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Drains a [`MetricsAccumulator`] into a [`MetricsSink`] on a fixed interval.
#[derive(Debug, Clone)]
pub struct FlushScheduler<S> {
    accumulator: MetricsAccumulator,
    sink: S,
    interval: Duration,
}

impl<S> FlushScheduler<S>
where
    S: MetricsSink + Sync,
    S::Future: Send,
{
    pub fn new(accumulator: MetricsAccumulator, sink: S) -> Self {
        Self { accumulator, sink, interval: DEFAULT_FLUSH_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drain once and persist. Returns the number of endpoints written.
    ///
    /// Empty batches are not sent. A failed batch is dropped: its counters have already
    /// been reset.
    pub async fn flush_once(&self) -> Result<usize, FlushError> {
        let batch = self.accumulator.drain_and_reset();
        self.write(batch).await
    }

    async fn write(&self, batch: MetricsBatch) -> Result<usize, FlushError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let (period, endpoints) = (batch.period, batch.len());
        persist(self.sink.clone(), batch)
            .await
            .map_err(|e| FlushError::Sink { period, endpoints, source: Box::new(e) })?;
        Ok(endpoints)
    }

    async fn flush_logged(&self) {
        match self.flush_once().await {
            Ok(0) => {}
            Ok(endpoints) => {
                debug!(target: "turnstile::flush", endpoints, "metrics flushed");
            }
            Err(e) => {
                warn!(target: "turnstile::flush", error = %e, "metrics flush failed, batch dropped");
            }
        }
    }

    /// Run on a background task until the returned handle is shut down or dropped.
    ///
    /// The first flush happens one interval after spawning. Stopping the task flushes
    /// one last time so the final partial period is kept.
    pub fn spawn(self) -> FlushHandle {
        let (shutdown, mut stop) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.flush_logged().await,
                    _ = &mut stop => break,
                }
            }
            self.flush_logged().await;
            debug!(target: "turnstile::flush", "flush task stopped");
        });
        FlushHandle { shutdown, task }
    }
}

/// Handle to a running flush task. Dropping it also stops the task.
#[derive(Debug)]
pub struct FlushHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl FlushHandle {
    /// Stop the task and wait for its final flush.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(target: "turnstile::flush", error = %e, "flush task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
