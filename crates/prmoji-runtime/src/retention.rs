//! Age-based cleanup of stale mappings.
//!
//! A mapping is stale once its UTC insertion date falls strictly before
//! `today - retention_days`. Sweeps run on demand and from a periodic task
//! whose first run happens one interval after startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use prmoji_store::{system_clock, MappingClock, MappingStore, MappingStoreError, StoreResult};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_RETENTION_DAYS: u32 = 90;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SWEEP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSweeperConfig {
    pub interval: Duration,
    pub retention_days: u32,
    /// Upper bound on one sweep, including store access.
    pub run_timeout: Duration,
}

impl Default for RetentionSweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            retention_days: DEFAULT_RETENTION_DAYS,
            run_timeout: DEFAULT_SWEEP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub cutoff: NaiveDate,
    pub deleted: u64,
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("retention sweep timed out after {0:?}")]
    Timeout(Duration),
    #[error("retention sweep failed: {0}")]
    Store(#[from] MappingStoreError),
}

/// Oldest UTC date that is still retained.
pub fn cutoff_date_utc(now: DateTime<Utc>, retention_days: u32) -> NaiveDate {
    now.date_naive()
        .checked_sub_days(Days::new(u64::from(retention_days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Deletes mappings older than `retention_days` relative to `now`.
pub async fn sweep(
    store: &dyn MappingStore,
    retention_days: u32,
    now: DateTime<Utc>,
) -> StoreResult<u64> {
    store
        .delete_older_than(cutoff_date_utc(now, retention_days))
        .await
}

pub struct RetentionSweeper {
    store: Arc<dyn MappingStore>,
    config: RetentionSweeperConfig,
    clock: MappingClock,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn MappingStore>, config: RetentionSweeperConfig) -> Self {
        Self::with_clock(store, config, system_clock())
    }

    pub fn with_clock(
        store: Arc<dyn MappingStore>,
        config: RetentionSweeperConfig,
        clock: MappingClock,
    ) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport, SweepError> {
        let now = (self.clock)();
        let cutoff = cutoff_date_utc(now, self.config.retention_days);
        let deleted = tokio::time::timeout(
            self.config.run_timeout,
            self.store.delete_older_than(cutoff),
        )
        .await
        .map_err(|_| SweepError::Timeout(self.config.run_timeout))??;
        tracing::info!(
            cutoff = %cutoff,
            retention_days = self.config.retention_days,
            deleted,
            "retention sweep completed"
        );
        Ok(SweepReport { cutoff, deleted })
    }
}

pub struct RetentionSweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RetentionSweeperHandle {
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Spawns the periodic sweep on the current Tokio runtime.
pub fn start_retention_sweeper(sweeper: Arc<RetentionSweeper>) -> Result<RetentionSweeperHandle> {
    if sweeper.config.interval.is_zero() {
        anyhow::bail!("retention sweep interval must be greater than zero");
    }
    let handle = tokio::runtime::Handle::try_current()
        .context("retention sweeper requires an active Tokio runtime")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = handle.spawn(async move {
        run_retention_loop(sweeper, shutdown_rx).await;
    });
    Ok(RetentionSweeperHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn run_retention_loop(sweeper: Arc<RetentionSweeper>, mut shutdown_rx: oneshot::Receiver<()>) {
    let period = sweeper.config.interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::debug!(interval_secs = period.as_secs(), "retention sweeper started");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                if let Err(error) = sweeper.run_once().await {
                    tracing::error!(error = %error, "periodic retention sweep failed");
                }
            }
        }
    }
    tracing::debug!("retention sweeper stopped");
}
