use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::pipeline::Ingestor;

/// Accounts the scheduler refreshes on every pass.
#[async_trait]
pub trait TrackedAccounts: Send + Sync {
    /// Returns false when the account was already tracked.
    async fn track_account(&self, account_id: i64) -> Result<bool>;
    /// Returns false when the account was not tracked.
    async fn untrack_account(&self, account_id: i64) -> Result<bool>;
    /// Ascending by account id.
    async fn tracked_accounts(&self) -> Result<Vec<i64>>;
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    /// Pause between the end of one pass and the start of the next.
    pub interval: Duration,
    pub recent_limit: usize,
    pub concurrency: usize,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            recent_limit: 25,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub accounts: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub matches_committed: usize,
}

pub struct Scheduler {
    ingestor: Arc<Ingestor>,
    accounts: Arc<dyn TrackedAccounts>,
    settings: ScheduleSettings,
}

impl Scheduler {
    pub fn new(
        ingestor: Arc<Ingestor>,
        accounts: Arc<dyn TrackedAccounts>,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            ingestor,
            accounts,
            settings,
        }
    }

    /// Refresh every tracked account once. One account failing does not stop the others.
    pub async fn run_once(&self) -> Result<PassReport> {
        let accounts = self
            .accounts
            .tracked_accounts()
            .await
            .context("failed to list tracked accounts")?;
        let mut report = PassReport {
            accounts: accounts.len(),
            ..PassReport::default()
        };
        if accounts.is_empty() {
            info!("no tracked accounts; nothing to refresh");
            return Ok(report);
        }

        let limit = self.settings.recent_limit;
        let ingestor = self.ingestor.clone();
        let mut results = stream::iter(accounts)
            .map(move |account_id| {
                let ingestor = ingestor.clone();
                async move { (account_id, ingestor.ingest_recent(account_id, limit).await) }
            })
            .buffer_unordered(self.settings.concurrency.max(1));

        while let Some((account_id, result)) = results.next().await {
            match result {
                Ok(summary) => {
                    report.succeeded += 1;
                    report.matches_committed += summary.matches_committed;
                }
                Err(err) => {
                    report.failed += 1;
                    error!(account_id, error = %format!("{err:#}"), "account refresh failed");
                }
            }
        }
        Ok(report)
    }

    /// Run passes until `shutdown` fires, sleeping `interval` after each one.
    pub async fn run_forever(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut pass = 0u64;
        loop {
            pass += 1;
            let started = Instant::now();
            tokio::select! {
                res = self.run_once() => match res {
                    Ok(report) => info!(
                        pass,
                        accounts = report.accounts,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        matches = report.matches_committed,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "scheduler pass complete"
                    ),
                    Err(err) => warn!(pass, error = %format!("{err:#}"), "scheduler pass failed"),
                },
                _ = shutdown.recv() => {
                    info!("scheduler: shutdown during pass");
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = shutdown.recv() => {
                    info!("scheduler: shutdown");
                    return;
                }
            }
        }
    }
}
