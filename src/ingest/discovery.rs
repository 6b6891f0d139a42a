use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::steam::{MatchRef, MatchSource};

/// Largest page the history endpoint serves.
pub const HISTORY_PAGE_SIZE: u32 = 100;

/// Consecutive short pages treated as end-of-history during a full walk.
pub const SHORT_PAGE_STREAK_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct DiscoverySettings {
    /// Pause between history pages.
    pub page_delay: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(200),
        }
    }
}

/// Walks an account's history endpoint backward to produce match references.
///
/// Page errors are fatal to the walk and are not retried.
pub struct Discoverer<'a> {
    source: &'a dyn MatchSource,
    settings: DiscoverySettings,
}

impl<'a> Discoverer<'a> {
    pub fn new(source: &'a dyn MatchSource, settings: DiscoverySettings) -> Self {
        Self { source, settings }
    }

    /// Up to `limit` most recent references, newest first.
    pub async fn fetch_recent(&self, account_id: i64, limit: usize) -> Result<Vec<MatchRef>> {
        let mut out: Vec<MatchRef> = Vec::with_capacity(limit.min(1024));
        let mut cursor: i64 = 0;

        while out.len() < limit {
            let want = (limit - out.len()).min(HISTORY_PAGE_SIZE as usize) as u32;
            let page = self
                .source
                .match_history(account_id, want, Some(cursor))
                .await
                .with_context(|| {
                    format!("match history page failed (account {account_id}, cursor {cursor})")
                })?;
            if page.is_empty() {
                break;
            }

            let before = cursor;
            for r in page {
                if out.len() >= limit {
                    break;
                }
                out.push(r);
                cursor = r.match_id - 1;
            }
            debug!(account_id, collected = out.len(), cursor, "recent history page");
            // A zero cursor would restart the walk at the newest match.
            if cursor <= 0 {
                break;
            }
            if cursor == before {
                warn!(account_id, cursor, "history cursor did not advance; stopping walk");
                break;
            }
            self.pause().await;
        }

        info!(account_id, refs = out.len(), limit, "recent match refs discovered");
        Ok(out)
    }

    /// Every reference reachable from the most recent match backward.
    ///
    /// Terminates on an empty page or after `SHORT_PAGE_STREAK_LIMIT` consecutive pages
    /// shorter than `HISTORY_PAGE_SIZE`; upstream never signals end-of-history explicitly.
    pub async fn fetch_all(&self, account_id: i64) -> Result<Vec<MatchRef>> {
        let mut out: Vec<MatchRef> = Vec::new();
        let mut cursor: Option<i64> = None;
        let mut short_streak = 0u32;
        let mut pages = 0usize;

        loop {
            let page = self
                .source
                .match_history(account_id, HISTORY_PAGE_SIZE, cursor)
                .await
                .with_context(|| {
                    format!("match history page failed (account {account_id}, cursor {cursor:?})")
                })?;
            let Some(min_id) = page.iter().map(|r| r.match_id).min() else {
                break;
            };
            pages += 1;
            let page_len = page.len();
            out.extend(page);

            if page_len < HISTORY_PAGE_SIZE as usize {
                short_streak += 1;
                if short_streak >= SHORT_PAGE_STREAK_LIMIT {
                    debug!(account_id, short_streak, "short page streak reached; assuming end of history");
                    break;
                }
            } else {
                short_streak = 0;
            }

            let next = min_id - 1;
            if next <= 0 {
                break;
            }
            if cursor.is_some_and(|c| next >= c) {
                warn!(account_id, cursor = next, "history cursor did not advance; stopping walk");
                break;
            }
            cursor = Some(next);
            self.pause().await;
        }

        info!(account_id, refs = out.len(), pages, "full match history discovered");
        Ok(out)
    }

    async fn pause(&self) {
        if !self.settings.page_delay.is_zero() {
            tokio::time::sleep(self.settings.page_delay).await;
        }
    }
}
