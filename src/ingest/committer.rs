use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::rows::ChunkRows;

/// Per-table row counts written by one chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWriteStats {
    pub stub_abilities: usize,
    pub matches: usize,
    pub teams: usize,
    pub players: usize,
    pub items: usize,
    pub upgrades: usize,
    pub picks_bans: usize,
}

/// Relational sink for fact rows.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Atomically: stub-insert missing ability names, delete every existing fact row for the
    /// chunk's match ids, then insert all rows. Either everything lands or nothing does.
    async fn write_chunk(&self, chunk: &ChunkRows) -> Result<ChunkWriteStats>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteRetryPolicy {
    pub max_attempts: u32,
    /// Attempt `n` failing waits `n * step` before the next one.
    pub step: Duration,
}

impl Default for WriteRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_millis(500),
        }
    }
}

impl WriteRetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}

/// Flushes accumulated chunks, one transaction per chunk.
pub struct ChunkCommitter<'a> {
    store: &'a dyn FactStore,
    policy: WriteRetryPolicy,
    chunks_committed: usize,
    matches_committed: usize,
}

impl<'a> ChunkCommitter<'a> {
    pub fn new(store: &'a dyn FactStore, policy: WriteRetryPolicy) -> Self {
        Self {
            store,
            policy,
            chunks_committed: 0,
            matches_committed: 0,
        }
    }

    pub fn chunks_committed(&self) -> usize {
        self.chunks_committed
    }

    pub fn matches_committed(&self) -> usize {
        self.matches_committed
    }

    /// Write `rows` as one chunk and clear them on success. An empty accumulator is a no-op.
    ///
    /// Each retry runs a fresh transaction, so a failed attempt leaves nothing behind. After
    /// the last attempt fails the error is returned and `rows` is left untouched.
    pub async fn flush(&mut self, rows: &mut ChunkRows) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let chunk = self.chunks_committed + 1;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            match self.store.write_chunk(rows).await {
                Ok(stats) => {
                    info!(
                        chunk,
                        matches = stats.matches,
                        rows = rows.row_count(),
                        stub_abilities = stats.stub_abilities,
                        attempt,
                        "committed chunk"
                    );
                    self.chunks_committed += 1;
                    self.matches_committed += rows.match_count();
                    rows.clear();
                    return Ok(());
                }
                Err(err) => {
                    warn!(chunk, attempt, max_attempts, error = %err, "chunk write failed");
                    last_err = Some(err);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow!("chunk write failed"));
        Err(err.context(format!(
            "chunk {chunk} ({} matches) failed {max_attempts} times in a row",
            rows.match_count()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::abilities::AbilityTable;
    use crate::steam::MatchPayload;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyStore {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FactStore for FlakyStore {
        async fn write_chunk(&self, chunk: &ChunkRows) -> Result<ChunkWriteStats> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("connection reset");
            }
            Ok(ChunkWriteStats {
                matches: chunk.matches.len(),
                ..ChunkWriteStats::default()
            })
        }
    }

    fn rows(n: i64) -> ChunkRows {
        let mut rows = ChunkRows::default();
        for id in 0..n {
            rows.push_match(id, &MatchPayload::default(), &AbilityTable::default());
        }
        rows
    }

    fn fast() -> WriteRetryPolicy {
        WriteRetryPolicy {
            max_attempts: 3,
            step: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_is_linear() {
        let policy = WriteRetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = FlakyStore {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        };
        let mut committer = ChunkCommitter::new(&store, fast());
        let mut acc = rows(3);
        committer.flush(&mut acc).await.unwrap();
        assert!(acc.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(committer.chunks_committed(), 1);
        assert_eq!(committer.matches_committed(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_are_fatal_and_keep_rows() {
        let store = FlakyStore {
            failures_left: AtomicU32::new(3),
            calls: AtomicU32::new(0),
        };
        let mut committer = ChunkCommitter::new(&store, fast());
        let mut acc = rows(2);
        let err = committer.flush(&mut acc).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed 3 times"));
        assert_eq!(acc.match_count(), 2);
        assert_eq!(committer.chunks_committed(), 0);
    }

    #[tokio::test]
    async fn empty_flush_skips_store() {
        let store = FlakyStore {
            failures_left: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        };
        let mut committer = ChunkCommitter::new(&store, fast());
        committer.flush(&mut ChunkRows::default()).await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }
}
