use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

use super::abilities::AbilityCatalog;
use super::committer::{ChunkCommitter, FactStore, WriteRetryPolicy};
use super::discovery::{Discoverer, DiscoverySettings};
use super::fetcher::{FetchRetryPolicy, Fetcher};
use super::rows::ChunkRows;
use crate::steam::{MatchRef, MatchSource, RequestThrottle};

pub const DEFAULT_CHUNK_SIZE: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    /// Matches per transaction.
    pub chunk_size: usize,
    pub discovery: DiscoverySettings,
    pub fetch: FetchRetryPolicy,
    pub write: WriteRetryPolicy,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            discovery: DiscoverySettings::default(),
            fetch: FetchRetryPolicy::default(),
            write: WriteRetryPolicy::default(),
        }
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub refs_total: usize,
    pub duplicates: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub chunks_committed: usize,
    pub matches_committed: usize,
}

/// Wires discovery, fetching, row building and chunked commits together.
///
/// All clones of the throttle share one schedule, so every `Ingestor` built from the same
/// `RequestThrottle` respects one global request rate.
pub struct Ingestor {
    source: Arc<dyn MatchSource>,
    store: Arc<dyn FactStore>,
    throttle: RequestThrottle,
    abilities: Arc<AbilityCatalog>,
    settings: IngestSettings,
    account_locks: Mutex<AccountLocks>,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn MatchSource>,
        store: Arc<dyn FactStore>,
        throttle: RequestThrottle,
        abilities: Arc<AbilityCatalog>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            source,
            store,
            throttle,
            abilities,
            settings,
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub async fn fetch_recent(&self, account_id: i64, limit: usize) -> Result<Vec<MatchRef>> {
        Discoverer::new(self.source.as_ref(), self.settings.discovery)
            .fetch_recent(account_id, limit)
            .await
    }

    pub async fn fetch_all(&self, account_id: i64) -> Result<Vec<MatchRef>> {
        Discoverer::new(self.source.as_ref(), self.settings.discovery)
            .fetch_all(account_id)
            .await
    }

    /// Fetch, transform and commit `refs` in chunks of `chunk_size`.
    ///
    /// Unfetchable matches are skipped. A chunk that cannot be written after all retries
    /// aborts the run; chunks committed before it stay committed.
    #[instrument(skip(self, refs), fields(refs = refs.len()))]
    pub async fn ingest(&self, refs: &[MatchRef]) -> Result<IngestSummary> {
        let mut summary = IngestSummary {
            refs_total: refs.len(),
            ..IngestSummary::default()
        };
        let chunk_size = self.settings.chunk_size.max(1);
        let table = self.abilities.table().await;
        let fetcher = Fetcher::new(self.source.as_ref(), &self.throttle, self.settings.fetch);
        let mut committer = ChunkCommitter::new(self.store.as_ref(), self.settings.write);
        let mut rows = ChunkRows::default();
        let mut seen = HashSet::with_capacity(refs.len());

        for r in refs {
            if !seen.insert(r.match_id) {
                summary.duplicates += 1;
                continue;
            }
            let Some(payload) = fetcher.fetch(r.match_id, r.match_seq_num).await else {
                summary.skipped += 1;
                continue;
            };
            // By-sequence lookups return the first match at or after the number, which is not
            // necessarily the one discovery reported.
            if payload.match_id != 0 && payload.match_id != r.match_id {
                warn!(
                    match_id = r.match_id,
                    seq = r.match_seq_num,
                    returned = payload.match_id,
                    "sequence lookup returned a different match; skipping"
                );
                summary.skipped += 1;
                continue;
            }
            summary.fetched += 1;
            rows.push_match(r.match_id, &payload, &table);
            debug!(match_id = r.match_id, buffered = rows.match_count(), "match buffered");

            if rows.match_count() >= chunk_size {
                committer.flush(&mut rows).await?;
            }
        }
        committer.flush(&mut rows).await?;

        summary.chunks_committed = committer.chunks_committed();
        summary.matches_committed = committer.matches_committed();
        info!(
            refs = summary.refs_total,
            fetched = summary.fetched,
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            chunks = summary.chunks_committed,
            "ingest finished"
        );
        Ok(summary)
    }

    /// Discover up to `limit` recent matches for one account and ingest them.
    pub async fn ingest_recent(&self, account_id: i64, limit: usize) -> Result<IngestSummary> {
        let _lease = self.lock_account(account_id).await;
        let refs = self.fetch_recent(account_id, limit).await?;
        self.ingest(&refs).await
    }

    /// Discover and ingest an account's whole reachable history.
    pub async fn ingest_full(&self, account_id: i64) -> Result<IngestSummary> {
        let _lease = self.lock_account(account_id).await;
        let refs = self.fetch_all(account_id).await?;
        self.ingest(&refs).await
    }

    /// Accounts with a run in flight or queued behind one.
    pub fn busy_accounts(&self) -> usize {
        self.lock_map().len()
    }

    /// Serializes runs for the same account; different accounts proceed in parallel.
    async fn lock_account(&self, account_id: i64) -> AccountLease<'_> {
        let lock = self.lock_map().entry(account_id).or_default().clone();
        AccountLease {
            locks: &self.account_locks,
            account_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    fn lock_map(&self) -> MutexGuard<'_, AccountLocks> {
        self.account_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

type AccountLocks = HashMap<i64, Arc<tokio::sync::Mutex<()>>>;

/// Held for the length of one account run. The last lease out removes the account's entry.
struct AccountLease<'a> {
    locks: &'a Mutex<AccountLocks>,
    account_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AccountLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Waiters clone the entry under this map lock, so a count of one means nobody else
        // holds or waits on it.
        if locks
            .get(&self.account_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.account_id);
        }
    }
}
