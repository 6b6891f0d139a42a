#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dota_ingest::database_ops::MemoryStore;
use dota_ingest::ingest::{
    AbilityCatalog, DiscoverySettings, FactStore, FetchRetryPolicy, IngestSettings, Ingestor,
    WriteRetryPolicy,
};
use dota_ingest::steam::{MatchPayload, MatchRef, MatchSource, RequestThrottle, SteamError};
use serde_json::json;

/// Scripted stand-in for the Steam match endpoints.
#[derive(Default)]
pub struct FakeSource {
    /// Newest first, per account.
    histories: HashMap<i64, Vec<MatchRef>>,
    /// Upstream never returns more than this many refs per page (0 = no cap).
    page_cap: usize,
    failing_accounts: HashSet<i64>,
    payloads: HashMap<i64, MatchPayload>,
    throttles: Mutex<HashMap<i64, u32>>,
    hard_errors: HashSet<i64>,
    pub history_calls: AtomicUsize,
    pub seq_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` matches for `account_id` with ids `first_id..first_id+count`, each with a payload
    /// at sequence number `id * 10`.
    pub fn with_account(mut self, account_id: i64, first_id: i64, count: i64) -> Self {
        let mut refs = Vec::new();
        for id in (first_id..first_id + count).rev() {
            refs.push(MatchRef::new(id, id * 10));
            self.payloads.insert(id * 10, payload(id, &[5003, 5004]));
        }
        self.histories.insert(account_id, refs);
        self
    }

    pub fn with_page_cap(mut self, cap: usize) -> Self {
        self.page_cap = cap;
        self
    }

    pub fn with_failing_account(mut self, account_id: i64) -> Self {
        self.failing_accounts.insert(account_id);
        self
    }

    pub fn with_payload(mut self, seq: i64, payload: MatchPayload) -> Self {
        self.payloads.insert(seq, payload);
        self
    }

    pub fn without_payload(mut self, seq: i64) -> Self {
        self.payloads.remove(&seq);
        self
    }

    /// The next `n` requests for `seq` answer 429.
    pub fn with_throttles(self, seq: i64, n: u32) -> Self {
        self.throttles
            .lock()
            .unwrap()
            .insert(seq, n);
        self
    }

    pub fn with_hard_error(mut self, seq: i64) -> Self {
        self.hard_errors.insert(seq);
        self
    }

    pub fn seq_calls(&self) -> usize {
        self.seq_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatchSource for FakeSource {
    async fn match_history(
        &self,
        account_id: i64,
        matches_requested: u32,
        start_at_match_id: Option<i64>,
    ) -> Result<Vec<MatchRef>, SteamError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_accounts.contains(&account_id) {
            return Err(SteamError::Http {
                status: 500,
                body: "history unavailable".into(),
            });
        }
        let mut take = matches_requested as usize;
        if self.page_cap > 0 {
            take = take.min(self.page_cap);
        }
        let cursor = start_at_match_id.filter(|c| *c > 0);
        Ok(self
            .histories
            .get(&account_id)
            .map(|refs| {
                refs.iter()
                    .filter(|r| cursor.map_or(true, |c| r.match_id <= c))
                    .take(take)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn match_by_seq(&self, match_seq_num: i64) -> Result<Option<MatchPayload>, SteamError> {
        self.seq_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut throttles = self.throttles.lock().unwrap();
            if let Some(left) = throttles.get_mut(&match_seq_num) {
                if *left > 0 {
                    *left -= 1;
                    return Err(SteamError::Throttled);
                }
            }
        }
        if self.hard_errors.contains(&match_seq_num) {
            return Err(SteamError::Http {
                status: 403,
                body: "forbidden".into(),
            });
        }
        Ok(self.payloads.get(&match_seq_num).cloned())
    }
}

/// A two-player match; the radiant player levels every ability in `abilities`.
pub fn payload(match_id: i64, abilities: &[i32]) -> MatchPayload {
    let upgrades = abilities
        .iter()
        .enumerate()
        .map(|(i, a)| json!({ "ability": a, "time": 60 * (i as i64 + 1), "level": i + 1 }))
        .collect::<Vec<_>>();
    MatchPayload::from_value(&json!({
        "match_id": match_id,
        "start_time": 1_700_000_000 + match_id,
        "duration": 1800,
        "radiant_win": match_id % 2 == 0,
        "players": [
            { "account_id": 11, "player_slot": 0, "hero_id": 1, "net_worth": 15000,
              "item_0": 63, "item_neutral": 1190, "ability_upgrades": upgrades },
            { "account_id": 22, "player_slot": 128, "hero_id": 2, "net_worth": 12000,
              "backpack_1": 44 }
        ],
        "picks_bans": [
            { "is_pick": false, "hero_id": 10, "team": 0, "order": 0 },
            { "is_pick": true, "hero_id": 1, "team": 0, "order": 1 }
        ]
    }))
}

pub fn known_abilities() -> HashMap<i32, String> {
    HashMap::from([
        (5003, "antimage_mana_break".to_string()),
        (5004, "antimage_blink".to_string()),
    ])
}

/// Zero delays everywhere so retry paths run instantly.
pub fn fast_settings(chunk_size: usize) -> IngestSettings {
    IngestSettings {
        chunk_size,
        discovery: DiscoverySettings {
            page_delay: Duration::ZERO,
        },
        fetch: FetchRetryPolicy {
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        },
        write: WriteRetryPolicy {
            max_attempts: 3,
            step: Duration::ZERO,
        },
    }
}

pub fn ingestor(
    source: Arc<FakeSource>,
    store: Arc<dyn FactStore>,
    chunk_size: usize,
) -> Ingestor {
    Ingestor::new(
        source,
        store,
        RequestThrottle::unlimited(),
        Arc::new(AbilityCatalog::preloaded(known_abilities())),
        fast_settings(chunk_size),
    )
}

pub fn memory_ingestor(source: FakeSource, chunk_size: usize) -> (Ingestor, Arc<FakeSource>, Arc<MemoryStore>) {
    let source = Arc::new(source);
    let store = Arc::new(MemoryStore::new());
    let ing = ingestor(source.clone(), store.clone(), chunk_size);
    (ing, source, store)
}
