//! In-process store with the same chunk semantics as Postgres. Backs `--dry-run` and tests.
use std::collections::{BTreeSet, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::ingest::committer::{ChunkWriteStats, FactStore};
use crate::ingest::rows::{
    AbilityUpgradeRow, ChunkRows, MatchRow, PickBanRow, PlayerItemRow, PlayerMatchRow,
    TeamResultRow,
};
use crate::ingest::scheduler::TrackedAccounts;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemoryTables {
    pub abilities: BTreeSet<String>,
    pub matches: Vec<MatchRow>,
    pub teams: Vec<TeamResultRow>,
    pub players: Vec<PlayerMatchRow>,
    pub items: Vec<PlayerItemRow>,
    pub upgrades: Vec<AbilityUpgradeRow>,
    pub picks_bans: Vec<PickBanRow>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub dim_abilities: usize,
    pub fact_matches: usize,
    pub fact_team_results: usize,
    pub fact_player_match: usize,
    pub fact_player_items: usize,
    pub fact_ability_upgrades: usize,
    pub fact_picks_bans: usize,
}

impl MemoryTables {
    pub fn row_counts(&self) -> RowCounts {
        RowCounts {
            dim_abilities: self.abilities.len(),
            fact_matches: self.matches.len(),
            fact_team_results: self.teams.len(),
            fact_player_match: self.players.len(),
            fact_player_items: self.items.len(),
            fact_ability_upgrades: self.upgrades.len(),
            fact_picks_bans: self.picks_bans.len(),
        }
    }

    /// Ensure catalog, delete the chunk's matches, insert. Fails on a key or reference
    /// violation the way the Postgres schema would.
    fn apply(&mut self, chunk: &ChunkRows) -> Result<usize> {
        let mut stubbed = 0;
        for name in &chunk.used_abilities {
            if self.abilities.insert(name.clone()) {
                stubbed += 1;
            }
        }

        let ids: HashSet<i64> = chunk.matches.iter().map(|m| m.match_id).collect();
        self.upgrades.retain(|r| !ids.contains(&r.match_id));
        self.items.retain(|r| !ids.contains(&r.match_id));
        self.players.retain(|r| !ids.contains(&r.match_id));
        self.picks_bans.retain(|r| !ids.contains(&r.match_id));
        self.teams.retain(|r| !ids.contains(&r.match_id));
        self.matches.retain(|r| !ids.contains(&r.match_id));

        unique_keys("fact_matches", chunk.matches.iter().map(|r| r.match_id))?;
        unique_keys(
            "fact_team_results",
            chunk.teams.iter().map(|r| (r.match_id, r.is_radiant)),
        )?;
        unique_keys(
            "fact_player_match",
            chunk.players.iter().map(|r| (r.match_id, r.player_slot)),
        )?;
        unique_keys(
            "fact_player_items",
            chunk
                .items
                .iter()
                .map(|r| (r.match_id, r.player_slot, r.slot_index)),
        )?;
        unique_keys(
            "fact_ability_upgrades",
            chunk
                .upgrades
                .iter()
                .map(|r| (r.match_id, r.player_slot, r.sequence)),
        )?;
        unique_keys(
            "fact_picks_bans",
            chunk.picks_bans.iter().map(|r| (r.match_id, r.order_idx)),
        )?;

        let children = chunk
            .teams
            .iter()
            .map(|r| r.match_id)
            .chain(chunk.players.iter().map(|r| r.match_id))
            .chain(chunk.items.iter().map(|r| r.match_id))
            .chain(chunk.upgrades.iter().map(|r| r.match_id))
            .chain(chunk.picks_bans.iter().map(|r| r.match_id));
        for match_id in children {
            if !ids.contains(&match_id) {
                bail!("child row references missing fact_matches row match_id={match_id}");
            }
        }
        for up in &chunk.upgrades {
            if !self.abilities.contains(&up.ability_name) {
                bail!(
                    "fact_ability_upgrades references unknown ability {}",
                    up.ability_name
                );
            }
        }

        self.matches.extend(chunk.matches.iter().cloned());
        self.teams.extend(chunk.teams.iter().cloned());
        self.players.extend(chunk.players.iter().cloned());
        self.items.extend(chunk.items.iter().cloned());
        self.upgrades.extend(chunk.upgrades.iter().cloned());
        self.picks_bans.extend(chunk.picks_bans.iter().cloned());
        Ok(stubbed)
    }
}

/// Primary-key check for the rows a chunk inserts. Rows of other matches cannot collide because
/// every key leads with `match_id` and the chunk's matches were just deleted.
fn unique_keys<K>(table: &str, keys: impl IntoIterator<Item = K>) -> Result<()>
where
    K: Eq + Hash + Debug,
{
    let mut seen = HashSet::new();
    for key in keys {
        if seen.contains(&key) {
            bail!("duplicate key in {table}: {key:?}");
        }
        seen.insert(key);
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
    tracked: Mutex<BTreeSet<i64>>,
    fail_next: AtomicU32,
    write_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` chunk writes fail before touching any table.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Chunk write attempts, failed ones included.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MemoryTables {
        self.lock_tables().clone()
    }

    pub fn row_counts(&self) -> RowCounts {
        self.lock_tables().row_counts()
    }

    fn lock_tables(&self) -> MutexGuard<'_, MemoryTables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_tracked(&self) -> MutexGuard<'_, BTreeSet<i64>> {
        self.tracked.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl FactStore for MemoryStore {
    async fn write_chunk(&self, chunk: &ChunkRows) -> Result<ChunkWriteStats> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("injected write failure");
        }

        let mut tables = self.lock_tables();
        // Work on a copy so a failed chunk leaves the committed state untouched.
        let mut next = tables.clone();
        let stub_abilities = next.apply(chunk)?;
        *tables = next;
        Ok(ChunkWriteStats {
            stub_abilities,
            matches: chunk.matches.len(),
            teams: chunk.teams.len(),
            players: chunk.players.len(),
            items: chunk.items.len(),
            upgrades: chunk.upgrades.len(),
            picks_bans: chunk.picks_bans.len(),
        })
    }
}

#[async_trait]
impl TrackedAccounts for MemoryStore {
    async fn track_account(&self, account_id: i64) -> Result<bool> {
        Ok(self.lock_tracked().insert(account_id))
    }

    async fn untrack_account(&self, account_id: i64) -> Result<bool> {
        Ok(self.lock_tracked().remove(&account_id))
    }

    async fn tracked_accounts(&self) -> Result<Vec<i64>> {
        Ok(self.lock_tracked().iter().copied().collect())
    }
}
