//! Postgres implementation of the fact sink and the tracked-player registry.
use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use super::db::Db;
use crate::ingest::committer::{ChunkWriteStats, FactStore};
use crate::ingest::rows::{
    AbilityUpgradeRow, ChunkRows, MatchRow, PickBanRow, PlayerItemRow, PlayerMatchRow,
    TeamResultRow,
};
use crate::ingest::scheduler::TrackedAccounts;

/// Postgres caps a single statement at this many bind parameters.
const PG_BIND_LIMIT: usize = 65_535;

/// Child tables first so foreign keys into `fact_matches` never dangle mid-transaction.
const FACT_TABLES_CHILD_FIRST: [&str; 6] = [
    "fact_ability_upgrades",
    "fact_player_items",
    "fact_player_match",
    "fact_picks_bans",
    "fact_team_results",
    "fact_matches",
];

fn rows_per_statement(columns: usize) -> usize {
    (PG_BIND_LIMIT / columns).max(1)
}

#[async_trait]
impl FactStore for Db {
    #[instrument(skip(self, chunk), fields(matches = chunk.match_count(), rows = chunk.row_count()))]
    async fn write_chunk(&self, chunk: &ChunkRows) -> Result<ChunkWriteStats> {
        let mut tx = self.pool.begin().await.context("begin chunk transaction")?;
        sqlx::Executor::execute(
            &mut *tx,
            sqlx::raw_sql("SET TRANSACTION ISOLATION LEVEL READ COMMITTED"),
        )
        .await?;

        let names = chunk.used_abilities.iter().cloned().collect::<Vec<_>>();
        let stub_abilities = ensure_abilities(&mut *tx, &names)
            .await
            .context("ensure ability catalog")?;

        let ids = chunk.match_ids();
        for table in FACT_TABLES_CHILD_FIRST {
            let deleted = sqlx::query(&format!("DELETE FROM {table} WHERE match_id = ANY($1)"))
                .bind(&ids)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("delete existing rows from {table}"))?
                .rows_affected();
            if deleted > 0 {
                debug!(table, deleted, "replaced existing rows");
            }
        }

        insert_matches(&mut *tx, &chunk.matches).await.context("insert fact_matches")?;
        insert_teams(&mut *tx, &chunk.teams).await.context("insert fact_team_results")?;
        insert_players(&mut *tx, &chunk.players).await.context("insert fact_player_match")?;
        insert_items(&mut *tx, &chunk.items).await.context("insert fact_player_items")?;
        insert_upgrades(&mut *tx, &chunk.upgrades).await.context("insert fact_ability_upgrades")?;
        insert_picks_bans(&mut *tx, &chunk.picks_bans).await.context("insert fact_picks_bans")?;

        tx.commit().await.context("commit chunk transaction")?;
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

/// Insert a stub catalog row (name and effective date only) for every name not yet present.
async fn ensure_abilities(conn: &mut PgConnection, names: &[String]) -> Result<usize> {
    if names.is_empty() {
        return Ok(0);
    }
    let existing: HashSet<String> = sqlx::query_scalar::<_, String>(
        "SELECT ability_name FROM dim_abilities WHERE ability_name = ANY($1)",
    )
    .bind(names)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .collect();
    let missing = names
        .iter()
        .filter(|n| !existing.contains(*n))
        .cloned()
        .collect::<Vec<_>>();
    if missing.is_empty() {
        return Ok(0);
    }
    // A concurrent chunk may have stubbed the same name since the lookup above.
    let inserted = sqlx::query(
        "INSERT INTO dim_abilities (ability_name, valid_from)
         SELECT name, CURRENT_DATE FROM UNNEST($1::text[]) AS t(name)
         ON CONFLICT (ability_name) DO NOTHING",
    )
    .bind(&missing)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    debug!(missing = missing.len(), inserted, "stubbed ability catalog entries");
    Ok(inserted as usize)
}

async fn insert_matches(conn: &mut PgConnection, rows: &[MatchRow]) -> Result<()> {
    for batch in rows.chunks(rows_per_statement(11)) {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO fact_matches (match_id, start_time, duration_sec, pre_game_sec, radiant_win, radiant_score, dire_score, cluster, lobby_type, game_mode, engine) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.match_id)
                .push_bind(r.start_time)
                .push_bind(r.duration_sec)
                .push_bind(r.pre_game_sec)
                .push_bind(r.radiant_win)
                .push_bind(r.radiant_score)
                .push_bind(r.dire_score)
                .push_bind(r.cluster)
                .push_bind(r.lobby_type)
                .push_bind(r.game_mode)
                .push_bind(r.engine);
        });
        qb.build().persistent(false).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_teams(conn: &mut PgConnection, rows: &[TeamResultRow]) -> Result<()> {
    for batch in rows.chunks(rows_per_statement(5)) {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO fact_team_results (match_id, is_radiant, tower_status, barracks_status, net_worth) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.match_id)
                .push_bind(r.is_radiant)
                .push_bind(r.tower_status)
                .push_bind(r.barracks_status)
                .push_bind(r.net_worth);
        });
        qb.build().persistent(false).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_players(conn: &mut PgConnection, rows: &[PlayerMatchRow]) -> Result<()> {
    for batch in rows.chunks(rows_per_statement(18)) {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO fact_player_match (match_id, account_id, player_slot, is_radiant, hero_id, kills, deaths, assists, gpm, xpm, hero_damage, tower_damage, hero_healing, net_worth, level, last_hits, denies, leaver_status) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.match_id)
                .push_bind(r.account_id)
                .push_bind(r.player_slot)
                .push_bind(r.is_radiant)
                .push_bind(r.hero_id)
                .push_bind(r.kills)
                .push_bind(r.deaths)
                .push_bind(r.assists)
                .push_bind(r.gpm)
                .push_bind(r.xpm)
                .push_bind(r.hero_damage)
                .push_bind(r.tower_damage)
                .push_bind(r.hero_healing)
                .push_bind(r.net_worth)
                .push_bind(r.level)
                .push_bind(r.last_hits)
                .push_bind(r.denies)
                .push_bind(r.leaver_status);
        });
        qb.build().persistent(false).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_items(conn: &mut PgConnection, rows: &[PlayerItemRow]) -> Result<()> {
    for batch in rows.chunks(rows_per_statement(6)) {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO fact_player_items (match_id, account_id, player_slot, hero_id, slot_index, item_id) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.match_id)
                .push_bind(r.account_id)
                .push_bind(r.player_slot)
                .push_bind(r.hero_id)
                .push_bind(r.slot_index)
                .push_bind(r.item_id);
        });
        qb.build().persistent(false).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_upgrades(conn: &mut PgConnection, rows: &[AbilityUpgradeRow]) -> Result<()> {
    for batch in rows.chunks(rows_per_statement(8)) {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO fact_ability_upgrades (match_id, account_id, player_slot, hero_id, sequence, ability_name, game_time_s, level_granted) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.match_id)
                .push_bind(r.account_id)
                .push_bind(r.player_slot)
                .push_bind(r.hero_id)
                .push_bind(r.sequence)
                .push_bind(&r.ability_name)
                .push_bind(r.game_time_s)
                .push_bind(r.level_granted);
        });
        qb.build().persistent(false).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_picks_bans(conn: &mut PgConnection, rows: &[PickBanRow]) -> Result<()> {
    for batch in rows.chunks(rows_per_statement(5)) {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO fact_picks_bans (match_id, order_idx, is_pick, team, hero_id) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.match_id)
                .push_bind(r.order_idx)
                .push_bind(r.is_pick)
                .push_bind(r.team)
                .push_bind(r.hero_id);
        });
        qb.build().persistent(false).execute(&mut *conn).await?;
    }
    Ok(())
}

#[async_trait]
impl TrackedAccounts for Db {
    #[instrument(skip(self))]
    async fn track_account(&self, account_id: i64) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO tracked_players (account_id) VALUES ($1) ON CONFLICT (account_id) DO NOTHING",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn untrack_account(&self, account_id: i64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM tracked_players WHERE account_id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn tracked_accounts(&self) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT account_id FROM tracked_players ORDER BY account_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_stay_under_bind_limit() {
        for cols in [5, 6, 8, 11, 18] {
            assert!(rows_per_statement(cols) * cols <= PG_BIND_LIMIT);
        }
        assert_eq!(rows_per_statement(8), 8191);
    }
}
