use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, TimeZone, Utc};

use super::abilities::AbilityTable;
use crate::steam::models::{MatchPayload, PlayerPayload};

#[derive(Debug, Clone, PartialEq)]
pub struct MatchRow {
    pub match_id: i64,
    pub start_time: DateTime<Utc>,
    pub duration_sec: i32,
    pub pre_game_sec: i32,
    pub radiant_win: bool,
    pub radiant_score: i32,
    pub dire_score: i32,
    pub cluster: i32,
    pub lobby_type: i32,
    pub game_mode: i32,
    pub engine: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamResultRow {
    pub match_id: i64,
    pub is_radiant: bool,
    pub tower_status: i32,
    pub barracks_status: i32,
    pub net_worth: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerMatchRow {
    pub match_id: i64,
    pub account_id: i64,
    pub player_slot: i32,
    pub is_radiant: bool,
    pub hero_id: i32,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub gpm: i32,
    pub xpm: i32,
    pub hero_damage: i32,
    pub tower_damage: i32,
    pub hero_healing: i32,
    pub net_worth: i32,
    pub level: i32,
    pub last_hits: i32,
    pub denies: i32,
    pub leaver_status: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerItemRow {
    pub match_id: i64,
    pub account_id: i64,
    pub player_slot: i32,
    pub hero_id: i32,
    pub slot_index: i32,
    pub item_id: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbilityUpgradeRow {
    pub match_id: i64,
    pub account_id: i64,
    pub player_slot: i32,
    pub hero_id: i32,
    pub sequence: i32,
    pub ability_name: String,
    pub game_time_s: i32,
    pub level_granted: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickBanRow {
    pub match_id: i64,
    pub order_idx: i32,
    pub is_pick: bool,
    /// true when the radiant side made the pick/ban.
    pub team: bool,
    pub hero_id: i32,
}

/// Rows accumulated for one chunk, plus every ability name they reference.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChunkRows {
    pub matches: Vec<MatchRow>,
    pub teams: Vec<TeamResultRow>,
    pub players: Vec<PlayerMatchRow>,
    pub items: Vec<PlayerItemRow>,
    pub upgrades: Vec<AbilityUpgradeRow>,
    pub picks_bans: Vec<PickBanRow>,
    pub used_abilities: BTreeSet<String>,
}

impl ChunkRows {
    /// Number of matches folded in so far.
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn match_ids(&self) -> Vec<i64> {
        self.matches.iter().map(|m| m.match_id).collect()
    }

    pub fn row_count(&self) -> usize {
        self.matches.len()
            + self.teams.len()
            + self.players.len()
            + self.items.len()
            + self.upgrades.len()
            + self.picks_bans.len()
    }

    pub fn clear(&mut self) {
        self.matches.clear();
        self.teams.clear();
        self.players.clear();
        self.items.clear();
        self.upgrades.clear();
        self.picks_bans.clear();
        self.used_abilities.clear();
    }

    /// Fold one payload into the accumulators. Pure: no I/O, never fails.
    ///
    /// `match_id` is the id from the reference that fetched the payload; it wins over the
    /// payload's own field so rows always land under the id discovery reported.
    pub fn push_match(&mut self, match_id: i64, payload: &MatchPayload, abilities: &AbilityTable) {
        self.matches.push(MatchRow {
            match_id,
            start_time: unix_to_utc(payload.start_time),
            duration_sec: payload.duration,
            pre_game_sec: payload.pre_game_duration,
            radiant_win: payload.radiant_win,
            radiant_score: payload.radiant_score,
            dire_score: payload.dire_score,
            cluster: payload.cluster,
            lobby_type: payload.lobby_type,
            game_mode: payload.game_mode,
            engine: payload.engine,
        });

        for is_radiant in [true, false] {
            let (tower_status, barracks_status) = if is_radiant {
                (payload.tower_status_radiant, payload.barracks_status_radiant)
            } else {
                (payload.tower_status_dire, payload.barracks_status_dire)
            };
            self.teams.push(TeamResultRow {
                match_id,
                is_radiant,
                tower_status,
                barracks_status,
                net_worth: team_net_worth(&payload.players, is_radiant),
            });
        }

        // A missing player_slot decodes as 0, so several players can claim one slot. Keep the
        // last one; every per-player key includes the slot.
        let last_by_slot = last_index_by(&payload.players, |p| p.player_slot);
        for (idx, player) in payload.players.iter().enumerate() {
            if last_by_slot.get(&player.player_slot) == Some(&idx) {
                self.push_player(match_id, player, abilities);
            }
        }

        let orders = payload
            .picks_bans
            .iter()
            .enumerate()
            .map(|(pos, pb)| pb.order.unwrap_or(pos as i32))
            .collect::<Vec<_>>();
        let last_by_order = last_index_by(&orders, |o| *o);
        for (idx, (pb, order_idx)) in payload.picks_bans.iter().zip(&orders).enumerate() {
            if last_by_order.get(order_idx) != Some(&idx) {
                continue;
            }
            self.picks_bans.push(PickBanRow {
                match_id,
                order_idx: *order_idx,
                is_pick: pb.is_pick,
                team: pb.team == 0,
                hero_id: pb.hero_id,
            });
        }
    }

    fn push_player(&mut self, match_id: i64, pl: &PlayerPayload, abilities: &AbilityTable) {
        self.players.push(PlayerMatchRow {
            match_id,
            account_id: pl.account_id,
            player_slot: pl.player_slot,
            is_radiant: pl.is_radiant(),
            hero_id: pl.hero_id,
            kills: pl.kills,
            deaths: pl.deaths,
            assists: pl.assists,
            gpm: pl.gold_per_min,
            xpm: pl.xp_per_min,
            hero_damage: pl.hero_damage,
            tower_damage: pl.tower_damage,
            hero_healing: pl.hero_healing,
            net_worth: pl.net_worth,
            level: pl.level,
            last_hits: pl.last_hits,
            denies: pl.denies,
            leaver_status: pl.leaver_status,
        });

        for (slot_index, item_id) in pl.items.iter().enumerate() {
            if *item_id == 0 {
                continue;
            }
            self.items.push(PlayerItemRow {
                match_id,
                account_id: pl.account_id,
                player_slot: pl.player_slot,
                hero_id: pl.hero_id,
                slot_index: slot_index as i32,
                item_id: *item_id,
            });
        }

        // Stable sort keeps upstream order for upgrades sharing a timestamp.
        let mut upgrades = pl.ability_upgrades.iter().collect::<Vec<_>>();
        upgrades.sort_by_key(|u| u.time);
        for (idx, up) in upgrades.into_iter().enumerate() {
            let ability_name = abilities.resolve(up.ability);
            self.used_abilities.insert(ability_name.clone());
            self.upgrades.push(AbilityUpgradeRow {
                match_id,
                account_id: pl.account_id,
                player_slot: pl.player_slot,
                hero_id: pl.hero_id,
                sequence: idx as i32 + 1,
                ability_name,
                game_time_s: up.time,
                level_granted: up.level,
            });
        }
    }
}

/// Position of the last element carrying each key.
fn last_index_by<T>(items: &[T], key: impl Fn(&T) -> i32) -> HashMap<i32, usize> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| (key(item), idx))
        .collect()
}

fn team_net_worth(players: &[PlayerPayload], radiant: bool) -> i32 {
    players
        .iter()
        .filter(|p| p.is_radiant() == radiant)
        .fold(0i32, |acc, p| acc.saturating_add(p.net_worth))
}

fn unix_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn table() -> AbilityTable {
        AbilityTable::new(HashMap::from([
            (5003, "antimage_mana_break".to_string()),
            (5004, "antimage_blink".to_string()),
        ]))
    }

    fn payload() -> MatchPayload {
        MatchPayload::from_value(&json!({
            "match_id": 100,
            "start_time": 1_700_000_000,
            "duration": 2400,
            "radiant_win": true,
            "tower_status_radiant": 2047,
            "tower_status_dire": 0,
            "barracks_status_radiant": 63,
            "players": [
                { "account_id": 1, "player_slot": 0, "hero_id": 1, "net_worth": 20000,
                  "item_0": 63, "item_3": 116, "item_neutral": 1190,
                  "ability_upgrades": [
                    { "ability": 5004, "time": 300, "level": 2 },
                    { "ability": 5003, "time": 90, "level": 1 },
                    { "ability": 9999, "time": 420, "level": 3 }
                  ] },
                { "account_id": 2, "player_slot": 1, "hero_id": 2, "net_worth": 10000 },
                { "account_id": 3, "player_slot": 128, "hero_id": 3, "net_worth": 7000 },
                { "account_id": 4294967295u64, "player_slot": 132, "hero_id": 4 }
            ],
            "picks_bans": [
                { "is_pick": false, "hero_id": 10, "team": 0, "order": 0 },
                { "is_pick": true, "hero_id": 11, "team": 1, "order": 1 }
            ]
        }))
    }

    #[test]
    fn builds_all_six_row_sets() {
        let mut rows = ChunkRows::default();
        rows.push_match(100, &payload(), &table());

        assert_eq!(rows.matches.len(), 1);
        assert_eq!(rows.matches[0].duration_sec, 2400);
        assert_eq!(rows.matches[0].start_time.timestamp(), 1_700_000_000);

        assert_eq!(rows.teams.len(), 2);
        assert!(rows.teams[0].is_radiant);
        assert_eq!(rows.teams[0].net_worth, 30000);
        assert_eq!(rows.teams[0].tower_status, 2047);
        assert_eq!(rows.teams[0].barracks_status, 63);
        assert!(!rows.teams[1].is_radiant);
        assert_eq!(rows.teams[1].net_worth, 7000);

        assert_eq!(rows.players.len(), 4);
        assert!(rows.players[1].is_radiant);
        assert!(!rows.players[2].is_radiant);

        let slots = rows.items.iter().map(|i| i.slot_index).collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 3, 9]);

        assert_eq!(rows.picks_bans.len(), 2);
        assert!(rows.picks_bans[0].team);
        assert!(!rows.picks_bans[1].team);
        assert_eq!(rows.picks_bans[1].order_idx, 1);
    }

    #[test]
    fn upgrades_are_sequenced_chronologically_and_recorded() {
        let mut rows = ChunkRows::default();
        rows.push_match(100, &payload(), &table());

        let seq = rows
            .upgrades
            .iter()
            .map(|u| (u.sequence, u.ability_name.as_str(), u.game_time_s))
            .collect::<Vec<_>>();
        assert_eq!(
            seq,
            vec![
                (1, "antimage_mana_break", 90),
                (2, "antimage_blink", 300),
                (3, "id_9999", 420)
            ]
        );
        assert!(rows.used_abilities.contains("id_9999"));
        assert_eq!(rows.used_abilities.len(), 3);
    }

    #[test]
    fn missing_slots_and_orders_never_repeat_a_key() {
        let payload = MatchPayload::from_value(&json!({
            "players": [
                { "account_id": 1, "hero_id": 1, "item_0": 63,
                  "ability_upgrades": [{ "ability": 5003, "time": 90, "level": 1 }] },
                { "account_id": 2, "hero_id": 2, "item_0": 44,
                  "ability_upgrades": [{ "ability": 5004, "time": 95, "level": 1 }] }
            ],
            "picks_bans": [
                { "is_pick": false, "hero_id": 10 },
                { "is_pick": true, "hero_id": 11 },
                { "is_pick": true, "hero_id": 12, "order": 1 }
            ]
        }));
        let mut rows = ChunkRows::default();
        rows.push_match(100, &payload, &table());

        // Both players decode to slot 0; the later one wins along with its items and upgrades.
        assert_eq!(rows.players.len(), 1);
        assert_eq!(rows.players[0].account_id, 2);
        assert_eq!(rows.items.len(), 1);
        assert_eq!(rows.items[0].item_id, 44);
        assert_eq!(rows.upgrades.len(), 1);
        assert_eq!(rows.upgrades[0].ability_name, "antimage_blink");
        assert_eq!(
            rows.used_abilities.iter().collect::<Vec<_>>(),
            vec!["antimage_blink"]
        );

        // Positions stand in for missing orders; the explicit order 1 replaces position 1.
        let picks = rows
            .picks_bans
            .iter()
            .map(|pb| (pb.order_idx, pb.hero_id))
            .collect::<Vec<_>>();
        assert_eq!(picks, vec![(0, 10), (1, 12)]);
    }

    #[test]
    fn empty_payload_still_yields_match_and_two_teams() {
        let mut rows = ChunkRows::default();
        rows.push_match(5, &MatchPayload::default(), &AbilityTable::default());
        assert_eq!(rows.matches.len(), 1);
        assert_eq!(rows.teams.len(), 2);
        assert_eq!(rows.teams[0].net_worth, 0);
        assert_eq!(rows.row_count(), 3);
        rows.clear();
        assert!(rows.is_empty());
        assert_eq!(rows.row_count(), 0);
    }
}
