use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of equipped-item slots read per player: six inventory, three backpack, one neutral.
pub const ITEM_SLOTS: usize = 10;

/// Player slots below this value belong to the radiant side.
pub const RADIANT_SLOT_CEILING: i32 = 128;

/// Identifying pair used to resolve a full match payload later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchRef {
    pub match_id: i64,
    pub match_seq_num: i64,
}

impl MatchRef {
    pub fn new(match_id: i64, match_seq_num: i64) -> Self {
        Self {
            match_id,
            match_seq_num,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchPayload {
    pub match_id: i64,
    pub match_seq_num: i64,
    pub start_time: i64,
    pub duration: i32,
    pub pre_game_duration: i32,
    pub radiant_win: bool,
    pub radiant_score: i32,
    pub dire_score: i32,
    pub cluster: i32,
    pub lobby_type: i32,
    pub game_mode: i32,
    pub engine: i32,
    pub tower_status_radiant: i32,
    pub tower_status_dire: i32,
    pub barracks_status_radiant: i32,
    pub barracks_status_dire: i32,
    pub players: Vec<PlayerPayload>,
    pub picks_bans: Vec<PickBanPayload>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerPayload {
    pub account_id: i64,
    pub player_slot: i32,
    pub hero_id: i32,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub gold_per_min: i32,
    pub xp_per_min: i32,
    pub hero_damage: i32,
    pub tower_damage: i32,
    pub hero_healing: i32,
    pub net_worth: i32,
    pub level: i32,
    pub last_hits: i32,
    pub denies: i32,
    pub leaver_status: i32,
    /// Item ids by slot index; zero means the slot is empty.
    pub items: [i32; ITEM_SLOTS],
    pub ability_upgrades: Vec<AbilityUpgradePayload>,
}

impl PlayerPayload {
    pub fn is_radiant(&self) -> bool {
        self.player_slot < RADIANT_SLOT_CEILING
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbilityUpgradePayload {
    pub ability: i32,
    pub time: i32,
    pub level: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PickBanPayload {
    pub is_pick: bool,
    pub hero_id: i32,
    pub team: i32,
    /// Draft position; `None` when upstream omitted it.
    pub order: Option<i32>,
}

const ITEM_KEYS: [&str; ITEM_SLOTS] = [
    "item_0",
    "item_1",
    "item_2",
    "item_3",
    "item_4",
    "item_5",
    "backpack_0",
    "backpack_1",
    "backpack_2",
    "item_neutral",
];

impl MatchPayload {
    /// Lenient decode: absent, null or mistyped fields fall back to zero/false/empty.
    pub fn from_value(v: &Value) -> Self {
        Self {
            match_id: int(v, "match_id"),
            match_seq_num: int(v, "match_seq_num"),
            start_time: int(v, "start_time"),
            duration: int32(v, "duration"),
            pre_game_duration: int32(v, "pre_game_duration"),
            radiant_win: flag(v, "radiant_win"),
            radiant_score: int32(v, "radiant_score"),
            dire_score: int32(v, "dire_score"),
            cluster: int32(v, "cluster"),
            lobby_type: int32(v, "lobby_type"),
            game_mode: int32(v, "game_mode"),
            engine: int32(v, "engine"),
            tower_status_radiant: int32(v, "tower_status_radiant"),
            tower_status_dire: int32(v, "tower_status_dire"),
            barracks_status_radiant: int32(v, "barracks_status_radiant"),
            barracks_status_dire: int32(v, "barracks_status_dire"),
            players: array(v, "players")
                .iter()
                .map(PlayerPayload::from_value)
                .collect(),
            picks_bans: array(v, "picks_bans")
                .iter()
                .map(PickBanPayload::from_value)
                .collect(),
        }
    }
}

impl PlayerPayload {
    pub fn from_value(v: &Value) -> Self {
        let mut items = [0i32; ITEM_SLOTS];
        for (slot, key) in ITEM_KEYS.iter().enumerate() {
            items[slot] = int32(v, key);
        }
        Self {
            account_id: int(v, "account_id"),
            player_slot: int32(v, "player_slot"),
            hero_id: int32(v, "hero_id"),
            kills: int32(v, "kills"),
            deaths: int32(v, "deaths"),
            assists: int32(v, "assists"),
            gold_per_min: int32(v, "gold_per_min"),
            xp_per_min: int32(v, "xp_per_min"),
            hero_damage: int32(v, "hero_damage"),
            tower_damage: int32(v, "tower_damage"),
            hero_healing: int32(v, "hero_healing"),
            net_worth: int32(v, "net_worth"),
            level: int32(v, "level"),
            last_hits: int32(v, "last_hits"),
            denies: int32(v, "denies"),
            leaver_status: int32(v, "leaver_status"),
            items,
            ability_upgrades: array(v, "ability_upgrades")
                .iter()
                .map(|u| AbilityUpgradePayload {
                    ability: int32(u, "ability"),
                    time: int32(u, "time"),
                    level: int32(u, "level"),
                })
                .collect(),
        }
    }
}

impl PickBanPayload {
    pub fn from_value(v: &Value) -> Self {
        Self {
            is_pick: flag(v, "is_pick"),
            hero_id: int32(v, "hero_id"),
            team: int32(v, "team"),
            order: opt_int32(v, "order"),
        }
    }
}

/// Extract `result.matches` from a history-style envelope. Anything that is not an array
/// counts as an empty page.
pub fn result_matches(body: &Value) -> &[Value] {
    body.get("result")
        .and_then(|r| r.get("matches"))
        .and_then(|m| m.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Decode the `(match_id, match_seq_num)` pairs of a history page, preserving upstream order.
pub fn parse_history_page(body: &Value) -> Vec<MatchRef> {
    result_matches(body)
        .iter()
        .map(|m| MatchRef::new(int(m, "match_id"), int(m, "match_seq_num")))
        .collect()
}

fn array<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(|x| x.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn int(v: &Value, key: &str) -> i64 {
    let Some(x) = v.get(key) else {
        return 0;
    };
    match x {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

fn int32(v: &Value, key: &str) -> i32 {
    i32::try_from(int(v, key)).unwrap_or(0)
}

fn opt_int32(v: &Value, key: &str) -> Option<i32> {
    match v.get(key) {
        None | Some(Value::Null) => None,
        Some(_) => Some(int32(v, key)),
    }
}

fn flag(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|x| x != 0),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true"),
        _ => false,
    }
}
