//! The authoritative world and the read-only views derived from it

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::player::Player;
use crate::{SessionId, DEFAULT_GAME_MODE, DEFAULT_WEATHER};

/// One room's shared world
///
/// Players are keyed by session id in a `BTreeMap` so iteration order, and
/// therefore snapshot order, is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    players: BTreeMap<SessionId, Player>,
    world_time: u64,
    tick: u64,
    pub game_mode: String,
    pub weather: String,
}

impl World {
    pub fn new(world_time: u64) -> Self {
        Self {
            players: BTreeMap::new(),
            world_time,
            tick: 0,
            game_mode: DEFAULT_GAME_MODE.to_string(),
            weather: DEFAULT_WEATHER.to_string(),
        }
    }

    /// Inserts a player, handing it back if its id is already taken
    pub fn insert(&mut self, player: Player) -> Result<(), Player> {
        if self.players.contains_key(&player.id) {
            return Err(player);
        }
        self.players.insert(player.id.clone(), player);
        Ok(())
    }

    pub fn remove(&mut self, session_id: &str) -> Option<Player> {
        self.players.remove(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<&Player> {
        self.players.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Player> {
        self.players.get_mut(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.players.contains_key(session_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.players.keys()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn world_time(&self) -> u64 {
        self.world_time
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advances one tick, moving world time to `now` unless that would go backwards
    ///
    /// Returns the resulting world time.
    pub fn advance_time(&mut self, now: u64) -> u64 {
        self.world_time = self.world_time.max(now);
        self.tick += 1;
        self.world_time
    }

    /// Point-in-time copy used for replication
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            world_time: self.world_time,
            game_mode: self.game_mode.clone(),
            weather: self.weather.clone(),
            players: self.players.values().cloned().collect(),
        }
    }
}

/// Full replicated world state, players ordered by session id
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub world_time: u64,
    pub game_mode: String,
    pub weather: String,
    pub players: Vec<Player>,
}

impl WorldSnapshot {
    pub fn player(&self, session_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == session_id)
    }

    /// Applies a delta on top of this snapshot, the way a client would
    ///
    /// A delta only fits the view it was built against. When `base_tick`
    /// names a different tick the snapshot is left untouched and `false` is
    /// returned; the client keeps acknowledging its current tick until the
    /// server sends a delta (or a full snapshot) it can use.
    pub fn apply_delta(&mut self, delta: &WorldDelta) -> bool {
        match delta.base_tick {
            Some(base) if base != self.tick => return false,
            Some(_) => {}
            // Built against nothing: `changed` lists every player
            None => self.players.clear(),
        }

        self.tick = delta.tick;
        self.world_time = delta.world_time;
        if let Some(mode) = &delta.game_mode {
            self.game_mode = mode.clone();
        }
        if let Some(weather) = &delta.weather {
            self.weather = weather.clone();
        }

        self.players.retain(|p| !delta.removed.contains(&p.id));
        for changed in &delta.changed {
            match self.players.iter_mut().find(|p| p.id == changed.id) {
                Some(existing) => *existing = changed.clone(),
                None => self.players.push(changed.clone()),
            }
        }
        self.players.sort_by(|a, b| a.id.cmp(&b.id));
        true
    }
}

/// Changes between two snapshots
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorldDelta {
    /// Tick of the snapshot this delta was computed against
    pub base_tick: Option<u64>,
    pub tick: u64,
    pub world_time: u64,
    /// Players that are new or differ in any field
    pub changed: Vec<Player>,
    pub removed: Vec<SessionId>,
    pub game_mode: Option<String>,
    pub weather: Option<String>,
}

impl WorldDelta {
    /// True when nothing but the clock moved
    pub fn is_clock_only(&self) -> bool {
        self.changed.is_empty()
            && self.removed.is_empty()
            && self.game_mode.is_none()
            && self.weather.is_none()
    }
}
