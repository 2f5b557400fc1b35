//! Player record and its invariant-preserving mutators

use serde::{Deserialize, Serialize};

use crate::{SessionId, DEFAULT_HEALTH, DEFAULT_MANA};

/// Position in world space
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Yaw-only rotation, in radians
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Rotation {
    pub y: f32,
}

/// Character archetype used by clients to pick a model
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum CharacterType {
    #[default]
    Warrior,
    Mage,
    Archer,
}

/// A connected player as replicated to every client
///
/// Vitals are stored as current/max pairs. The setters below are the only
/// way the server changes them, so `health <= max_health` and
/// `mana <= max_mana` always hold.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub id: SessionId,
    pub username: String,
    pub position: Position,
    pub rotation: Rotation,
    health: u32,
    max_health: u32,
    mana: u32,
    max_mana: u32,
    level: u32,
    pub experience: u64,
    pub character_type: CharacterType,
    equipment_ids: Vec<String>,
    pub is_moving: bool,
    pub current_action: Option<String>,
    /// Server wall-clock time (ms) of the last applied change
    pub timestamp: u64,
    /// Client send time of the last applied move, if the client supplied one
    pub last_input_timestamp: Option<u64>,
}

impl Player {
    pub fn new(id: impl Into<SessionId>, username: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            position: Position::default(),
            rotation: Rotation::default(),
            health: DEFAULT_HEALTH,
            max_health: DEFAULT_HEALTH,
            mana: DEFAULT_MANA,
            max_mana: DEFAULT_MANA,
            level: 1,
            experience: 0,
            character_type: CharacterType::default(),
            equipment_ids: Vec::new(),
            is_moving: false,
            current_action: None,
            timestamp,
            last_input_timestamp: None,
        }
    }

    pub fn health(&self) -> u32 {
        self.health
    }

    pub fn max_health(&self) -> u32 {
        self.max_health
    }

    pub fn mana(&self) -> u32 {
        self.mana
    }

    pub fn max_mana(&self) -> u32 {
        self.max_mana
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn equipment_ids(&self) -> &[String] {
        &self.equipment_ids
    }

    /// Sets health, clamped to `max_health`
    pub fn set_health(&mut self, health: u32) {
        self.health = health.min(self.max_health);
    }

    /// Sets mana, clamped to `max_mana`
    pub fn set_mana(&mut self, mana: u32) {
        self.mana = mana.min(self.max_mana);
    }

    /// Changes the health cap, pulling current health down if it now exceeds it
    pub fn set_max_health(&mut self, max_health: u32) {
        self.max_health = max_health;
        self.health = self.health.min(max_health);
    }

    pub fn set_max_mana(&mut self, max_mana: u32) {
        self.max_mana = max_mana;
        self.mana = self.mana.min(max_mana);
    }

    /// Levels start at 1
    pub fn set_level(&mut self, level: u32) {
        self.level = level.max(1);
    }

    pub fn add_experience(&mut self, amount: u64) {
        self.experience = self.experience.saturating_add(amount);
    }

    /// Adds an equipment reference, ignoring ids already held
    pub fn equip(&mut self, equipment_id: impl Into<String>) -> bool {
        let equipment_id = equipment_id.into();
        if self.equipment_ids.contains(&equipment_id) {
            return false;
        }
        self.equipment_ids.push(equipment_id);
        true
    }

    pub fn unequip(&mut self, equipment_id: &str) -> bool {
        let before = self.equipment_ids.len();
        self.equipment_ids.retain(|id| id != equipment_id);
        self.equipment_ids.len() != before
    }

    /// Moves the player; rejects positions with NaN or infinite components
    pub fn set_position(&mut self, position: Position) -> bool {
        if !position.is_finite() {
            return false;
        }
        self.position = position;
        true
    }

    pub fn set_yaw(&mut self, yaw: f32) -> bool {
        if !yaw.is_finite() {
            return false;
        }
        self.rotation.y = yaw;
        true
    }

    /// Bumps the update timestamp without ever moving it backwards
    pub fn touch(&mut self, now: u64) {
        self.timestamp = self.timestamp.max(now);
    }
}
