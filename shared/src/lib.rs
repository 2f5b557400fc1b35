//! Data contracts shared by the realm server and its clients
//!
//! The [`World`] is the authoritative state a room owns; [`WorldSnapshot`]
//! and [`WorldDelta`] are the views of it that travel over the wire inside a
//! [`Packet`].

pub mod player;
pub mod protocol;
pub mod world;

pub use player::{CharacterType, Player, Position, Rotation};
pub use protocol::{MoveRequest, Packet, PositionUpdate, RotationUpdate};
pub use world::{World, WorldDelta, WorldSnapshot};

/// Opaque per-connection identity
pub type SessionId = String;

pub const PROTOCOL_VERSION: u32 = 1;

pub const DEFAULT_HEALTH: u32 = 100;
pub const DEFAULT_MANA: u32 = 100;
pub const DEFAULT_GAME_MODE: &str = "adventure";
pub const DEFAULT_WEATHER: &str = "sunny";

/// Reference tick interval (10 Hz)
pub const TICK_INTERVAL_MS: u64 = 100;
pub const SPAWN_RADIUS: f32 = 5.0;
pub const MAX_CLIENTS: usize = 50;
pub const MAX_DISPLAY_NAME_LEN: usize = 32;

/// Milliseconds since the Unix epoch, saturating instead of panicking
pub fn unix_millis(time: std::time::SystemTime) -> u64 {
    let millis = time
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(std::time::Duration::from_secs(0))
        .as_millis();
    (millis.min(u64::MAX as u128)) as u64
}
