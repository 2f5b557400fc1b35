//! Session lifecycle for a room
//!
//! The registry decides who is allowed into the world and where they appear:
//! - Capacity and duplicate-session checks on join
//! - Spawn placement on a fixed-radius circle around the origin
//! - Fallback display names for clients that did not send one
//! - Join/leave notifications for the other sessions
//!
//! It never holds the world itself. The room passes its `World` in, which
//! keeps all mutation on the room's single writer.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Packet, Player, Position, World, MAX_DISPLAY_NAME_LEN};
use std::f32::consts::TAU;

use crate::error::RoomError;
use crate::outbound::Outbound;

pub struct SessionRegistry {
    /// Maximum number of concurrent players
    max_clients: usize,
    /// Distance from the origin at which players spawn
    spawn_radius: f32,
    rng: StdRng,
}

impl SessionRegistry {
    pub fn new(max_clients: usize, spawn_radius: f32) -> Self {
        Self::with_rng(max_clients, spawn_radius, StdRng::from_entropy())
    }

    /// Registry with a fixed RNG, for reproducible spawns
    pub fn with_rng(max_clients: usize, spawn_radius: f32, rng: StdRng) -> Self {
        Self {
            max_clients,
            spawn_radius,
            rng,
        }
    }

    /// Adds a player for `session_id` to the world
    ///
    /// Fails with `DuplicateSession` if the session is already present and
    /// with `RoomFull` once the world holds `max_clients` players. On success
    /// the new player is returned and a `PlayerJoined` notification for the
    /// other sessions is pushed onto `outbox`.
    pub fn join(
        &mut self,
        world: &mut World,
        session_id: &str,
        display_name: &str,
        now: u64,
        outbox: &mut Vec<Outbound>,
    ) -> Result<Player, RoomError> {
        if world.contains(session_id) {
            return Err(RoomError::DuplicateSession(session_id.to_string()));
        }
        if world.len() >= self.max_clients {
            return Err(RoomError::RoomFull {
                max: self.max_clients,
            });
        }

        let username = self.display_name_or_fallback(display_name);
        let mut player = Player::new(session_id, username, now);
        player.position = self.spawn_position();

        info!(
            "Session {} joined as {:?} at ({:.2}, {:.2}, {:.2})",
            session_id, player.username, player.position.x, player.position.y, player.position.z
        );

        let joined = player.clone();
        if let Err(rejected) = world.insert(player) {
            return Err(RoomError::DuplicateSession(rejected.id));
        }

        outbox.push(Outbound::to_all_except(
            session_id,
            Packet::PlayerJoined {
                id: joined.id.clone(),
                display_name: joined.username.clone(),
            },
        ));
        Ok(joined)
    }

    /// Removes the player for `session_id`, if any
    ///
    /// Leaving twice, or leaving a session that never joined, is a no-op:
    /// disconnects racing with other events are expected.
    pub fn leave(
        &mut self,
        world: &mut World,
        session_id: &str,
        outbox: &mut Vec<Outbound>,
    ) -> Option<Player> {
        let Some(player) = world.remove(session_id) else {
            debug!("Ignoring leave for unknown session {}", session_id);
            return None;
        };

        info!("Session {} ({:?}) left", session_id, player.username);
        outbox.push(Outbound::to_all(Packet::PlayerLeft {
            id: session_id.to_string(),
        }));
        Some(player)
    }

    pub fn is_empty(&self, world: &World) -> bool {
        world.is_empty()
    }

    /// Uniform point on the spawn circle, at ground level
    fn spawn_position(&mut self) -> Position {
        let angle: f32 = self.rng.gen_range(0.0..TAU);
        Position::new(
            angle.cos() * self.spawn_radius,
            0.0,
            angle.sin() * self.spawn_radius,
        )
    }

    fn display_name_or_fallback(&mut self, display_name: &str) -> String {
        let trimmed = display_name.trim();
        if trimmed.is_empty() {
            return format!("Player{}", self.rng.gen_range(0..1000));
        }
        trimmed.chars().take(MAX_DISPLAY_NAME_LEN).collect()
    }
}
