//! Validation and application of client `move` requests
//!
//! Requests are applied field by field. Supplied components overwrite the
//! stored value, omitted ones are left alone, and non-finite ones are dropped
//! and reported back so the room can tell the sender.

use log::{debug, warn};
use shared::{MoveRequest, World};

/// How strictly inbound movement is checked
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementPolicy {
    /// Clamp each position component to `[-bound, bound]` when set
    pub position_bound: Option<f32>,
    /// Drop requests whose client timestamp is older than the last applied one
    pub discard_stale: bool,
}

impl Default for MovementPolicy {
    fn default() -> Self {
        Self {
            position_bound: None,
            discard_stale: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// The request was applied; `discarded` lists fields that were not
    Applied { discarded: Vec<&'static str> },
    /// The session is not (or no longer) in the world
    UnknownSession,
    /// The request was older than one already applied
    Stale { last_applied: u64, received: u64 },
}

impl MoveOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MoveOutcome::Applied { .. })
    }
}

/// Applies a move request from `session_id` to the world
///
/// On success the player is marked as moving and its timestamp advances to
/// `now`. Unknown sessions are not an error: a move can still be in flight
/// when its session leaves.
pub fn apply_movement(
    world: &mut World,
    session_id: &str,
    request: &MoveRequest,
    now: u64,
    policy: &MovementPolicy,
) -> MoveOutcome {
    let Some(player) = world.get_mut(session_id) else {
        debug!("Dropping move from unknown session {}", session_id);
        return MoveOutcome::UnknownSession;
    };

    if policy.discard_stale {
        if let (Some(received), Some(last_applied)) =
            (request.timestamp, player.last_input_timestamp)
        {
            if received < last_applied {
                debug!(
                    "Dropping stale move from {} ({} < {})",
                    session_id, received, last_applied
                );
                return MoveOutcome::Stale {
                    last_applied,
                    received,
                };
            }
        }
    }

    let mut discarded = Vec::new();

    if let Some(update) = &request.position {
        let mut position = player.position;
        let components = [
            ("position.x", update.x, &mut position.x),
            ("position.y", update.y, &mut position.y),
            ("position.z", update.z, &mut position.z),
        ];
        for (field, value, slot) in components {
            match value {
                Some(v) if v.is_finite() => *slot = clamp_component(v, policy.position_bound),
                Some(_) => discarded.push(field),
                None => {}
            }
        }
        player.set_position(position);
    }

    if let Some(update) = &request.rotation {
        if let Some(yaw) = update.y {
            if !player.set_yaw(yaw) {
                discarded.push("rotation.y");
            }
        }
    }

    if !discarded.is_empty() {
        warn!(
            "Discarded malformed fields {:?} in move from {}",
            discarded, session_id
        );
    }

    if let Some(received) = request.timestamp {
        player.last_input_timestamp = Some(
            player
                .last_input_timestamp
                .map_or(received, |last| last.max(received)),
        );
    }
    player.is_moving = true;
    player.touch(now);

    MoveOutcome::Applied { discarded }
}

fn clamp_component(value: f32, bound: Option<f32>) -> f32 {
    match bound {
        Some(bound) => value.clamp(-bound, bound),
        None => value,
    }
}
