//! The room: one world and everything allowed to mutate it
//!
//! `Room` is deliberately synchronous. It does no I/O and never sleeps; each
//! operation mutates the world and returns the packets that mutation
//! produced, in order. The runtime in `runtime.rs` is the only owner in a
//! running server, which makes it the world's single writer.

use log::debug;
use rand::rngs::StdRng;
use shared::{MoveRequest, Packet, Player, World, WorldSnapshot};
use std::time::Instant;

use crate::config::RoomConfig;
use crate::error::{ConfigError, RoomError};
use crate::ingest::{apply_movement, MoveOutcome, MovementPolicy};
use crate::outbound::Outbound;
use crate::registry::SessionRegistry;
use crate::replication::Replicator;
use crate::tick::{TickReport, TickScheduler};

pub struct Room {
    world: World,
    registry: SessionRegistry,
    scheduler: TickScheduler,
    replicator: Replicator,
    movement: MovementPolicy,
}

impl Room {
    /// Creates an empty room; fails if `config` does not validate
    pub fn new(config: &RoomConfig, now: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = SessionRegistry::new(config.max_clients, config.spawn_radius);
        Ok(Self::with_registry(config, registry, now))
    }

    /// Room whose spawn placement is driven by a seeded RNG
    pub fn with_rng(config: &RoomConfig, rng: StdRng, now: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = SessionRegistry::with_rng(config.max_clients, config.spawn_radius, rng);
        Ok(Self::with_registry(config, registry, now))
    }

    fn with_registry(config: &RoomConfig, registry: SessionRegistry, now: u64) -> Self {
        Self {
            world: World::new(now),
            registry,
            scheduler: TickScheduler::new(config.tick_interval, config.tick_policy),
            replicator: Replicator::new(config.replication),
            movement: config.movement,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty(&self.world)
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        self.world.snapshot()
    }

    /// Admits a session and starts ticking if it is the first one
    ///
    /// The joiner is told its own player via `Connected`; everyone else gets
    /// `PlayerJoined`.
    pub fn join(
        &mut self,
        session_id: &str,
        display_name: &str,
        now: u64,
    ) -> Result<(Player, Vec<Outbound>), RoomError> {
        let mut outbox = Vec::new();
        let player =
            self.registry
                .join(&mut self.world, session_id, display_name, now, &mut outbox)?;

        outbox.insert(
            0,
            Outbound::to_session(
                session_id,
                Packet::Connected {
                    session_id: session_id.to_string(),
                    player: player.clone(),
                },
            ),
        );
        let empty = self.is_empty();
        self.scheduler.on_occupancy_changed(empty);
        Ok((player, outbox))
    }

    /// Removes a session; unknown sessions are ignored
    pub fn leave(&mut self, session_id: &str) -> Vec<Outbound> {
        let mut outbox = Vec::new();
        if self
            .registry
            .leave(&mut self.world, session_id, &mut outbox)
            .is_some()
        {
            self.replicator.forget(session_id);
            let empty = self.is_empty();
            self.scheduler.on_occupancy_changed(empty);
        }
        outbox
    }

    /// Applies a move and returns a rejection notice if fields were dropped
    pub fn apply_move(
        &mut self,
        session_id: &str,
        request: &MoveRequest,
        now: u64,
    ) -> (MoveOutcome, Vec<Outbound>) {
        let outcome = apply_movement(&mut self.world, session_id, request, now, &self.movement);
        let outbox = match &outcome {
            MoveOutcome::Applied { discarded } if !discarded.is_empty() => {
                vec![Outbound::to_session(
                    session_id,
                    Packet::MoveRejected {
                        fields: discarded.iter().map(|f| f.to_string()).collect(),
                    },
                )]
            }
            _ => Vec::new(),
        };
        (outcome, outbox)
    }

    /// Records that `session_id` holds the world as of `tick`
    pub fn acknowledge(&mut self, session_id: &str, tick: u64) -> bool {
        self.replicator.acknowledge(session_id, tick)
    }

    /// Runs one tick: advance world time, then replicate
    ///
    /// `deadline` is when the tick was due and `fired_at` when it actually
    /// ran. Returns `None` without touching the world when the scheduler is
    /// stopped.
    pub fn tick(
        &mut self,
        deadline: Instant,
        fired_at: Instant,
        now: u64,
    ) -> Option<(TickReport, Vec<Outbound>)> {
        let report = self.scheduler.record_fire(deadline, fired_at)?;
        let world_time = self.world.advance_time(now);
        if report.fired % 100 == 0 {
            debug!(
                "Tick {}: {} players, world time {}",
                self.world.tick(),
                self.world.len(),
                world_time
            );
        }
        let outbox = self.replicator.replicate(self.world.snapshot());
        Some((report, outbox))
    }

    /// Stops ticking ahead of teardown
    pub fn dispose(&mut self) {
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::Target;
    use crate::replication::ReplicationMode;
    use crate::tick::{SchedulerState, TickPolicy};
    use rand::SeedableRng;
    use shared::{Position, PositionUpdate};

    fn test_room(config: RoomConfig) -> Room {
        Room::with_rng(&config, StdRng::seed_from_u64(1), 1_000).unwrap()
    }

    #[test]
    fn test_join_emits_connected_then_joined() {
        let mut room = test_room(RoomConfig::default());

        let (player, outbox) = room.join("A", "Hero", 1_000).unwrap();

        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[0].target, Target::Session("A".to_string()));
        assert_eq!(
            outbox[0].packet,
            Packet::Connected {
                session_id: "A".to_string(),
                player,
            }
        );
        assert_eq!(outbox[1].target, Target::AllExcept("A".to_string()));
    }

    #[test]
    fn test_join_errors() {
        let mut room = test_room(RoomConfig {
            max_clients: 1,
            ..RoomConfig::default()
        });
        room.join("A", "Hero", 1_000).unwrap();

        assert_eq!(
            room.join("B", "Late", 1_000).unwrap_err(),
            RoomError::RoomFull { max: 1 }
        );
        assert_eq!(
            room.join("A", "Hero", 1_000).unwrap_err(),
            RoomError::DuplicateSession("A".to_string())
        );
    }

    #[test]
    fn test_scheduler_follows_occupancy() {
        let mut room = test_room(RoomConfig::default());
        assert_eq!(room.scheduler().state(), SchedulerState::Stopped);

        room.join("A", "Hero", 1_000).unwrap();
        room.join("B", "Sidekick", 1_000).unwrap();
        assert!(room.scheduler().is_running());

        room.leave("A");
        assert!(room.scheduler().is_running());

        room.leave("B");
        assert_eq!(room.scheduler().state(), SchedulerState::Stopped);
        assert!(room.tick(Instant::now(), Instant::now(), 2_000).is_none());
    }

    #[test]
    fn test_run_until_disposed_keeps_ticking_empty() {
        let mut room = test_room(RoomConfig {
            tick_policy: TickPolicy::RunUntilDisposed,
            ..RoomConfig::default()
        });

        room.join("A", "Hero", 1_000).unwrap();
        room.leave("A");

        let (_, outbox) = room.tick(Instant::now(), Instant::now(), 1_100).unwrap();
        assert!(outbox.is_empty());
        assert_eq!(room.world().world_time(), 1_100);

        room.dispose();
        assert!(room.tick(Instant::now(), Instant::now(), 1_200).is_none());
        assert_eq!(room.world().world_time(), 1_100);
    }

    #[test]
    fn test_tick_advances_time_monotonically() {
        let mut room = test_room(RoomConfig::default());
        room.join("A", "Hero", 1_000).unwrap();
        let start = Instant::now();
        let interval = room.scheduler().interval();

        let mut last = room.world().world_time();
        for (i, now) in [1_100u64, 1_200, 1_150, 900, 1_300].into_iter().enumerate() {
            let deadline = start + interval * i as u32;
            room.tick(deadline, deadline, now).unwrap();
            let world_time = room.world().world_time();
            assert!(world_time >= last);
            last = world_time;
        }
        assert_eq!(last, 1_300);
        assert_eq!(room.world().tick(), 5);
    }

    #[test]
    fn test_move_with_bad_field_notifies_sender() {
        let mut room = test_room(RoomConfig::default());
        room.join("A", "Hero", 1_000).unwrap();
        let request = MoveRequest {
            position: Some(PositionUpdate {
                x: Some(2.0),
                y: Some(f32::NAN),
                z: Some(2.0),
            }),
            ..MoveRequest::default()
        };

        let (outcome, outbox) = room.apply_move("A", &request, 1_050);

        assert!(outcome.is_applied());
        assert_eq!(
            outbox,
            vec![Outbound::to_session(
                "A",
                Packet::MoveRejected {
                    fields: vec!["position.y".to_string()]
                }
            )]
        );
        assert_eq!(room.world().get("A").unwrap().position, Position::new(2.0, 0.0, 2.0));
    }

    #[test]
    fn test_clean_move_is_silent() {
        let mut room = test_room(RoomConfig::default());
        room.join("A", "Hero", 1_000).unwrap();

        let (_, outbox) = room.apply_move("A", &MoveRequest::to_yaw(1.0), 1_050);
        assert!(outbox.is_empty());

        let (outcome, outbox) = room.apply_move("B", &MoveRequest::to_yaw(1.0), 1_050);
        assert_eq!(outcome, MoveOutcome::UnknownSession);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_rejoin_gets_fresh_baseline_in_delta_mode() {
        let mut room = test_room(RoomConfig {
            replication: ReplicationMode::Delta,
            tick_policy: TickPolicy::RunUntilDisposed,
            ..RoomConfig::default()
        });
        let start = Instant::now();
        let interval = room.scheduler().interval();

        room.join("A", "Hero", 1_000).unwrap();
        room.tick(start, start, 1_100).unwrap();
        assert!(room.acknowledge("A", 1));
        room.leave("A");
        room.join("A", "Hero", 1_200).unwrap();
        let (_, outbox) = room.tick(start + interval, start + interval, 1_300).unwrap();

        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].target, Target::Session("A".to_string()));
        assert!(matches!(outbox[0].packet, Packet::Snapshot(_)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RoomConfig {
            tick_interval: std::time::Duration::ZERO,
            ..RoomConfig::default()
        };
        assert_eq!(
            Room::new(&config, 0).err(),
            Some(ConfigError::ZeroTickRate)
        );

        let config = RoomConfig {
            spawn_radius: f32::NAN,
            ..RoomConfig::default()
        };
        assert!(Room::with_rng(&config, StdRng::seed_from_u64(1), 0).is_err());
    }

    #[test]
    fn test_acknowledged_session_gets_deltas() {
        let mut room = test_room(RoomConfig {
            replication: ReplicationMode::Delta,
            ..RoomConfig::default()
        });
        let start = Instant::now();
        let interval = room.scheduler().interval();
        room.join("A", "Hero", 1_000).unwrap();

        room.tick(start, start, 1_100).unwrap();
        assert!(room.acknowledge("A", 1));
        room.apply_move("A", &MoveRequest::to_yaw(1.5), 1_150);
        let (_, outbox) = room.tick(start + interval, start + interval, 1_200).unwrap();

        assert_eq!(outbox.len(), 1);
        match &outbox[0].packet {
            Packet::Delta(delta) => {
                assert_eq!(delta.base_tick, Some(1));
                assert_eq!(delta.changed.len(), 1);
                assert_eq!(delta.changed[0].rotation.y, 1.5);
            }
            other => panic!("Expected delta, got {:?}", other),
        }
    }
}
