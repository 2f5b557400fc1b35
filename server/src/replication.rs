//! Per-tick state replication
//!
//! [`compute_delta`] is a pure diff between two snapshots. The
//! [`Replicator`] decides, per session, whether that session needs a full
//! snapshot or can take a delta, and turns the result into outbound
//! packets.
//!
//! Datagrams get lost, so in delta mode a session's baseline is the last
//! tick it acknowledged, not the last tick it was sent. A dropped delta is
//! covered by the next one, which is still built on the acknowledged tick.

use log::debug;
use shared::{Packet, SessionId, WorldDelta, WorldSnapshot};
use std::collections::{BTreeMap, BTreeSet};

use crate::outbound::{Outbound, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationMode {
    /// Every session receives the whole world each tick
    Full,
    /// Sessions receive a full snapshot until they acknowledge one, then
    /// deltas against their last acknowledged tick
    Delta,
}

/// Diffs `current` against `previous`
///
/// With no previous snapshot every player counts as changed. Players are
/// compared field by field, so a move that lands on the same position still
/// shows up when its timestamp moved.
pub fn compute_delta(previous: Option<&WorldSnapshot>, current: &WorldSnapshot) -> WorldDelta {
    let Some(previous) = previous else {
        return WorldDelta {
            base_tick: None,
            tick: current.tick,
            world_time: current.world_time,
            changed: current.players.clone(),
            removed: Vec::new(),
            game_mode: Some(current.game_mode.clone()),
            weather: Some(current.weather.clone()),
        };
    };

    let changed = current
        .players
        .iter()
        .filter(|player| previous.player(&player.id) != Some(*player))
        .cloned()
        .collect();

    let current_ids: BTreeSet<&str> = current.players.iter().map(|p| p.id.as_str()).collect();
    let removed = previous
        .players
        .iter()
        .filter(|p| !current_ids.contains(p.id.as_str()))
        .map(|p| p.id.clone())
        .collect();

    WorldDelta {
        base_tick: Some(previous.tick),
        tick: current.tick,
        world_time: current.world_time,
        changed,
        removed,
        game_mode: (previous.game_mode != current.game_mode).then(|| current.game_mode.clone()),
        weather: (previous.weather != current.weather).then(|| current.weather.clone()),
    }
}

/// Replicated snapshots kept as delta bases
const HISTORY_LEN: usize = 64;

pub struct Replicator {
    mode: ReplicationMode,
    last_replicated: Option<WorldSnapshot>,
    /// Last tick each session acknowledged, `None` until its first ack
    acked: BTreeMap<SessionId, Option<u64>>,
    /// Recently replicated snapshots by tick
    history: BTreeMap<u64, WorldSnapshot>,
}

impl Replicator {
    pub fn new(mode: ReplicationMode) -> Self {
        Self {
            mode,
            last_replicated: None,
            acked: BTreeMap::new(),
            history: BTreeMap::new(),
        }
    }

    /// Forgets a session so a rejoin starts from a full snapshot
    pub fn forget(&mut self, session_id: &str) {
        self.acked.remove(session_id);
    }

    /// Records that `session_id` holds the world as of `tick`
    ///
    /// Acks for ticks that were never replicated, have aged out of the
    /// history, or are older than the session's current ack are ignored.
    /// Returns whether the baseline moved.
    pub fn acknowledge(&mut self, session_id: &str, tick: u64) -> bool {
        if self.mode == ReplicationMode::Full || !self.history.contains_key(&tick) {
            return false;
        }
        match self.acked.get_mut(session_id) {
            Some(acked) if acked.map_or(true, |last| tick > last) => {
                *acked = Some(tick);
                true
            }
            _ => false,
        }
    }

    pub fn last_replicated(&self) -> Option<&WorldSnapshot> {
        self.last_replicated.as_ref()
    }

    /// Builds this tick's replication packets for the connected sessions
    pub fn replicate(&mut self, current: WorldSnapshot) -> Vec<Outbound> {
        let mut outbox = Vec::new();
        if current.players.is_empty() {
            self.last_replicated = Some(current);
            return outbox;
        }

        match self.mode {
            ReplicationMode::Full => {
                outbox.push(Outbound::to_all(Packet::Snapshot(current.clone())));
            }
            ReplicationMode::Delta => {
                let mut by_base: BTreeMap<u64, Vec<SessionId>> = BTreeMap::new();
                for player in &current.players {
                    let acked = self.acked.entry(player.id.clone()).or_insert(None);
                    match acked.filter(|tick| self.history.contains_key(tick)) {
                        Some(base) => by_base.entry(base).or_default().push(player.id.clone()),
                        None => outbox.push(Outbound::to_session(
                            player.id.clone(),
                            Packet::Snapshot(current.clone()),
                        )),
                    }
                }

                for (base, sessions) in by_base {
                    let delta = compute_delta(self.history.get(&base), &current);
                    debug!(
                        "Tick {}: delta from {} with {} changed, {} removed for {} session(s)",
                        delta.tick,
                        base,
                        delta.changed.len(),
                        delta.removed.len(),
                        sessions.len()
                    );
                    outbox.push(Outbound {
                        target: Target::Only(sessions),
                        packet: Packet::Delta(delta),
                    });
                }

                self.history.insert(current.tick, current.clone());
                while self.history.len() > HISTORY_LEN {
                    self.history.pop_first();
                }
            }
        }

        self.last_replicated = Some(current);
        outbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Player, Position, World};

    fn world_with(ids: &[&str]) -> World {
        let mut world = World::new(1_000);
        for id in ids {
            world.insert(Player::new(*id, *id, 1_000)).unwrap();
        }
        world
    }

    #[test]
    fn test_delta_without_previous_is_everything() {
        let world = world_with(&["A", "B"]);
        let delta = compute_delta(None, &world.snapshot());

        assert_eq!(delta.changed.len(), 2);
        assert!(delta.removed.is_empty());
        assert_eq!(delta.base_tick, None);
        assert_eq!(delta.game_mode.as_deref(), Some("adventure"));
        assert_eq!(delta.weather.as_deref(), Some("sunny"));
    }

    #[test]
    fn test_delta_of_identical_snapshots_is_clock_only() {
        let mut world = world_with(&["A", "B"]);
        let before = world.snapshot();
        world.advance_time(1_100);
        let delta = compute_delta(Some(&before), &world.snapshot());

        assert!(delta.is_clock_only());
        assert_eq!(delta.base_tick, Some(0));
        assert_eq!(delta.world_time, 1_100);
        assert_eq!(delta.tick, 1);
    }

    #[test]
    fn test_delta_tracks_changes_and_removals() {
        let mut world = world_with(&["A", "B", "C"]);
        let before = world.snapshot();

        world.get_mut("B").unwrap().position = Position::new(1.0, 0.0, 0.0);
        world.remove("C");
        world.insert(Player::new("D", "D", 1_000)).unwrap();
        world.weather = "storm".to_string();
        let delta = compute_delta(Some(&before), &world.snapshot());

        let changed: Vec<&str> = delta.changed.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(changed, vec!["B", "D"]);
        assert_eq!(delta.removed, vec!["C".to_string()]);
        assert_eq!(delta.weather.as_deref(), Some("storm"));
        assert!(delta.game_mode.is_none());
    }

    #[test]
    fn test_delta_applied_reproduces_current() {
        let mut world = world_with(&["A", "B", "C"]);
        let before = world.snapshot();

        world.get_mut("A").unwrap().rotation.y = 2.0;
        world.remove("B");
        world.insert(Player::new("E", "E", 1_000)).unwrap();
        world.advance_time(1_500);
        let current = world.snapshot();

        let mut client_view = before.clone();
        assert!(client_view.apply_delta(&compute_delta(Some(&before), &current)));

        assert_eq!(client_view, current);
    }

    #[test]
    fn test_full_mode_broadcasts_snapshot() {
        let mut replicator = Replicator::new(ReplicationMode::Full);
        let world = world_with(&["A", "B"]);

        let outbox = replicator.replicate(world.snapshot());

        assert_eq!(outbox, vec![Outbound::to_all(Packet::Snapshot(world.snapshot()))]);
    }

    #[test]
    fn test_empty_world_sends_nothing() {
        let mut replicator = Replicator::new(ReplicationMode::Full);
        let outbox = replicator.replicate(World::new(0).snapshot());
        assert!(outbox.is_empty());
        assert!(replicator.last_replicated().is_some());
    }

    /// Client side of delta mode: keep a view, ack whatever tick it is at
    fn deliver(
        replicator: &mut Replicator,
        views: &mut BTreeMap<String, WorldSnapshot>,
        outbound: &Outbound,
        session_id: &str,
    ) {
        match &outbound.packet {
            Packet::Snapshot(snapshot) => {
                let stale = views
                    .get(session_id)
                    .map_or(false, |view| view.tick >= snapshot.tick);
                if !stale {
                    views.insert(session_id.to_string(), snapshot.clone());
                }
            }
            Packet::Delta(delta) => {
                if let Some(view) = views.get_mut(session_id) {
                    view.apply_delta(delta);
                }
            }
            other => panic!("Unexpected packet {:?}", other),
        }
        if let Some(view) = views.get(session_id) {
            replicator.acknowledge(session_id, view.tick);
        }
    }

    #[test]
    fn test_delta_mode_snapshots_until_acknowledged() {
        let mut replicator = Replicator::new(ReplicationMode::Delta);
        let mut world = world_with(&["A"]);

        world.advance_time(1_100);
        let first = replicator.replicate(world.snapshot());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].target, Target::Session("A".to_string()));
        assert!(matches!(first[0].packet, Packet::Snapshot(_)));

        // No ack yet: still a full snapshot
        world.advance_time(1_200);
        let second = replicator.replicate(world.snapshot());
        assert!(matches!(second[0].packet, Packet::Snapshot(_)));

        assert!(replicator.acknowledge("A", 2));
        world.insert(Player::new("B", "B", 1_000)).unwrap();
        world.advance_time(1_300);
        let third = replicator.replicate(world.snapshot());

        assert_eq!(third.len(), 2);
        assert_eq!(third[0].target, Target::Session("B".to_string()));
        assert!(matches!(third[0].packet, Packet::Snapshot(_)));
        assert_eq!(third[1].target, Target::Only(vec!["A".to_string()]));
        match &third[1].packet {
            Packet::Delta(delta) => {
                assert_eq!(delta.base_tick, Some(2));
                assert_eq!(delta.tick, 3);
                assert_eq!(delta.changed.len(), 1);
                assert_eq!(delta.changed[0].id, "B");
            }
            other => panic!("Expected delta, got {:?}", other),
        }
    }

    #[test]
    fn test_acknowledge_ignores_unknown_and_old_ticks() {
        let mut replicator = Replicator::new(ReplicationMode::Delta);
        let mut world = world_with(&["A"]);
        world.advance_time(1_100);
        replicator.replicate(world.snapshot());
        world.advance_time(1_200);
        replicator.replicate(world.snapshot());

        assert!(!replicator.acknowledge("A", 9));
        assert!(!replicator.acknowledge("Z", 1));
        assert!(replicator.acknowledge("A", 2));
        assert!(!replicator.acknowledge("A", 1));
        assert!(!replicator.acknowledge("A", 2));

        let mut full = Replicator::new(ReplicationMode::Full);
        full.replicate(world.snapshot());
        assert!(!full.acknowledge("A", 2));
    }

    #[test]
    fn test_delta_mode_forget_forces_new_baseline() {
        let mut replicator = Replicator::new(ReplicationMode::Delta);
        let mut world = world_with(&["A"]);

        world.advance_time(1_100);
        replicator.replicate(world.snapshot());
        assert!(replicator.acknowledge("A", 1));
        replicator.forget("A");
        world.advance_time(1_200);
        let outbox = replicator.replicate(world.snapshot());

        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].target, Target::Session("A".to_string()));
        assert!(matches!(outbox[0].packet, Packet::Snapshot(_)));
    }

    #[test]
    fn test_delta_mode_sessions_converge() {
        let mut replicator = Replicator::new(ReplicationMode::Delta);
        let mut world = world_with(&["A", "B"]);
        let mut views: BTreeMap<String, WorldSnapshot> = BTreeMap::new();

        for step in 0..5u64 {
            if step == 2 {
                world.get_mut("A").unwrap().position = Position::new(5.0, 0.0, 5.0);
            }
            if step == 3 {
                world.remove("B");
                replicator.forget("B");
                views.remove("B");
            }
            world.advance_time(1_000 + step * 100);

            for outbound in replicator.replicate(world.snapshot()) {
                let recipients: Vec<String> = world
                    .session_ids()
                    .filter(|id| outbound.target.includes(id))
                    .cloned()
                    .collect();
                for id in recipients {
                    deliver(&mut replicator, &mut views, &outbound, &id);
                }
            }

            let expected = world.snapshot();
            for view in views.values() {
                assert_eq!(view, &expected);
            }
        }
    }

    #[test]
    fn test_lost_delta_is_covered_by_the_next_one() {
        let mut replicator = Replicator::new(ReplicationMode::Delta);
        let mut world = world_with(&["A", "B"]);
        let mut views: BTreeMap<String, WorldSnapshot> = BTreeMap::new();

        for tick in 1..=20u64 {
            if tick == 2 {
                world.get_mut("A").unwrap().position = Position::new(5.0, 0.0, 5.0);
            }
            world.advance_time(1_000 + tick * 100);

            for outbound in replicator.replicate(world.snapshot()) {
                for id in ["A", "B"] {
                    if !outbound.target.includes(id) {
                        continue;
                    }
                    // The network eats B's copy of tick 2
                    if tick == 2 && id == "B" {
                        continue;
                    }
                    deliver(&mut replicator, &mut views, &outbound, id);
                }
            }

            if tick >= 3 {
                let expected = world.snapshot();
                assert_eq!(views["B"], expected, "B diverged at tick {}", tick);
                assert_eq!(views["A"], expected);
            }
        }
        assert_eq!(
            views["B"].player("A").unwrap().position,
            Position::new(5.0, 0.0, 5.0)
        );
    }

    #[test]
    fn test_stale_base_falls_back_to_snapshot() {
        let mut replicator = Replicator::new(ReplicationMode::Delta);
        let mut world = world_with(&["A"]);

        world.advance_time(1_100);
        replicator.replicate(world.snapshot());
        assert!(replicator.acknowledge("A", 1));

        // The acked tick ages out while the client stays silent
        for _ in 0..HISTORY_LEN {
            world.advance_time(world.world_time() + 100);
            replicator.replicate(world.snapshot());
        }
        world.advance_time(world.world_time() + 100);
        let outbox = replicator.replicate(world.snapshot());

        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].target, Target::Session("A".to_string()));
        assert!(matches!(outbox[0].packet, Packet::Snapshot(_)));
    }
}
