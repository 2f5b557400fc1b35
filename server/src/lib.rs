//! # Realm Server Library
//!
//! This library provides the authoritative world-state synchronizer for the
//! realm. A room owns the only writable copy of the world, accepts movement
//! updates from connected sessions, advances world time on a fixed tick, and
//! replicates the result to every session.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! The server's `World` is the definitive version of every player's position,
//! rotation and vitals. Clients render what the server replicates.
//!
//! ### Session Lifecycle
//! Handles joining and leaving sessions:
//! - Capacity and duplicate checks on join
//! - Spawn placement on a circle around the origin
//! - Join/leave notifications to the other sessions
//! - Idempotent leave, so disconnect races are harmless
//!
//! ### Replication
//! Once per tick the room sends either the full world or a delta. A delta is
//! computed against the last tick the session acknowledged with `Ack`, so a
//! lost datagram is covered by the next one. Sessions with no usable
//! acknowledgement get a full snapshot instead.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Room
//! All world mutation happens inside one tokio task (`runtime`). Connects,
//! disconnects and moves are queued as commands on one channel and the tick
//! timer is a branch of the same `select!`, so mutations are applied in a
//! single total order and nothing needs a lock around the world.
//!
//! ### I/O Outside the Critical Path
//! The room never touches a socket. Every mutation returns the packets it
//! produced; the runtime pushes them onto an unbounded channel and the
//! transport's sender task writes them out. A slow client cannot stall
//! ingestion.
//!
//! ### Fixed Tick, Skip Don't Queue
//! The tick runs at a fixed interval (10 Hz by default). If a tick is late,
//! overdue ticks are skipped rather than replayed, and the number skipped is
//! recorded by the `TickScheduler`.
//!
//! ## Module Organization
//!
//! ### Room Modules
//! - `registry`: join/leave, spawn placement, capacity
//! - `ingest`: validation and application of `move` requests
//! - `tick`: Stopped/Running state machine and overrun accounting
//! - `replication`: snapshot diffing and per-session fan-out
//! - `room`: the synchronous aggregate composing the above
//! - `runtime`: the task that owns a room and drives its tick
//!
//! ### Transport Modules
//! - `network`: UDP socket, packet dispatch, outbound delivery
//! - `connections`: address to session mapping and inactivity timeouts
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::RoomConfig;
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     // One room at 10Hz, up to 50 players, sessions dropped after 10s of silence
//!     let server = Server::new(
//!         "127.0.0.1:2567",
//!         RoomConfig::default(),
//!         Duration::from_secs(10),
//!     )
//!     .await?;
//!
//!     // Runs until a Shutdown message arrives on `server.control()`
//!     let report = server.run().await?;
//!     println!("Room fired {} ticks", report.ticks_fired);
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod connections;
pub mod error;
pub mod ingest;
pub mod network;
pub mod outbound;
pub mod registry;
pub mod replication;
pub mod room;
pub mod runtime;
pub mod tick;

pub use config::RoomConfig;
pub use error::{ConfigError, RoomError};
pub use room::Room;
pub use runtime::{spawn_room, RoomHandle, RoomReport};
