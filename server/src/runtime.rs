//! Room runtime: the task that owns a room
//!
//! Every connect, disconnect and move is sent as a [`RoomCommand`] over one
//! mpsc queue and the tick timer is another branch of the same `select!`, so
//! exactly one piece of code touches the world at a time. Outbound packets
//! leave through an unbounded channel. The task never waits on a socket.

use log::{debug, error, info, warn};
use shared::{MoveRequest, Player, SessionId, WorldSnapshot};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::clock::Clock;
use crate::error::RoomError;
use crate::ingest::MoveOutcome;
use crate::outbound::Outbound;
use crate::room::Room;

/// Events the transport delivers into a room
#[derive(Debug)]
pub enum RoomCommand {
    Connect {
        session_id: SessionId,
        display_name: String,
        reply: oneshot::Sender<Result<Player, RoomError>>,
    },
    Disconnect {
        session_id: SessionId,
        /// Whether the client asked to leave; kept for reconnection handling
        consented: bool,
    },
    Move {
        session_id: SessionId,
        request: MoveRequest,
    },
    Ack {
        session_id: SessionId,
        tick: u64,
    },
    Snapshot {
        reply: oneshot::Sender<WorldSnapshot>,
    },
    Shutdown,
}

/// Summary returned when a room task exits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomReport {
    pub ticks_fired: u64,
    pub ticks_skipped: u64,
    pub players_at_shutdown: usize,
    pub final_world_time: u64,
}

/// Cloneable entry point into a running room
#[derive(Debug, Clone)]
pub struct RoomHandle {
    commands: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub async fn connect(
        &self,
        session_id: impl Into<SessionId>,
        display_name: impl Into<String>,
    ) -> Result<Player, RoomError> {
        let (reply, response) = oneshot::channel();
        self.send(RoomCommand::Connect {
            session_id: session_id.into(),
            display_name: display_name.into(),
            reply,
        })?;
        response.await.map_err(|_| RoomError::Closed)?
    }

    pub fn disconnect(
        &self,
        session_id: impl Into<SessionId>,
        consented: bool,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::Disconnect {
            session_id: session_id.into(),
            consented,
        })
    }

    pub fn send_move(
        &self,
        session_id: impl Into<SessionId>,
        request: MoveRequest,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::Move {
            session_id: session_id.into(),
            request,
        })
    }

    /// Reports the tick the session's client view is at
    pub fn ack(&self, session_id: impl Into<SessionId>, tick: u64) -> Result<(), RoomError> {
        self.send(RoomCommand::Ack {
            session_id: session_id.into(),
            tick,
        })
    }

    /// Current world, read through the room's own queue
    pub async fn snapshot(&self) -> Result<WorldSnapshot, RoomError> {
        let (reply, response) = oneshot::channel();
        self.send(RoomCommand::Snapshot { reply })?;
        response.await.map_err(|_| RoomError::Closed)
    }

    /// Asks the room to stop; the task's `JoinHandle` yields its report
    pub fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.commands.send(command).map_err(|_| RoomError::Closed)
    }
}

/// Spawns the task owning `room` and returns a handle to it
///
/// The task runs until `shutdown` is called or every handle is dropped.
pub fn spawn_room(
    room: Room,
    clock: Arc<dyn Clock>,
    outbound: mpsc::UnboundedSender<Outbound>,
) -> (RoomHandle, JoinHandle<RoomReport>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_room(room, clock, command_rx, outbound));
    (
        RoomHandle {
            commands: command_tx,
        },
        task,
    )
}

async fn run_room(
    mut room: Room,
    clock: Arc<dyn Clock>,
    mut commands: mpsc::UnboundedReceiver<RoomCommand>,
    outbound: mpsc::UnboundedSender<Outbound>,
) -> RoomReport {
    let mut ticker = interval(room.scheduler().interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Room started");

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(RoomCommand::Shutdown) | None => break,
                    Some(command) => {
                        let was_running = room.scheduler().is_running();
                        handle_command(&mut room, clock.as_ref(), command, &outbound);
                        if !was_running && room.scheduler().is_running() {
                            // First tick lands one full interval after the first join
                            ticker.reset();
                        }
                    }
                }
            },

            deadline = ticker.tick(), if room.scheduler().is_running() => {
                let fired_at = Instant::now().into_std();
                if let Some((_, packets)) = room.tick(deadline.into_std(), fired_at, clock.now_millis()) {
                    forward(&outbound, packets);
                }
            },
        }
    }

    // Stop ticking before the world goes away with `room`
    room.dispose();
    let report = RoomReport {
        ticks_fired: room.scheduler().ticks_fired(),
        ticks_skipped: room.scheduler().ticks_skipped(),
        players_at_shutdown: room.world().len(),
        final_world_time: room.world().world_time(),
    };
    info!(
        "Room disposed after {} ticks ({} skipped), {} players still connected",
        report.ticks_fired, report.ticks_skipped, report.players_at_shutdown
    );
    report
}

fn handle_command(
    room: &mut Room,
    clock: &dyn Clock,
    command: RoomCommand,
    outbound: &mpsc::UnboundedSender<Outbound>,
) {
    match command {
        RoomCommand::Connect {
            session_id,
            display_name,
            reply,
        } => match room.join(&session_id, &display_name, clock.now_millis()) {
            Ok((player, packets)) => {
                forward(outbound, packets);
                if reply.send(Ok(player)).is_err() {
                    // Nobody is waiting for this session any more
                    warn!("Connect for {} abandoned, removing player", session_id);
                    forward(outbound, room.leave(&session_id));
                }
            }
            Err(e) => {
                warn!("Rejected session {}: {}", session_id, e);
                let _ = reply.send(Err(e));
            }
        },

        RoomCommand::Disconnect {
            session_id,
            consented,
        } => {
            debug!("Disconnect {} (consented: {})", session_id, consented);
            forward(outbound, room.leave(&session_id));
        }

        RoomCommand::Move {
            session_id,
            request,
        } => {
            let (outcome, packets) = room.apply_move(&session_id, &request, clock.now_millis());
            if let MoveOutcome::Stale { .. } = outcome {
                debug!("Stale move from {} ignored", session_id);
            }
            forward(outbound, packets);
        }

        RoomCommand::Ack { session_id, tick } => {
            if !room.acknowledge(&session_id, tick) {
                debug!("Ignored ack for tick {} from {}", tick, session_id);
            }
        }

        RoomCommand::Snapshot { reply } => {
            let _ = reply.send(room.snapshot());
        }

        RoomCommand::Shutdown => {}
    }
}

fn forward(outbound: &mpsc::UnboundedSender<Outbound>, packets: Vec<Outbound>) {
    for packet in packets {
        if let Err(e) = outbound.send(packet) {
            error!("Failed to queue outbound {}: transport gone", e.0.packet.kind());
            return;
        }
    }
}
