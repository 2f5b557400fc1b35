//! Datagram protocol spoken between the realm server and its clients

use serde::{Deserialize, Serialize};

use crate::player::Player;
use crate::world::{WorldDelta, WorldSnapshot};
use crate::SessionId;

/// Partial position update; `None` components keep their previous value
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct PositionUpdate {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
}

impl PositionUpdate {
    pub fn full(x: f32, y: f32, z: f32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct RotationUpdate {
    pub y: Option<f32>,
}

/// Body of a `move` message
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct MoveRequest {
    pub position: Option<PositionUpdate>,
    pub rotation: Option<RotationUpdate>,
    /// Client send time in milliseconds, used to drop reordered updates
    pub timestamp: Option<u64>,
}

impl MoveRequest {
    pub fn to_position(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: Some(PositionUpdate::full(x, y, z)),
            ..Self::default()
        }
    }

    pub fn to_yaw(yaw: f32) -> Self {
        Self {
            rotation: Some(RotationUpdate { y: Some(yaw) }),
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client to server
    Connect {
        client_version: u32,
        display_name: String,
    },
    Move(MoveRequest),
    /// Keeps an idle session from timing out
    Heartbeat,
    /// Newest tick the client's world view is at; deltas are built on it
    Ack {
        tick: u64,
    },
    Disconnect,

    // Server to client
    Connected {
        session_id: SessionId,
        player: Player,
    },
    Rejected {
        reason: String,
    },
    PlayerJoined {
        id: SessionId,
        display_name: String,
    },
    PlayerLeft {
        id: SessionId,
    },
    Snapshot(WorldSnapshot),
    Delta(WorldDelta),
    MoveRejected {
        fields: Vec<String>,
    },
}

impl Packet {
    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "connect",
            Packet::Move(_) => "move",
            Packet::Heartbeat => "heartbeat",
            Packet::Ack { .. } => "ack",
            Packet::Disconnect => "disconnect",
            Packet::Connected { .. } => "connected",
            Packet::Rejected { .. } => "rejected",
            Packet::PlayerJoined { .. } => "player-joined",
            Packet::PlayerLeft { .. } => "player-left",
            Packet::Snapshot(_) => "snapshot",
            Packet::Delta(_) => "delta",
            Packet::MoveRejected { .. } => "move-rejected",
        }
    }
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(packet)
}

pub fn decode(bytes: &[u8]) -> Result<Packet, bincode::Error> {
    bincode::deserialize(bytes)
}
