use shared::SessionId;

/// Errors surfaced to the transport layer by a room
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("session {0} is already in the room")]
    DuplicateSession(SessionId),

    #[error("room is full ({max} players)")]
    RoomFull { max: usize },

    #[error("room is closed")]
    Closed,
}

/// Invalid room configuration, fatal at startup
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("tick rate must be greater than zero")]
    ZeroTickRate,

    #[error("room capacity must be greater than zero")]
    ZeroCapacity,

    #[error("spawn radius must be finite and non-negative, got {0}")]
    InvalidSpawnRadius(f32),

    #[error("position bound must be finite and positive, got {0}")]
    InvalidPositionBound(f32),
}
