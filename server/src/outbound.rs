//! Messages a room hands to the transport for delivery

use shared::{Packet, SessionId};

/// Who should receive an outbound packet
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Session(SessionId),
    AllExcept(SessionId),
    All,
    Only(Vec<SessionId>),
}

impl Target {
    pub fn includes(&self, session_id: &str) -> bool {
        match self {
            Target::Session(id) => id == session_id,
            Target::AllExcept(id) => id != session_id,
            Target::All => true,
            Target::Only(ids) => ids.iter().any(|id| id == session_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub packet: Packet,
}

impl Outbound {
    pub fn to_session(session_id: impl Into<SessionId>, packet: Packet) -> Self {
        Self {
            target: Target::Session(session_id.into()),
            packet,
        }
    }

    pub fn to_all_except(session_id: impl Into<SessionId>, packet: Packet) -> Self {
        Self {
            target: Target::AllExcept(session_id.into()),
            packet,
        }
    }

    pub fn to_all(packet: Packet) -> Self {
        Self {
            target: Target::All,
            packet,
        }
    }

    /// Keeps the entries of `sessions` this packet is addressed to
    ///
    /// `sessions` pairs each connected session with whatever the caller
    /// delivers through, usually a socket address.
    pub fn recipients<A>(&self, sessions: Vec<(SessionId, A)>) -> Vec<(SessionId, A)> {
        sessions
            .into_iter()
            .filter(|(id, _)| self.target.includes(id))
            .collect()
    }
}
