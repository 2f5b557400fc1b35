//! Transport-side bookkeeping of connected datagram peers
//!
//! This module maps remote addresses to the session ids the room knows them
//! by, including:
//! - Session id allocation for new peers
//! - Address lookup for inbound datagrams
//! - Activity tracking and inactivity timeouts
//!
//! It knows nothing about players; the room decides whether a session is
//! admitted. A connection stays pending until its `Connected` reply goes
//! out, and pending connections receive nothing.

use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::SessionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const SESSION_ID_LEN: usize = 9;

/// A peer the transport has seen a `Connect` from
#[derive(Debug)]
pub struct Connection {
    pub session_id: SessionId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
    /// Set once the room admitted the session
    pub joined: bool,
}

impl Connection {
    pub fn new(session_id: SessionId, addr: SocketAddr) -> Self {
        Self {
            session_id,
            addr,
            last_seen: Instant::now(),
            joined: false,
        }
    }

    /// Returns true if nothing arrived from this peer within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<SessionId, Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh session id for `addr`
    pub fn register(&mut self, addr: SocketAddr) -> SessionId {
        let session_id = loop {
            let candidate = generate_session_id();
            if !self.connections.contains_key(&candidate) {
                break candidate;
            }
        };

        info!("Peer {} assigned session {}", addr, session_id);
        self.connections
            .insert(session_id.clone(), Connection::new(session_id.clone(), addr));
        session_id
    }

    /// Forgets a session; returns false if it was already gone
    pub fn remove(&mut self, session_id: &str) -> bool {
        self.connections.remove(session_id).is_some()
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<SessionId> {
        self.connections
            .values()
            .find(|connection| connection.addr == addr)
            .map(|connection| connection.session_id.clone())
    }

    /// Marks a pending session as admitted; returns false if it is unknown
    pub fn mark_joined(&mut self, session_id: &str) -> bool {
        match self.connections.get_mut(session_id) {
            Some(connection) => {
                connection.joined = true;
                true
            }
            None => false,
        }
    }

    /// Marks the peer at `addr` as active, returning its session id
    pub fn touch(&mut self, addr: SocketAddr) -> Option<SessionId> {
        let connection = self
            .connections
            .values_mut()
            .find(|connection| connection.addr == addr)?;
        connection.last_seen = Instant::now();
        Some(connection.session_id.clone())
    }

    /// Removes and returns sessions that have been silent for longer than `timeout`
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<SessionId> {
        let timed_out: Vec<SessionId> = self
            .connections
            .values()
            .filter(|connection| connection.is_timed_out(timeout))
            .map(|connection| connection.session_id.clone())
            .collect();

        for session_id in &timed_out {
            info!("Session {} timed out", session_id);
            self.remove(session_id);
        }

        timed_out
    }

    /// Snapshot of every admitted session and its address, for fan-out
    pub fn session_addrs(&self) -> Vec<(SessionId, SocketAddr)> {
        self.connections
            .values()
            .filter(|connection| connection.joined)
            .map(|connection| (connection.session_id.clone(), connection.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

fn generate_session_id() -> SessionId {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}
