//! UDP transport: turns datagrams into room commands and room output into datagrams

use crate::clock::{Clock, SystemClock};
use crate::config::RoomConfig;
use crate::connections::ConnectionTable;
use crate::outbound::Outbound;
use crate::room::Room;
use crate::runtime::{spawn_room, RoomHandle, RoomReport};
use log::{debug, error, info, warn};
use shared::protocol::{decode, encode};
use shared::{Packet, SessionId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Largest datagram we accept or expect to send
const MAX_DATAGRAM: usize = 65_507;

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    SessionTimeout { session_id: String },
    Shutdown,
}

/// Datagrams that bypass the room, addressed by socket address
#[derive(Debug)]
struct DirectPacket {
    packet: Packet,
    addr: SocketAddr,
}

/// UDP front end for a single room
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionTable>>,
    room: RoomHandle,
    room_task: JoinHandle<RoomReport>,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    direct_tx: mpsc::UnboundedSender<DirectPacket>,
    direct_rx: Option<mpsc::UnboundedReceiver<DirectPacket>>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Binds the socket and starts the room task
    ///
    /// Fails if the configuration is invalid or the address cannot be bound;
    /// both are fatal for the process.
    pub async fn new(
        addr: &str,
        config: RoomConfig,
        client_timeout: Duration,
    ) -> Result<Self, BoxError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let room = Room::new(&config, clock.now_millis())?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (room, room_task) = spawn_room(room, clock, outbound_tx);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (direct_tx, direct_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionTable::new())),
            room,
            room_task,
            client_timeout,
            server_tx,
            server_rx,
            direct_tx,
            direct_rx: Some(direct_rx),
            outbound_rx: Some(outbound_rx),
            tasks: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn room(&self) -> RoomHandle {
        self.room.clone()
    }

    /// Sender that can stop `run` from another task
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that delivers room output and direct replies
    ///
    /// Targets are resolved against a copy of the connection table so the
    /// lock is released before any socket write.
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let (Some(mut outbound_rx), Some(mut direct_rx)) =
            (self.outbound_rx.take(), self.direct_rx.take())
        else {
            warn!("Network sender already running");
            return;
        };

        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        let Some(outbound) = outbound else { break };

                        // Admission is ordered with the room's other output:
                        // broadcasts queued before `Connected` skip the joiner
                        if let Packet::Connected { session_id, .. } = &outbound.packet {
                            connections.write().await.mark_joined(session_id);
                        }
                        let session_addrs = {
                            let connections = connections.read().await;
                            connections.session_addrs()
                        };

                        let data = match encode(&outbound.packet) {
                            Ok(data) => data,
                            Err(e) => {
                                error!("Failed to encode {}: {}", outbound.packet.kind(), e);
                                continue;
                            }
                        };

                        for (session_id, addr) in outbound.recipients(session_addrs) {
                            if let Err(e) = socket.send_to(&data, addr).await {
                                error!("Failed to send to session {}: {}", session_id, e);
                            }
                        }
                    },

                    direct = direct_rx.recv() => {
                        let Some(DirectPacket { packet, addr }) = direct else { break };
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    },
                }
            }
        }));
    }

    /// Spawns task that turns silent peers into disconnects
    fn spawn_timeout_checker(&mut self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();
        let timeout = self.client_timeout;

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut connections = connections.write().await;
                    connections.check_timeouts(timeout)
                };

                for session_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::SessionTimeout { session_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        }));
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), BoxError> {
        let data = encode(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_direct(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.direct_tx.send(DirectPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e.0.packet.kind());
        }
    }

    fn disconnect_from_room(&self, session_id: SessionId, consented: bool) {
        if let Err(e) = self.room.disconnect(session_id.clone(), consented) {
            error!("Failed to forward disconnect for {}: {}", session_id, e);
        }
    }

    /// Processes one inbound packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                display_name,
            } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.send_direct(
                        Packet::Rejected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // A second Connect from the same address replaces the old session
                let existing = {
                    let connections = self.connections.read().await;
                    connections.find_by_addr(addr)
                };
                if let Some(existing) = existing {
                    info!("Replacing session {} from {}", existing, addr);
                    self.connections.write().await.remove(&existing);
                    self.disconnect_from_room(existing, false);
                }

                // Registered before joining so the Connected reply can be routed
                let session_id = self.connections.write().await.register(addr);

                if let Err(e) = self.room.connect(session_id.clone(), display_name).await {
                    self.connections.write().await.remove(&session_id);
                    self.send_direct(
                        Packet::Rejected {
                            reason: e.to_string(),
                        },
                        addr,
                    );
                }
            }

            Packet::Move(request) => {
                let session_id = self.connections.write().await.touch(addr);
                match session_id {
                    Some(session_id) => {
                        if let Err(e) = self.room.send_move(session_id, request) {
                            error!("Failed to forward move: {}", e);
                        }
                    }
                    None => debug!("Move from unknown peer {}", addr),
                }
            }

            Packet::Ack { tick } => {
                let session_id = self.connections.write().await.touch(addr);
                match session_id {
                    Some(session_id) => {
                        if let Err(e) = self.room.ack(session_id, tick) {
                            error!("Failed to forward ack: {}", e);
                        }
                    }
                    None => debug!("Ack from unknown peer {}", addr),
                }
            }

            Packet::Heartbeat => {
                if self.connections.write().await.touch(addr).is_none() {
                    debug!("Heartbeat from unknown peer {}", addr);
                }
            }

            Packet::Disconnect => {
                let session_id = {
                    let connections = self.connections.read().await;
                    connections.find_by_addr(addr)
                };

                if let Some(session_id) = session_id {
                    self.connections.write().await.remove(&session_id);
                    self.disconnect_from_room(session_id, true);
                }
            }

            other => {
                warn!("Unexpected {} packet from {}", other.kind(), addr);
            }
        }
    }

    /// Runs until a `Shutdown` message arrives, then disposes the room
    pub async fn run(mut self) -> Result<RoomReport, BoxError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(ServerMessage::SessionTimeout { session_id }) => {
                    self.disconnect_from_room(session_id, false);
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        if let Err(e) = self.room.shutdown() {
            warn!("Room already stopped: {}", e);
        }
        let report = self.room_task.await?;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_server_message_creation() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);
        let msg = ServerMessage::PacketReceived {
            packet: Packet::Heartbeat,
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(packet, Packet::Heartbeat);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let config = RoomConfig {
            max_clients: 0,
            ..RoomConfig::default()
        };

        let result = Server::new("127.0.0.1:0", config, Duration::from_secs(5)).await;

        let err = result.err().expect("server should not start");
        assert!(err.to_string().contains("capacity"));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let result = Server::new("not-an-address", RoomConfig::default(), Duration::from_secs(5)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_returns_room_report() {
        let server = Server::new("127.0.0.1:0", RoomConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
        let control = server.control();
        let room = server.room();

        let running = tokio::spawn(server.run());
        room.connect("local", "Hero").await.unwrap();
        control.send(ServerMessage::Shutdown).unwrap();

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.players_at_shutdown, 1);
    }

    #[tokio::test]
    async fn test_wrong_protocol_version_rejected() {
        let server = Server::new("127.0.0.1:0", RoomConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let control = server.control();
        let running = tokio::spawn(server.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let hello = encode(&Packet::Connect {
            client_version: PROTOCOL_VERSION + 1,
            display_name: "Time traveller".to_string(),
        })
        .unwrap();
        client.send_to(&hello, server_addr).await.unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("no reply from server")
            .unwrap();

        match decode(&buf[..len]).unwrap() {
            Packet::Rejected { reason } => assert!(reason.contains("version")),
            other => panic!("Expected rejection, got {:?}", other),
        }

        control.send(ServerMessage::Shutdown).unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_after_room_closed_is_not_fatal() {
        let mut server = Server::new("127.0.0.1:0", RoomConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();
        let room = server.room();
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        server.connections.write().await.register(peer);

        room.shutdown().unwrap();
        while !room.is_closed() {
            tokio::task::yield_now().await;
        }

        server.handle_packet(Packet::Disconnect, peer).await;
        assert!(server.connections.read().await.find_by_addr(peer).is_none());
    }

    #[tokio::test]
    async fn test_joiner_hears_connected_first() {
        let config = RoomConfig::default().with_tick_rate(50).unwrap();
        let server = Server::new("127.0.0.1:0", config, Duration::from_secs(5))
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let control = server.control();
        let room = server.room();
        let running = tokio::spawn(server.run());

        // Keep the room ticking so broadcasts are in flight while we join
        room.connect("local", "Host").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let hello = encode(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
            display_name: "Guest".to_string(),
        })
        .unwrap();
        client.send_to(&hello, server_addr).await.unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("no reply from server")
            .unwrap();

        match decode(&buf[..len]).unwrap() {
            Packet::Connected { player, .. } => assert_eq!(player.username, "Guest"),
            other => panic!("Expected Connected first, got {:?}", other),
        }

        control.send(ServerMessage::Shutdown).unwrap();
        running.await.unwrap().unwrap();
    }
}
