//! Headless client that joins a realm server, walks in a circle and logs what it sees

use clap::Parser;
use log::{debug, info, warn};
use shared::protocol::{decode, encode};
use shared::{
    unix_millis, MoveRequest, Packet, PositionUpdate, RotationUpdate, WorldSnapshot,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};
use tokio::net::UdpSocket;
use tokio::time::{interval, timeout, Instant};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:2567")]
    server: SocketAddr,
    /// Display name to join with
    #[clap(short, long, default_value = "Bot")]
    name: String,
    /// How long to stay connected, in seconds
    #[clap(short, long, default_value = "10")]
    duration: u64,
    /// Radius of the circle to walk
    #[clap(short, long, default_value = "3.0")]
    radius: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Client socket bound to {}", socket.local_addr()?);

    let hello = Packet::Connect {
        client_version: PROTOCOL_VERSION,
        display_name: args.name.clone(),
    };
    socket.send_to(&encode(&hello)?, args.server).await?;
    info!("Sent connect to {}", args.server);

    let mut buf = vec![0u8; 65_507];
    let session_id = loop {
        let (len, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf)).await??;
        match decode(&buf[..len])? {
            Packet::Connected { session_id, player } => {
                info!(
                    "Joined as {} ({}) at ({:.2}, {:.2}, {:.2})",
                    player.username, session_id, player.position.x, player.position.y, player.position.z
                );
                break session_id;
            }
            Packet::Rejected { reason } => {
                warn!("Server rejected us: {}", reason);
                return Ok(());
            }
            other => info!("Ignoring {} before join", other.kind()),
        }
    };

    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.duration);
    let mut move_timer = interval(Duration::from_millis(100));
    let mut view: Option<WorldSnapshot> = None;

    while Instant::now() < deadline {
        tokio::select! {
            _ = move_timer.tick() => {
                let angle = started.elapsed().as_secs_f32();
                let request = MoveRequest {
                    position: Some(PositionUpdate::full(
                        angle.cos() * args.radius,
                        0.0,
                        angle.sin() * args.radius,
                    )),
                    rotation: Some(RotationUpdate { y: Some(angle) }),
                    timestamp: Some(unix_millis(SystemTime::now())),
                };
                socket.send_to(&encode(&Packet::Move(request))?, args.server).await?;
            }
            received = socket.recv_from(&mut buf) => {
                let (len, _) = received?;
                match decode(&buf[..len]) {
                    Ok(Packet::Snapshot(snapshot)) => {
                        // Datagrams may arrive out of order
                        if view.as_ref().map_or(false, |v| snapshot.tick <= v.tick) {
                            continue;
                        }
                        if snapshot.tick % 10 == 0 {
                            info!(
                                "Tick {} world time {}: {} players",
                                snapshot.tick,
                                snapshot.world_time,
                                snapshot.players.len()
                            );
                        }
                        let tick = snapshot.tick;
                        view = Some(snapshot);
                        socket.send_to(&encode(&Packet::Ack { tick })?, args.server).await?;
                    }
                    Ok(Packet::Delta(delta)) => {
                        let Some(current) = view.as_mut() else { continue };
                        if !current.apply_delta(&delta) {
                            debug!("Dropped delta for tick {} (view at {})", delta.tick, current.tick);
                        }
                        let tick = current.tick;
                        socket.send_to(&encode(&Packet::Ack { tick })?, args.server).await?;
                    }
                    Ok(Packet::PlayerJoined { id, display_name }) => {
                        info!("{} joined as {}", id, display_name);
                    }
                    Ok(Packet::PlayerLeft { id }) => info!("{} left", id),
                    Ok(Packet::MoveRejected { fields }) => warn!("Server dropped fields {:?}", fields),
                    Ok(other) => info!("Unexpected packet: {}", other.kind()),
                    Err(e) => warn!("Failed to deserialize packet: {}", e),
                }
            }
        }
    }

    socket.send_to(&encode(&Packet::Disconnect)?, args.server).await?;
    info!("Session {} finished, disconnected", session_id);
    Ok(())
}
