use clap::{Parser, ValueEnum};
use log::{error, info};
use server::config::RoomConfig;
use server::ingest::MovementPolicy;
use server::network::{BoxError, Server, ServerMessage};
use server::replication::ReplicationMode;
use server::runtime::RoomReport;
use server::tick::TickPolicy;
use std::time::Duration;
use tokio::task::JoinError;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Replication {
    Full,
    Delta,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WhenEmpty {
    /// Stop ticking when the last player leaves
    Stop,
    /// Keep ticking until the server shuts down
    Run,
}

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "2567")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "10")]
    tick_rate: u32,
    /// Maximum number of players in the room
    #[clap(short, long, default_value = "50")]
    max_clients: usize,
    /// Radius of the spawn circle around the origin
    #[clap(long, default_value = "5.0")]
    spawn_radius: f32,
    /// Replication strategy
    #[clap(long, value_enum, default_value = "full")]
    replication: Replication,
    /// What the tick loop does when the room empties
    #[clap(long, value_enum, default_value = "stop")]
    when_empty: WhenEmpty,
    /// Clamp reported positions to this distance from the origin on each axis
    #[clap(long)]
    position_bound: Option<f32>,
    /// Apply moves even when they arrive out of order
    #[clap(long)]
    allow_stale_moves: bool,
    /// Seconds of silence before a client is dropped
    #[clap(long, default_value = "10")]
    client_timeout: u64,
}

impl Args {
    fn room_config(&self) -> Result<RoomConfig, BoxError> {
        let config = RoomConfig {
            max_clients: self.max_clients,
            spawn_radius: self.spawn_radius,
            replication: match self.replication {
                Replication::Full => ReplicationMode::Full,
                Replication::Delta => ReplicationMode::Delta,
            },
            tick_policy: match self.when_empty {
                WhenEmpty::Stop => TickPolicy::StopWhenEmpty,
                WhenEmpty::Run => TickPolicy::RunUntilDisposed,
            },
            movement: MovementPolicy {
                position_bound: self.position_bound,
                discard_stale: !self.allow_stale_moves,
            },
            ..RoomConfig::default()
        }
        .with_tick_rate(self.tick_rate)?;
        config.validate()?;
        Ok(config)
    }
}

/// Parses command-line arguments, starts the room and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.room_config()?;
    let address = format!("{}:{}", args.host, args.port);

    let server = Server::new(&address, config, Duration::from_secs(args.client_timeout)).await?;
    let control = server.control();

    let mut server_handle = tokio::spawn(server.run());

    // Handle shutdown gracefully
    tokio::select! {
        result = &mut server_handle => log_outcome(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(ServerMessage::Shutdown);
            log_outcome(server_handle.await);
        }
    }

    Ok(())
}

fn log_outcome(result: Result<Result<RoomReport, BoxError>, JoinError>) {
    match result {
        Ok(Ok(report)) => info!(
            "Room finished after {} ticks ({} skipped)",
            report.ticks_fired, report.ticks_skipped
        ),
        Ok(Err(e)) => error!("Server failed: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
    }
}
