use clap::Parser;
use client::network::DEFAULT_MAX_PACKET_SIZE;
use client::{Autopilot, ClientGameState, GameClient, InputManager};
use log::{info, warn};
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

const FRAME_RATE: u32 = 60;
const HOLD_FRAMES: u32 = 30;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(35);
const GOODBYE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:22222")]
    server: String,

    /// Player name sent in the game request
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// How long to play before saying goodbye
    #[arg(short = 'd', long, default_value = "10")]
    duration_secs: u64,

    /// Seed for the autopilot; random when omitted
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("Connecting to: {}", args.server);

    let mut client = GameClient::connect(&args.server, DEFAULT_MAX_PACKET_SIZE).await?;
    client.handshake(&args.name, HANDSHAKE_TIMEOUT).await?;

    let mut input = InputManager::new();
    let mut pilot = Autopilot::new(args.seed, HOLD_FRAMES);
    let mut state = ClientGameState::new();

    let mut frames = interval(Duration::from_secs_f64(1.0 / FRAME_RATE as f64));
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);

    while Instant::now() < deadline {
        frames.tick().await;

        for frame in client.drain_snapshots() {
            state.apply_snapshot(frame);
        }
        if !client.is_connected() {
            warn!("Server closed the connection");
            break;
        }
        if state.game_over_tick().is_some() {
            break;
        }

        if let Some(change) = input.update(pilot.next_arrows()) {
            client.send_input(change.pressed, change.released)?;
        }
    }

    if client.is_connected() {
        client.leave(GOODBYE_TIMEOUT).await?;
    } else {
        client.close().await;
    }

    info!(
        "Received {} frames ({} skipped), peak {} bullets",
        state.frames_received(),
        state.skipped_ticks(),
        state.max_bullets()
    );
    match (state.game_over_tick(), state.player()) {
        (Some(tick), _) => info!("Hit on tick {}", tick),
        (None, Some(player)) => info!(
            "Survived at ({:.1}, {:.1})",
            player.pos.x, player.pos.y
        ),
        (None, None) => info!("No snapshot received"),
    }

    Ok(())
}
