use clap::Parser;
use log::info;
use server::config::{
    PlayLogConfig, ServerConfig, SessionMode, DEFAULT_ADDRESS, DEFAULT_MAX_PACKET_SIZE,
    DEFAULT_MAX_SESSIONS, DEFAULT_PORT, DEFAULT_TICK_RATE,
};
use server::GameServer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = DEFAULT_ADDRESS)]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Maximum number of concurrent sessions
    #[clap(short, long, default_value_t = DEFAULT_MAX_SESSIONS)]
    max_sessions: usize,
    /// Largest accepted frame payload in bytes
    #[clap(long, default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    max_packet_size: usize,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,
    /// Supervise sessions and wait this many milliseconds for them on shutdown
    #[clap(long)]
    await_sessions: Option<u64>,
    /// Directory the play log is written to while the session runs
    #[clap(long, requires = "playlog_data_dir")]
    playlog_cache_dir: Option<PathBuf>,
    /// Directory finished play logs are moved to
    #[clap(long, requires = "playlog_cache_dir")]
    playlog_data_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let session_mode = match self.await_sessions {
            Some(ms) => SessionMode::Awaited {
                grace: Duration::from_millis(ms),
            },
            None => SessionMode::Detached,
        };
        let playlog = match (self.playlog_cache_dir, self.playlog_data_dir) {
            (Some(cache_dir), Some(data_dir)) => Some(PlayLogConfig {
                cache_dir,
                data_dir,
            }),
            _ => None,
        };

        ServerConfig {
            address: self.host,
            port: self.port,
            max_sessions: self.max_sessions,
            max_packet_size: self.max_packet_size,
            tick_rate: self.tick_rate,
            session_mode,
            playlog,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    info!(
        "Starting server on {} ({} Hz, max {} sessions)",
        config.bind_address(),
        config.tick_rate,
        config.max_sessions
    );

    let server = Arc::new(GameServer::new(config));
    server.initialize().await?;

    let runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    tokio::select! {
        result = runner => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            server.stop().await;
        }
    }

    Ok(())
}
