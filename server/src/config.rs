//! Process-wide server settings, fixed at startup
//!
//! A single [`ServerConfig`] is built once (usually from command line
//! arguments) and handed to the server, which shares it read-only with every
//! session.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 22222;
pub const DEFAULT_MAX_SESSIONS: usize = 10;
pub const DEFAULT_MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Bounded poll budgets for the two handshake waits
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub poll_interval: Duration,
    pub hello_attempts: u32,
    pub game_request_attempts: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            hello_attempts: 500,
            game_request_attempts: 3000,
        }
    }
}

/// What the acceptor does with session tasks it spawns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Fire-and-forget; only the admission counter tracks them
    Detached,
    /// Owned by the accept loop and awaited on shutdown for at most `grace`
    Awaited { grace: Duration },
}

#[derive(Debug, Clone)]
pub struct PlayLogConfig {
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub max_sessions: usize,
    pub max_packet_size: usize,
    pub tick_rate: u32,
    pub handshake: HandshakeConfig,
    pub session_mode: SessionMode,
    pub playlog: Option<PlayLogConfig>,
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            tick_rate: DEFAULT_TICK_RATE,
            handshake: HandshakeConfig::default(),
            session_mode: SessionMode::Detached,
            playlog: None,
        }
    }
}
