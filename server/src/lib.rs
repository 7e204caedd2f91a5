//! # Game Server Library
//!
//! Authoritative TCP server for a single-player-per-session bullet-hell game.
//! Every admitted connection gets its own simulation; sessions share nothing
//! except the admission counter and the listening socket.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! The acceptor caps concurrently running sessions with a lock-free counter.
//! Excess connections are dropped immediately rather than queued, so the
//! listen loop never waits for capacity.
//!
//! ### Handshake
//! Each session starts with a fixed four-packet exchange
//! (hello, accept, game request, game response). Both waits are bounded poll
//! loops; a silent client is abandoned without any reply.
//!
//! ### Simulation
//! After the handshake the session ticks its own world at a fixed rate:
//! input, player and enemy movement, bullet patterns, collision, culling and
//! a full snapshot sent back every tick. Overrunning ticks are reported but
//! never skipped or caught up.
//!
//! ## Module Organization
//!
//! ### Socket (`socket`) and Admission (`admission`)
//! The interruptible listener and the session ceiling.
//!
//! ### Handshake (`handshake`), Game (`game`) and Session (`session`)
//! Everything that happens on one connection, in order.
//!
//! ### Network (`network`)
//! [`GameServer`]: accept loop, session supervision, start/stop and readiness.
//!
//! ### Play Log (`playlog`)
//! Optional per-process JSON-lines record of session events.

pub mod admission;
pub mod config;
pub mod game;
pub mod handshake;
pub mod network;
pub mod playlog;
pub mod session;
pub mod socket;

pub use admission::{AdmissionControl, AdmissionPermit};
pub use config::{HandshakeConfig, PlayLogConfig, ServerConfig, SessionMode};
pub use game::{ArrowState, GameState, PatternSchedule, TickSummary};
pub use handshake::HandshakeError;
pub use network::GameServer;
pub use playlog::PlayLogger;
pub use session::{Session, SessionOutcome};
pub use socket::ServerSocket;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server socket has not been initialized")]
    NotInitialized,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
