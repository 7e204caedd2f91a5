//! # Game Client Library
//!
//! Headless client for the bullet-hell server. It speaks the same framed TCP
//! protocol as the server (via `shared`) and keeps no simulation of its own:
//! the server is authoritative and every tick arrives as a full snapshot.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Connection and protocol flow:
//! - Connecting and starting the packet channel
//! - The hello / game request handshake
//! - Sending input edges and the goodbye exchange
//!
//! ### Input Module (`input`)
//! Converts "arrows held now" into pressed/released edges, plus a seeded
//! random autopilot used by the bot binary.
//!
//! ### Game Module (`game`)
//! Bookkeeping over received snapshots: latest frame, gaps, game over.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::input::{Autopilot, InputManager};
//! use client::network::{GameClient, DEFAULT_MAX_PACKET_SIZE};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), client::network::ClientError> {
//! let mut client = GameClient::connect("127.0.0.1:22222", DEFAULT_MAX_PACKET_SIZE).await?;
//! client.handshake("bot", Duration::from_secs(5)).await?;
//!
//! let mut input = InputManager::new();
//! let mut pilot = Autopilot::new(Some(1), 30);
//! if let Some(change) = input.update(pilot.next_arrows()) {
//!     client.send_input(change.pressed, change.released)?;
//! }
//!
//! client.leave(Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod game;
pub mod input;
pub mod network;

pub use game::ClientGameState;
pub use input::{Autopilot, InputChange, InputManager};
pub use network::{ClientError, GameClient, SessionInfo};
