//! Client side of the TCP protocol: connect, handshake, input and teardown

use log::{debug, info, warn};
use shared::{
    ChannelError, FrameSnapshot, Packet, PacketChannel, PacketKind, Stage, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

pub const DEFAULT_MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transport failed: {0}")]
    Transport(Arc<ChannelError>),
    #[error("server closed the connection")]
    Disconnected,
    #[error("timed out waiting for {0:?}")]
    Timeout(PacketKind),
    #[error("no packet received within {0:?}")]
    Idle(Duration),
    #[error("expected {expected:?}, got {got:?}")]
    UnexpectedPacket { expected: PacketKind, got: PacketKind },
}

impl From<ChannelError> for ClientError {
    fn from(e: ChannelError) -> Self {
        ClientError::Transport(Arc::new(e))
    }
}

/// What the server assigned us during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: u64,
    pub player_id: u32,
    pub stage: Stage,
}

pub struct GameClient {
    channel: PacketChannel,
    session: Option<SessionInfo>,
    goodbye_received: bool,
}

impl GameClient {
    pub async fn connect(addr: &str, max_packet_size: usize) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        info!("Connected to {}", addr);

        let mut channel = PacketChannel::new(stream, max_packet_size);
        channel.start();

        Ok(GameClient {
            channel,
            session: None,
            goodbye_received: false,
        })
    }

    /// Runs hello → accept → game request → game response. Each reply is
    /// awaited for at most `timeout`.
    pub async fn handshake(
        &mut self,
        player_name: &str,
        timeout: Duration,
    ) -> Result<SessionInfo, ClientError> {
        self.channel.send_packet(Packet::ClientHello {
            client_version: PROTOCOL_VERSION,
        })?;

        let session_id = match self.await_reply(PacketKind::ServerAccept, timeout).await? {
            Packet::ServerAccept { session_id } => session_id,
            other => return Err(unexpected(PacketKind::ServerAccept, &other)),
        };

        self.channel.send_packet(Packet::ClientGameRequest {
            player_name: player_name.to_string(),
        })?;

        let session = match self.await_reply(PacketKind::ServerGameResponse, timeout).await? {
            Packet::ServerGameResponse { player_id, stage } => SessionInfo {
                session_id,
                player_id,
                stage,
            },
            other => return Err(unexpected(PacketKind::ServerGameResponse, &other)),
        };

        info!(
            "Joined session {} as player {} on {:?}",
            session.session_id, session.player_id, session.stage
        );
        self.session = Some(session);
        Ok(session)
    }

    pub fn send_input(&self, pressed: u8, released: u8) -> Result<(), ClientError> {
        if pressed == 0 && released == 0 {
            return Ok(());
        }
        self.channel
            .send_packet(Packet::ClientInput { pressed, released })?;
        Ok(())
    }

    pub fn send_goodbye(&self) -> Result<(), ClientError> {
        self.channel.send_packet(Packet::ClientGoodbye)?;
        Ok(())
    }

    /// Waits for the next packet of any kind
    pub async fn next_packet(&mut self, timeout: Duration) -> Result<Packet, ClientError> {
        match tokio::time::timeout(timeout, self.channel.recv_packet()).await {
            Ok(Some(packet)) => {
                if packet.kind() == PacketKind::ServerGoodbye {
                    self.goodbye_received = true;
                }
                Ok(packet)
            }
            Ok(None) => Err(self.closed_error()),
            Err(_) => Err(ClientError::Idle(timeout)),
        }
    }

    /// Drains everything already received, returning the snapshots in order
    pub fn drain_snapshots(&mut self) -> Vec<FrameSnapshot> {
        let mut frames = Vec::new();
        while let Some(packet) = self.channel.poll_packet() {
            match packet {
                Packet::FrameSnapshot(frame) => frames.push(frame),
                Packet::ServerGoodbye => self.goodbye_received = true,
                other => warn!("Unexpected {:?} during play", other.kind()),
            }
        }
        frames
    }

    /// Sends a goodbye and waits for the acknowledgement, skipping any
    /// snapshots still in flight
    pub async fn leave(&mut self, timeout: Duration) -> Result<(), ClientError> {
        self.send_goodbye()?;
        let deadline = tokio::time::Instant::now() + timeout;

        while !self.goodbye_received {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout(PacketKind::ServerGoodbye));
            }
            match tokio::time::timeout(remaining, self.channel.recv_packet()).await {
                Ok(Some(Packet::ServerGoodbye)) => self.goodbye_received = true,
                Ok(Some(packet)) => debug!("Skipping {:?} while leaving", packet.kind()),
                Ok(None) => return Err(self.closed_error()),
                Err(_) => return Err(ClientError::Timeout(PacketKind::ServerGoodbye)),
            }
        }

        self.channel.stop().await;
        Ok(())
    }

    pub async fn close(&mut self) {
        self.channel.stop().await;
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_running()
    }

    pub fn goodbye_received(&self) -> bool {
        self.goodbye_received
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.session
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.channel.peer_addr()
    }

    async fn await_reply(
        &mut self,
        kind: PacketKind,
        timeout: Duration,
    ) -> Result<Packet, ClientError> {
        match tokio::time::timeout(timeout, self.channel.recv_packet()).await {
            Ok(Some(packet)) if packet.kind() == kind => Ok(packet),
            Ok(Some(packet)) => Err(unexpected(kind, &packet)),
            Ok(None) => Err(self.closed_error()),
            Err(_) => Err(ClientError::Timeout(kind)),
        }
    }

    fn closed_error(&self) -> ClientError {
        match self.channel.recv_exception() {
            Some(fault) if !matches!(*fault, ChannelError::Closed) => {
                ClientError::Transport(fault)
            }
            _ => ClientError::Disconnected,
        }
    }
}

fn unexpected(expected: PacketKind, got: &Packet) -> ClientError {
    ClientError::UnexpectedPacket {
        expected,
        got: got.kind(),
    }
}
