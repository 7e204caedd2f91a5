use serde::{Deserialize, Serialize};

use crate::snapshot::{FrameSnapshot, Stage};

/// Packet types exchanged between client and server, in protocol order
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Handshake
    ClientHello {
        client_version: u32,
    },
    ServerAccept {
        session_id: u64,
    },
    ClientGameRequest {
        player_name: String,
    },
    ServerGameResponse {
        player_id: u32,
        stage: Stage,
    },

    // Simulation
    ClientInput {
        pressed: u8,
        released: u8,
    },
    FrameSnapshot(FrameSnapshot),

    // Teardown
    ClientGoodbye,
    ServerGoodbye,
}

/// Payload-free tag of a [`Packet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    ClientHello,
    ServerAccept,
    ClientGameRequest,
    ServerGameResponse,
    ClientInput,
    FrameSnapshot,
    ClientGoodbye,
    ServerGoodbye,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::ClientHello { .. } => PacketKind::ClientHello,
            Packet::ServerAccept { .. } => PacketKind::ServerAccept,
            Packet::ClientGameRequest { .. } => PacketKind::ClientGameRequest,
            Packet::ServerGameResponse { .. } => PacketKind::ServerGameResponse,
            Packet::ClientInput { .. } => PacketKind::ClientInput,
            Packet::FrameSnapshot(_) => PacketKind::FrameSnapshot,
            Packet::ClientGoodbye => PacketKind::ClientGoodbye,
            Packet::ServerGoodbye => PacketKind::ServerGoodbye,
        }
    }
}
