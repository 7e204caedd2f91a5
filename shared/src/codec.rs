//! Length-prefixed binary framing for [`Packet`]s
//!
//! Every frame is a 4-byte big-endian payload length followed by the
//! bincode-encoded packet. The length is checked against the configured
//! maximum before any payload buffer is allocated.

use crate::packet::Packet;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode packet: {0}")]
    Encode(bincode::Error),

    #[error("failed to decode packet: {0}")]
    Decode(bincode::Error),

    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge { size: usize, max: usize },

    #[error("connection closed by peer")]
    Closed,

    #[error("packet channel has been stopped")]
    Stopped,

    #[error("outbound queue full ({capacity} packets); peer is not reading")]
    Backlogged { capacity: usize },
}

/// Serializes a packet into a complete frame (header + payload)
pub fn encode_frame(packet: &Packet, max_packet_size: usize) -> Result<Vec<u8>, ChannelError> {
    let payload = bincode::serialize(packet).map_err(ChannelError::Encode)?;
    if payload.len() > max_packet_size {
        return Err(ChannelError::PacketTooLarge {
            size: payload.len(),
            max: max_packet_size,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub async fn write_frame<W>(
    writer: &mut W,
    packet: &Packet,
    max_packet_size: usize,
) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(packet, max_packet_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R>(
    reader: &mut R,
    max_packet_size: usize,
) -> Result<Option<Packet>, ChannelError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_be_bytes(header) as usize;
    if length > max_packet_size {
        return Err(ChannelError::PacketTooLarge {
            size: length,
            max: max_packet_size,
        });
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    bincode::deserialize(&payload)
        .map(Some)
        .map_err(ChannelError::Decode)
}
