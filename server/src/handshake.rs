//! Four-packet handshake run at the start of every session
//!
//! Both client-side steps are bounded poll loops. Packets of any other kind
//! that show up while waiting are thrown away, so an out-of-order client can
//! only stall itself until the budget runs out.

use crate::config::HandshakeConfig;
use log::debug;
use shared::{ChannelError, Packet, PacketChannel, PacketKind, Stage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no ClientHello after {0} attempts")]
    HelloTimeout(u32),
    #[error("no ClientGameRequest after {0} attempts")]
    GameRequestTimeout(u32),
    #[error("transport failed during handshake: {0}")]
    Transport(Arc<ChannelError>),
    #[error("server is shutting down")]
    Shutdown,
}

/// What the client told us during a completed handshake
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    pub client_version: u32,
    pub player_name: String,
}

/// Polls until a packet of `kind` arrives. `Ok(None)` means the attempt
/// budget ran out.
pub async fn wait_for_packet(
    channel: &mut PacketChannel,
    kind: PacketKind,
    poll_interval: Duration,
    max_attempts: u32,
    running: &AtomicBool,
) -> Result<Option<Packet>, HandshakeError> {
    let attempts = max_attempts.max(1);

    for attempt in 1..=attempts {
        if !running.load(Ordering::SeqCst) {
            return Err(HandshakeError::Shutdown);
        }

        while let Some(packet) = channel.poll_packet() {
            if packet.kind() == kind {
                return Ok(Some(packet));
            }
            debug!(
                "Discarding {:?} from {:?} while waiting for {:?}",
                packet.kind(),
                channel.peer_addr(),
                kind
            );
        }

        if let Some(fault) = channel.recv_exception() {
            return Err(HandshakeError::Transport(fault));
        }
        if !channel.is_running() {
            return Err(HandshakeError::Transport(Arc::new(ChannelError::Stopped)));
        }

        if attempt < attempts {
            tokio::time::sleep(poll_interval).await;
        }
    }

    Ok(None)
}

pub async fn run_handshake(
    channel: &mut PacketChannel,
    config: &HandshakeConfig,
    session_id: u64,
    player_id: u32,
    stage: Stage,
    running: &AtomicBool,
) -> Result<Handshake, HandshakeError> {
    let hello = wait_for_packet(
        channel,
        PacketKind::ClientHello,
        config.poll_interval,
        config.hello_attempts,
        running,
    )
    .await?
    .ok_or(HandshakeError::HelloTimeout(config.hello_attempts))?;

    let Packet::ClientHello { client_version } = hello else {
        return Err(HandshakeError::HelloTimeout(config.hello_attempts));
    };
    send(channel, Packet::ServerAccept { session_id })?;

    let request = wait_for_packet(
        channel,
        PacketKind::ClientGameRequest,
        config.poll_interval,
        config.game_request_attempts,
        running,
    )
    .await?
    .ok_or(HandshakeError::GameRequestTimeout(
        config.game_request_attempts,
    ))?;

    let Packet::ClientGameRequest { player_name } = request else {
        return Err(HandshakeError::GameRequestTimeout(
            config.game_request_attempts,
        ));
    };
    send(channel, Packet::ServerGameResponse { player_id, stage })?;

    Ok(Handshake {
        client_version,
        player_name,
    })
}

fn send(channel: &PacketChannel, packet: Packet) -> Result<(), HandshakeError> {
    channel
        .send_packet(packet)
        .map_err(|e| HandshakeError::Transport(Arc::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    const MAX_PACKET: usize = 1024 * 1024;

    async fn channel_pair() -> (PacketChannel, PacketChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));

        let mut server = PacketChannel::new(accepted.unwrap().0, MAX_PACKET);
        let mut client = PacketChannel::new(connected.unwrap(), MAX_PACKET);
        server.start();
        client.start();
        (server, client)
    }

    fn fast_config() -> HandshakeConfig {
        HandshakeConfig {
            poll_interval: Duration::from_millis(1),
            hello_attempts: 50,
            game_request_attempts: 100,
        }
    }

    #[tokio::test]
    async fn test_full_handshake_order() {
        let (mut server, mut client) = channel_pair().await;
        let running = AtomicBool::new(true);

        client
            .send_packet(Packet::ClientHello { client_version: 3 })
            .unwrap();
        client
            .send_packet(Packet::ClientGameRequest {
                player_name: "tester".to_string(),
            })
            .unwrap();

        let result = run_handshake(&mut server, &fast_config(), 7, 42, Stage::Stage1, &running)
            .await
            .unwrap();
        assert_eq!(result.client_version, 3);
        assert_eq!(result.player_name, "tester");

        assert_eq!(
            client.recv_packet().await,
            Some(Packet::ServerAccept { session_id: 7 })
        );
        assert_eq!(
            client.recv_packet().await,
            Some(Packet::ServerGameResponse {
                player_id: 42,
                stage: Stage::Stage1
            })
        );
    }

    #[tokio::test]
    async fn test_silent_client_times_out_without_reply() {
        let (mut server, mut client) = channel_pair().await;
        let running = AtomicBool::new(true);

        let result =
            run_handshake(&mut server, &fast_config(), 1, 1, Stage::Stage1, &running).await;
        assert!(matches!(result, Err(HandshakeError::HelloTimeout(50))));

        server.stop().await;
        assert_eq!(client.recv_packet().await, None);
    }

    #[tokio::test]
    async fn test_missing_game_request_times_out() {
        let (mut server, mut client) = channel_pair().await;
        let running = AtomicBool::new(true);

        client
            .send_packet(Packet::ClientHello { client_version: 1 })
            .unwrap();

        let result =
            run_handshake(&mut server, &fast_config(), 1, 1, Stage::Stage1, &running).await;
        assert!(matches!(result, Err(HandshakeError::GameRequestTimeout(100))));

        server.stop().await;
        assert_eq!(
            client.recv_packet().await,
            Some(Packet::ServerAccept { session_id: 1 })
        );
        assert_eq!(client.recv_packet().await, None);
    }

    #[tokio::test]
    async fn test_unexpected_packets_are_discarded() {
        let (mut server, client) = channel_pair().await;
        let running = AtomicBool::new(true);

        client
            .send_packet(Packet::ClientInput {
                pressed: 1,
                released: 0,
            })
            .unwrap();
        client.send_packet(Packet::ClientGoodbye).unwrap();
        client
            .send_packet(Packet::ClientHello { client_version: 1 })
            .unwrap();

        let packet = wait_for_packet(
            &mut server,
            PacketKind::ClientHello,
            Duration::from_millis(1),
            100,
            &running,
        )
        .await
        .unwrap();

        assert_eq!(packet, Some(Packet::ClientHello { client_version: 1 }));
        assert!(server.poll_packet().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_wait() {
        let (mut server, _client) = channel_pair().await;
        let running = AtomicBool::new(false);

        let result = wait_for_packet(
            &mut server,
            PacketKind::ClientHello,
            Duration::from_millis(1),
            100,
            &running,
        )
        .await;
        assert!(matches!(result, Err(HandshakeError::Shutdown)));
    }

    #[tokio::test]
    async fn test_peer_close_is_transport_fault() {
        let (mut server, mut client) = channel_pair().await;
        let running = AtomicBool::new(true);

        client.stop().await;
        drop(client);

        let result = wait_for_packet(
            &mut server,
            PacketKind::ClientHello,
            Duration::from_millis(5),
            200,
            &running,
        )
        .await;
        assert!(matches!(result, Err(HandshakeError::Transport(_))));
    }
}
