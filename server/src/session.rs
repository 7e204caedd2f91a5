//! One admitted connection, from handshake to teardown

use crate::config::ServerConfig;
use crate::game::GameState;
use crate::handshake::{run_handshake, Handshake, HandshakeError};
use crate::playlog::{PlayEvent, PlayLogger};
use log::{debug, error, info, warn};
use shared::{Packet, PacketChannel, Stage};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Why a session ended. None of these are errors from the server's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    HandshakeAborted,
    Goodbye,
    TransportFault,
    Shutdown,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionOutcome::HandshakeAborted => "handshake_aborted",
            SessionOutcome::Goodbye => "goodbye",
            SessionOutcome::TransportFault => "transport_fault",
            SessionOutcome::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

pub struct Session {
    id: u64,
    channel: PacketChannel,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
    playlog: Option<PlayLogger>,
    ticks: u64,
}

impl Session {
    pub fn new(
        id: u64,
        stream: TcpStream,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let channel = PacketChannel::new(stream, config.max_packet_size);

        Self {
            id,
            channel,
            config,
            running,
            playlog: None,
            ticks: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs the session to completion. The connection is always closed
    /// before this returns.
    pub async fn run(mut self) -> SessionOutcome {
        self.playlog = self.open_playlog().await;
        self.channel.start();
        self.record(PlayEvent::SessionStart {
            session_id: self.id,
            peer: self.channel.peer_addr().map(|addr| addr.to_string()),
        });

        let player_id = u32::try_from(self.id).unwrap_or(u32::MAX);
        let handshake = run_handshake(
            &mut self.channel,
            &self.config.handshake,
            self.id,
            player_id,
            Stage::Stage1,
            &self.running,
        )
        .await;

        let outcome = match handshake {
            Ok(handshake) => self.simulate(player_id, handshake).await,
            Err(HandshakeError::Shutdown) => SessionOutcome::Shutdown,
            Err(HandshakeError::Transport(e)) => {
                info!("Session {} lost its connection during handshake: {}", self.id, e);
                SessionOutcome::TransportFault
            }
            Err(e) => {
                info!("Session {} abandoned: {}", self.id, e);
                SessionOutcome::HandshakeAborted
            }
        };

        self.channel.stop().await;
        info!(
            "Session {} ended ({}) after {} ticks",
            self.id, outcome, self.ticks
        );
        self.record(PlayEvent::SessionEnd {
            session_id: self.id,
            outcome: outcome.to_string(),
            ticks: self.ticks,
        });

        if let Some(playlog) = self.playlog.take() {
            // Dropping joins the writer thread and touches the filesystem
            if let Err(e) = tokio::task::spawn_blocking(move || drop(playlog)).await {
                error!("Session {} failed to close its play log: {}", self.id, e);
            }
        }

        outcome
    }

    /// Creates directories, opens the file and starts the writer thread, all
    /// on the blocking pool
    async fn open_playlog(&self) -> Option<PlayLogger> {
        let dirs = self.config.playlog.clone()?;
        let id = self.id;
        match tokio::task::spawn_blocking(move || {
            PlayLogger::new(&dirs.cache_dir, &dirs.data_dir, id)
        })
        .await
        {
            Ok(playlog) => Some(playlog),
            Err(e) => {
                error!("Session {} failed to open its play log: {}", id, e);
                None
            }
        }
    }

    async fn simulate(&mut self, player_id: u32, handshake: Handshake) -> SessionOutcome {
        info!(
            "Session {} started game for {:?} (client version {})",
            self.id, handshake.player_name, handshake.client_version
        );

        let mut game = GameState::new(player_id, Stage::Stage1);
        self.record(PlayEvent::GameStart {
            session_id: self.id,
            player_id,
            player_name: handshake.player_name,
            client_version: handshake.client_version,
            stage: game.snapshot().stage,
        });

        let tick_duration = self.config.tick_duration();

        loop {
            let tick_start = Instant::now();

            if let Some(fault) = self.channel.recv_exception() {
                debug!("Session {} transport fault: {}", self.id, fault);
                return SessionOutcome::TransportFault;
            }
            if !self.channel.is_running() {
                return SessionOutcome::TransportFault;
            }

            if self.drain_inbound(&mut game) {
                return SessionOutcome::Goodbye;
            }

            if !self.running.load(Ordering::SeqCst) {
                return SessionOutcome::Shutdown;
            }

            let was_over = game.is_game_over();
            game.update();
            self.ticks = game.ticks();

            if game.is_game_over() && !was_over {
                info!("Session {} game over on tick {}", self.id, game.snapshot().tick);
                self.record(PlayEvent::GameOver {
                    session_id: self.id,
                    tick: game.snapshot().tick,
                });
            }

            let frame = Packet::FrameSnapshot(game.snapshot().clone());
            if let Err(e) = self.channel.send_packet(frame) {
                debug!("Session {} failed to send snapshot: {}", self.id, e);
                return SessionOutcome::TransportFault;
            }

            let elapsed = tick_start.elapsed();
            match pace(elapsed, tick_duration) {
                Some(remaining) => tokio::time::sleep(remaining).await,
                None => {
                    warn!(
                        "Session {} tick {} overran: {:?} (budget {:?})",
                        self.id,
                        game.snapshot().tick,
                        elapsed,
                        tick_duration
                    );
                    // no catch-up; just let the writer and other sessions run
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Applies every queued packet. Returns true once a goodbye was handled.
    fn drain_inbound(&mut self, game: &mut GameState) -> bool {
        while let Some(packet) = self.channel.poll_packet() {
            match packet {
                Packet::ClientInput { pressed, released } => {
                    game.apply_input(pressed, released);
                }
                Packet::ClientGoodbye => {
                    info!("Session {} received goodbye", self.id);
                    if let Err(e) = self.channel.send_packet(Packet::ServerGoodbye) {
                        debug!("Session {} could not acknowledge goodbye: {}", self.id, e);
                    }
                    return true;
                }
                other => {
                    warn!(
                        "Session {} ignoring unexpected {:?}",
                        self.id,
                        other.kind()
                    );
                }
            }
        }
        false
    }

    fn record(&self, event: PlayEvent) {
        if let Some(playlog) = &self.playlog {
            playlog.log_event(&event);
        }
    }
}

/// Time left to sleep in this tick, or `None` if the tick overran its budget
fn pace(elapsed: Duration, budget: Duration) -> Option<Duration> {
    budget.checked_sub(elapsed).filter(|remaining| !remaining.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HandshakeConfig, PlayLogConfig};
    use shared::PacketKind;
    use tokio::net::TcpListener;

    const MAX_PACKET: usize = 1024 * 1024;

    fn test_config() -> ServerConfig {
        ServerConfig {
            tick_rate: 120,
            handshake: HandshakeConfig {
                poll_interval: Duration::from_millis(1),
                hello_attempts: 50,
                game_request_attempts: 100,
            },
            ..ServerConfig::default()
        }
    }

    async fn spawn_session(
        config: ServerConfig,
        running: Arc<AtomicBool>,
    ) -> (tokio::task::JoinHandle<SessionOutcome>, PacketChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));

        let session = Session::new(9, accepted.unwrap().0, Arc::new(config), running);
        let handle = tokio::spawn(session.run());

        let mut client = PacketChannel::new(connected.unwrap(), MAX_PACKET);
        client.start();
        (handle, client)
    }

    async fn handshake(client: &mut PacketChannel) {
        client
            .send_packet(Packet::ClientHello { client_version: 1 })
            .unwrap();
        assert_eq!(
            client.recv_packet().await.map(|p| p.kind()),
            Some(PacketKind::ServerAccept)
        );
        client
            .send_packet(Packet::ClientGameRequest {
                player_name: "tester".to_string(),
            })
            .unwrap();
        assert_eq!(
            client.recv_packet().await.map(|p| p.kind()),
            Some(PacketKind::ServerGameResponse)
        );
    }

    #[tokio::test]
    async fn test_goodbye_ends_session() {
        let running = Arc::new(AtomicBool::new(true));
        let (handle, mut client) = spawn_session(test_config(), running).await;

        handshake(&mut client).await;
        assert_eq!(
            client.recv_packet().await.map(|p| p.kind()),
            Some(PacketKind::FrameSnapshot)
        );

        client.send_packet(Packet::ClientGoodbye).unwrap();

        let mut goodbyes = 0;
        while let Some(packet) = client.recv_packet().await {
            match packet.kind() {
                PacketKind::ServerGoodbye => goodbyes += 1,
                PacketKind::FrameSnapshot => assert_eq!(goodbyes, 0),
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(goodbyes, 1);
        assert_eq!(handle.await.unwrap(), SessionOutcome::Goodbye);
    }

    #[tokio::test]
    async fn test_silent_client_is_abandoned() {
        let running = Arc::new(AtomicBool::new(true));
        let (handle, mut client) = spawn_session(test_config(), running).await;

        assert_eq!(client.recv_packet().await, None);
        assert_eq!(handle.await.unwrap(), SessionOutcome::HandshakeAborted);
    }

    #[tokio::test]
    async fn test_shutdown_flag_stops_simulation() {
        let running = Arc::new(AtomicBool::new(true));
        let (handle, mut client) = spawn_session(test_config(), Arc::clone(&running)).await;

        handshake(&mut client).await;
        assert_eq!(
            client.recv_packet().await.map(|p| p.kind()),
            Some(PacketKind::FrameSnapshot)
        );

        running.store(false, Ordering::SeqCst);
        let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Shutdown);
    }

    #[tokio::test]
    async fn test_client_disconnect_is_transport_fault() {
        let running = Arc::new(AtomicBool::new(true));
        let (handle, mut client) = spawn_session(test_config(), running).await;

        handshake(&mut client).await;
        client.stop().await;
        drop(client);

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SessionOutcome::TransportFault);
    }

    #[tokio::test]
    async fn test_snapshot_ticks_increase() {
        let running = Arc::new(AtomicBool::new(true));
        let (handle, mut client) = spawn_session(test_config(), running).await;

        handshake(&mut client).await;

        let mut last = None;
        for _ in 0..5 {
            match client.recv_packet().await {
                Some(Packet::FrameSnapshot(frame)) => {
                    assert!(frame.counts_consistent());
                    if let Some(prev) = last {
                        assert_eq!(frame.tick, prev + 1);
                    }
                    last = Some(frame.tick);
                }
                other => panic!("expected snapshot, got {:?}", other.map(|p| p.kind())),
            }
        }

        client.send_packet(Packet::ClientGoodbye).unwrap();
        assert_eq!(handle.await.unwrap(), SessionOutcome::Goodbye);
    }

    #[tokio::test]
    async fn test_playlog_records_session() {
        let cache = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            playlog: Some(PlayLogConfig {
                cache_dir: cache.path().to_path_buf(),
                data_dir: data.path().to_path_buf(),
            }),
            ..test_config()
        };

        let running = Arc::new(AtomicBool::new(true));
        let (handle, mut client) = spawn_session(config, running).await;
        handshake(&mut client).await;
        client.send_packet(Packet::ClientGoodbye).unwrap();
        assert_eq!(handle.await.unwrap(), SessionOutcome::Goodbye);

        let files: Vec<_> = std::fs::read_dir(data.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 1);

        let contents = std::fs::read_to_string(files[0].path()).unwrap();
        let events: Vec<String> = contents
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["event"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(events.first().map(String::as_str), Some("session_start"));
        assert!(events.iter().any(|e| e == "game_start"));
        assert_eq!(events.last().map(String::as_str), Some("session_end"));
    }

    #[test]
    fn test_pace_sleeps_for_remaining_budget() {
        let budget = Duration::from_millis(16);
        assert_eq!(
            pace(Duration::from_millis(10), budget),
            Some(Duration::from_millis(6))
        );
        assert_eq!(pace(Duration::ZERO, budget), Some(budget));
    }

    #[test]
    fn test_pace_reports_overrun() {
        let budget = Duration::from_millis(16);
        assert_eq!(pace(budget, budget), None);
        assert_eq!(pace(Duration::from_millis(40), budget), None);
    }

    #[tokio::test]
    async fn test_overrunning_ticks_stay_consecutive() {
        // a budget of well under a nanosecond makes every tick overrun
        let config = ServerConfig {
            tick_rate: u32::MAX,
            ..test_config()
        };
        let running = Arc::new(AtomicBool::new(true));
        let (handle, mut client) = spawn_session(config, running).await;

        handshake(&mut client).await;

        let mut last = None;
        for _ in 0..30 {
            match client.recv_packet().await {
                Some(Packet::FrameSnapshot(frame)) => {
                    if let Some(prev) = last {
                        assert_eq!(frame.tick, prev + 1);
                    }
                    last = Some(frame.tick);
                }
                other => panic!("expected snapshot, got {:?}", other.map(|p| p.kind())),
            }
        }

        client.send_packet(Packet::ClientGoodbye).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Goodbye);
    }

    #[tokio::test]
    async fn test_playlog_opens_inside_session_task() {
        let root = tempfile::tempdir().unwrap();
        let cache_dir = root.path().join("cache");
        let data_dir = root.path().join("data");
        let config = ServerConfig {
            playlog: Some(PlayLogConfig {
                cache_dir: cache_dir.clone(),
                data_dir: data_dir.clone(),
            }),
            ..test_config()
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));

        let running = Arc::new(AtomicBool::new(true));
        let session = Session::new(3, accepted.unwrap().0, Arc::new(config), running);
        assert!(!cache_dir.exists());
        assert!(!data_dir.exists());

        drop(connected);
        let outcome = session.run().await;
        assert!(matches!(
            outcome,
            SessionOutcome::TransportFault | SessionOutcome::HandshakeAborted
        ));

        assert!(cache_dir.exists());
        let files: Vec<_> = std::fs::read_dir(&data_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 1);
    }
}
