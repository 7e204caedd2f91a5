//! Server network layer: the accept loop and start/stop orchestration

use crate::admission::AdmissionControl;
use crate::config::{ServerConfig, SessionMode};
use crate::session::{Session, SessionOutcome};
use crate::socket::ServerSocket;
use crate::ServerError;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle, JoinSet};

/// Pause before retrying after an accept that failed while still running
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// State shared between the server handle and its accept loop
struct ServerInner {
    config: Arc<ServerConfig>,
    socket: ServerSocket,
    admission: Arc<AdmissionControl>,
    running: Arc<AtomicBool>,
    ready: AtomicBool,
    initialized: AtomicBool,
    next_session_id: AtomicU64,
}

/// Accepts connections and runs one independent session per admitted client
pub struct GameServer {
    inner: Arc<ServerInner>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl GameServer {
    pub fn new(config: ServerConfig) -> Self {
        let socket = ServerSocket::new(config.bind_address());
        let admission = Arc::new(AdmissionControl::new(config.max_sessions));

        GameServer {
            inner: Arc::new(ServerInner {
                config: Arc::new(config),
                socket,
                admission,
                running: Arc::new(AtomicBool::new(false)),
                ready: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                next_session_id: AtomicU64::new(1),
            }),
            accept_task: Mutex::new(None),
        }
    }

    /// Binds the listening socket. Must succeed before `run` or `start_async`.
    pub async fn initialize(&self) -> Result<(), ServerError> {
        self.inner.socket.initialize().await?;
        self.inner.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Runs the accept loop on the caller's task until `stop` is called.
    /// Returns at once if the server is already running.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.begin()? {
            accept_loop(Arc::clone(&self.inner)).await;
        }
        Ok(())
    }

    /// Spawns the accept loop and returns immediately. Ignored if the server
    /// is already running.
    pub fn start_async(&self) -> Result<(), ServerError> {
        if !self.begin()? {
            return Ok(());
        }
        let handle = tokio::spawn(accept_loop(Arc::clone(&self.inner)));

        if let Ok(mut slot) = self.accept_task.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    /// Flips `running` on. False when another start already owns the loop.
    fn begin(&self) -> Result<bool, ServerError> {
        if !self.inner.initialized.load(Ordering::SeqCst) {
            return Err(ServerError::NotInitialized);
        }
        let started = self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if !started {
            debug!("Server already running; start ignored");
        }
        Ok(started)
    }

    /// Signals shutdown, breaks the pending accept and waits for the accept
    /// loop to exit. Safe to call when already stopped.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.socket.disconnect();

        let handle = self.accept_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Accept task failed: {}", e);
            }
        }
    }

    /// Polls the readiness flag up to `max_attempts` times
    pub async fn wait_until_ready(&self, poll_interval: Duration, max_attempts: u32) -> bool {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.is_ready() {
                return true;
            }
            if attempt > max_attempts {
                return false;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.admission.active()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.socket.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.socket.disconnect();
    }
}

async fn accept_loop(inner: Arc<ServerInner>) {
    inner.ready.store(true, Ordering::SeqCst);
    info!(
        "Accepting connections (max {} sessions, {:?} mode)",
        inner.admission.max(),
        inner.config.session_mode
    );

    // Only populated in awaited mode
    let mut sessions: JoinSet<SessionOutcome> = JoinSet::new();

    while inner.running.load(Ordering::SeqCst) {
        let accepted = tokio::select! {
            stream = inner.socket.accept_client() => stream,
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                log_finished(finished);
                continue;
            }
        };

        let Some(stream) = accepted else {
            if inner.running.load(Ordering::SeqCst) {
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
            continue;
        };

        let Some(permit) = inner.admission.try_admit() else {
            info!(
                "Rejecting {:?}: {} of {} sessions active",
                stream.peer_addr().ok(),
                inner.admission.active(),
                inner.admission.max()
            );
            drop(stream);
            continue;
        };

        let id = inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        debug!("Admitted session {} ({} active)", id, inner.admission.active());

        let session = Session::new(
            id,
            stream,
            Arc::clone(&inner.config),
            Arc::clone(&inner.running),
        );
        let task = async move {
            let _permit = permit;
            session.run().await
        };

        match inner.config.session_mode {
            SessionMode::Detached => {
                tokio::spawn(task);
            }
            SessionMode::Awaited { .. } => {
                sessions.spawn(task);
            }
        }
    }

    if let SessionMode::Awaited { grace } = inner.config.session_mode {
        drain_sessions(&mut sessions, grace).await;
    }

    inner.ready.store(false, Ordering::SeqCst);
    info!("Accept loop stopped");
}

/// Waits up to `grace` for in-flight sessions, then aborts the rest
async fn drain_sessions(sessions: &mut JoinSet<SessionOutcome>, grace: Duration) {
    if sessions.is_empty() {
        return;
    }
    info!("Waiting up to {:?} for {} sessions", grace, sessions.len());

    let drained = tokio::time::timeout(grace, async {
        while let Some(finished) = sessions.join_next().await {
            log_finished(finished);
        }
    })
    .await;

    if drained.is_err() {
        warn!("Aborting {} sessions after grace period", sessions.len());
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}

fn log_finished(finished: Result<SessionOutcome, JoinError>) {
    match finished {
        Ok(outcome) => debug!("Session task finished: {}", outcome),
        Err(e) if e.is_cancelled() => debug!("Session task cancelled"),
        Err(e) => error!("Session task panicked: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandshakeConfig;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;
    use tokio_test::assert_ok;

    fn test_config(max_sessions: usize, session_mode: SessionMode) -> ServerConfig {
        ServerConfig {
            port: 0,
            max_sessions,
            session_mode,
            handshake: HandshakeConfig {
                poll_interval: Duration::from_millis(5),
                hello_attempts: 400,
                game_request_attempts: 400,
            },
            ..ServerConfig::default()
        }
    }

    async fn wait_for_active(server: &GameServer, expected: usize) -> bool {
        for _ in 0..200 {
            if server.active_sessions() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_requires_initialize() {
        let server = GameServer::new(test_config(1, SessionMode::Detached));
        assert!(matches!(
            server.start_async(),
            Err(ServerError::NotInitialized)
        ));
        assert!(matches!(server.run().await, Err(ServerError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_readiness_follows_accept_loop() {
        let server = GameServer::new(test_config(1, SessionMode::Detached));
        assert_ok!(server.initialize().await);
        assert!(!server.is_ready());
        assert!(!server.wait_until_ready(Duration::from_millis(1), 3).await);

        assert_ok!(server.start_async());
        assert!(server.wait_until_ready(Duration::from_millis(5), 200).await);

        server.stop().await;
        assert!(!server.is_ready());
        assert!(!server.is_running());

        // stopping twice is harmless
        server.stop().await;
    }

    #[tokio::test]
    async fn test_blocking_run_returns_after_stop() {
        let server = Arc::new(GameServer::new(test_config(1, SessionMode::Detached)));
        assert_ok!(server.initialize().await);

        let runner = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };
        assert!(server.wait_until_ready(Duration::from_millis(5), 200).await);

        server.stop().await;
        let result = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(!server.is_ready());
    }

    #[tokio::test]
    async fn test_second_start_is_ignored() {
        let server = GameServer::new(test_config(1, SessionMode::Detached));
        assert_ok!(server.initialize().await);
        assert_ok!(server.start_async());
        assert!(server.wait_until_ready(Duration::from_millis(5), 200).await);

        assert_ok!(server.start_async());
        let inline = tokio::time::timeout(Duration::from_millis(300), server.run()).await;
        assert!(matches!(inline, Ok(Ok(()))));
        assert!(server.is_ready());
        assert!(server.is_running());

        tokio::time::timeout(Duration::from_secs(1), server.stop())
            .await
            .unwrap();
        assert!(!server.is_ready());
    }

    #[tokio::test]
    async fn test_excess_connection_is_dropped() {
        let server = GameServer::new(test_config(1, SessionMode::Detached));
        assert_ok!(server.initialize().await);
        assert_ok!(server.start_async());
        assert!(server.wait_until_ready(Duration::from_millis(5), 200).await);
        let addr = server.local_addr().unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        assert!(wait_for_active(&server, 1).await);

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(1), second.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert_eq!(server.active_sessions(), 1);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_awaited_mode_drains_sessions_on_stop() {
        let mode = SessionMode::Awaited {
            grace: Duration::from_millis(50),
        };
        let server = GameServer::new(test_config(2, mode));
        assert_ok!(server.initialize().await);
        assert_ok!(server.start_async());
        assert!(server.wait_until_ready(Duration::from_millis(5), 200).await);
        let addr = server.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        assert!(wait_for_active(&server, 1).await);

        tokio::time::timeout(Duration::from_secs(2), server.stop())
            .await
            .unwrap();
        assert_eq!(server.active_sessions(), 0);
    }
}
