//! Listening socket whose blocking accept can be interrupted from outside

use crate::ServerError;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

pub struct ServerSocket {
    address: String,
    listener: RwLock<Option<Arc<TcpListener>>>,
    disconnect_tx: watch::Sender<bool>,
}

impl ServerSocket {
    pub fn new(address: impl Into<String>) -> Self {
        let (disconnect_tx, _) = watch::channel(false);
        Self {
            address: address.into(),
            listener: RwLock::new(None),
            disconnect_tx,
        }
    }

    pub async fn initialize(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.address)
            .await
            .map_err(|source| ServerError::Bind {
                address: self.address.clone(),
                source,
            })?;
        info!("Listening on {}", listener.local_addr()?);

        if let Ok(mut slot) = self.listener.write() {
            *slot = Some(Arc::new(listener));
        }
        self.disconnect_tx.send_replace(false);
        Ok(())
    }

    /// Waits for the next connection. `None` when accept fails or the socket
    /// is (or becomes) disconnected.
    pub async fn accept_client(&self) -> Option<TcpStream> {
        let listener = self.listener.read().ok()?.clone()?;
        let mut disconnected = self.disconnect_tx.subscribe();

        if *disconnected.borrow() {
            return None;
        }

        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    info!("Accepted connection from {}", addr);
                    Some(stream)
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    None
                }
            },
            _ = disconnected.wait_for(|closed| *closed) => None,
        }
    }

    /// Closes the listener and wakes any pending accept. Idempotent.
    pub fn disconnect(&self) {
        self.disconnect_tx.send_replace(true);
        if let Ok(mut slot) = self.listener.write() {
            if slot.take().is_some() {
                info!("Listening socket on {} closed", self.address);
            }
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        let slot = self.listener.read().ok()?;
        slot.as_ref()?.local_addr().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_accept_returns_connection() {
        let socket = ServerSocket::new("127.0.0.1:0");
        socket.initialize().await.unwrap();
        let addr = socket.local_addr().unwrap();

        let (accepted, connected) = tokio::join!(socket.accept_client(), TcpStream::connect(addr));

        assert!(accepted.is_some());
        assert!(connected.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_unblocks_pending_accept() {
        let socket = Arc::new(ServerSocket::new("127.0.0.1:0"));
        socket.initialize().await.unwrap();

        let pending = {
            let socket = Arc::clone(&socket);
            tokio::spawn(async move { socket.accept_client().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        socket.disconnect();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("accept should return after disconnect")
            .unwrap();
        assert!(result.is_none());
        assert!(socket.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_accept_before_initialize_is_none() {
        let socket = ServerSocket::new("127.0.0.1:0");
        assert!(socket.accept_client().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let socket = ServerSocket::new("127.0.0.1:0");
        socket.initialize().await.unwrap();
        socket.disconnect();
        socket.disconnect();
        assert!(socket.accept_client().await.is_none());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let socket = ServerSocket::new("not-an-address");
        assert!(matches!(
            socket.initialize().await,
            Err(ServerError::Bind { .. })
        ));
    }
}
