//! Accept-loop management for inbound connections.

use super::{Codec, Connection};
use crate::error::ConnectionError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Callback handed each accepted connection, before dispatch starts.
///
/// The implementation attaches its listeners and returns; the manager then
/// starts the connection so no early message is lost.
pub trait ConnectionAcceptor: Send + Sync + 'static {
    fn new_connection(&self, connection: Connection);
}

impl<F> ConnectionAcceptor for F
where
    F: Fn(Connection) + Send + Sync + 'static,
{
    fn new_connection(&self, connection: Connection) {
        self(connection)
    }
}

/// Listens on ports, wraps accepted sockets in [`Connection`]s, and hands
/// them to an acceptor. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
    accept_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Creates a manager with no listening sockets.
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ManagerInner {
                shutdown_tx,
                closed: AtomicBool::new(false),
                accept_tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Binds a listening socket and starts an accept loop on its own task.
    ///
    /// Port 0 binds an ephemeral port; the bound port is returned either
    /// way. Fails with [`ConnectionError::ManagerClosed`] after `shutdown`.
    pub async fn listen(
        &self,
        port: u16,
        codec: Arc<Codec>,
        acceptor: Arc<dyn ConnectionAcceptor>,
    ) -> Result<u16, ConnectionError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::ManagerClosed);
        }
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_port = listener.local_addr()?.port();
        info!("Listening for connections on port {}", local_port);

        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            if inner.closed.load(Ordering::SeqCst) {
                                // Raced shutdown: drop the socket, never
                                // hand it to the acceptor.
                                break;
                            }
                            debug!("Accepted connection from {}", peer);
                            let connection = Connection::from_stream(stream, codec.clone());
                            acceptor.new_connection(connection.clone());
                            connection.start();
                        }
                        Err(e) => error!("Error accepting connection: {}", e),
                    }
                }
            }
            // The listener drops here, closing the socket.
        });
        self.inner.accept_tasks.lock().unwrap().push(handle);
        Ok(local_port)
    }

    /// Stops accepting and closes every listening socket. Idempotent.
    ///
    /// Awaits only the accept loops themselves, never in-flight application
    /// logic on accepted connections.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> =
            self.inner.accept_tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("Connection manager shut down");
    }

    /// True until `shutdown` has run.
    pub fn is_alive(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_accepted_connections_reach_acceptor() {
        let codec = Arc::new(Codec::new());
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let port = manager
            .listen(
                0,
                codec.clone(),
                Arc::new(move |connection: Connection| {
                    let _ = tx.send(connection);
                }),
            )
            .await
            .unwrap();

        let client = Connection::connect(("127.0.0.1", port), codec)
            .await
            .unwrap();
        let accepted = rx.recv().await.unwrap();
        assert!(accepted.is_alive());
        client.shutdown();
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_listening_socket() {
        let codec = Arc::new(Codec::new());
        let manager = ConnectionManager::new();
        let port = manager
            .listen(0, codec.clone(), Arc::new(|_connection: Connection| {}))
            .await
            .unwrap();

        manager.shutdown().await;
        assert!(!manager.is_alive());
        // A second shutdown is a no-op.
        manager.shutdown().await;

        assert!(Connection::connect(("127.0.0.1", port), codec).await.is_err());
    }

    #[tokio::test]
    async fn test_listen_after_shutdown_fails() {
        let codec = Arc::new(Codec::new());
        let manager = ConnectionManager::new();
        manager.shutdown().await;
        assert!(matches!(
            manager
                .listen(0, codec, Arc::new(|_connection: Connection| {}))
                .await,
            Err(ConnectionError::ManagerClosed)
        ));
    }

    #[tokio::test]
    async fn test_two_listening_ports() {
        let codec = Arc::new(Codec::new());
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let acceptor = Arc::new(move |_connection: Connection| {
            let _ = tx.send(());
        });
        let port_a = manager.listen(0, codec.clone(), acceptor.clone()).await.unwrap();
        let port_b = manager.listen(0, codec.clone(), acceptor).await.unwrap();
        assert_ne!(port_a, port_b);

        Connection::connect(("127.0.0.1", port_a), codec.clone())
            .await
            .unwrap();
        Connection::connect(("127.0.0.1", port_b), codec)
            .await
            .unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        manager.shutdown().await;
    }
}
