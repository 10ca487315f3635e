//! Framed, bidirectional message transport over TCP.
//!
//! A [`Connection`] runs one write task and, once started, one read task.
//! Inbound messages are decoded on the read task and handed to registered
//! listeners in arrival order; a slow listener only ever delays its own
//! connection. Listeners should capture data and signal a waiting task
//! rather than compute inline.

mod codec;
mod manager;

pub use codec::Codec;
pub use manager::{ConnectionAcceptor, ConnectionManager};

use crate::error::ConnectionError;
use crate::messages::Message;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Handle for deregistering a listener.
pub type ListenerId = u64;

/// Observer invoked once per message received on a connection.
///
/// Called on the connection's read task, in arrival order. Implementations
/// must be quick: capture what you need, signal a gate or forward into a
/// channel, and return.
pub trait ConnectionListener: Send + Sync + 'static {
    fn message_received(&self, connection: &Connection, message: &Message);
}

enum WriteOp {
    Frame(Vec<u8>),
    Close,
}

/// A message-framed channel to one remote peer. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    peer: String,
    codec: Arc<Codec>,
    outbound: mpsc::UnboundedSender<WriteOp>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ConnectionListener>)>>,
    read_half: Mutex<Option<OwnedReadHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    next_listener_id: AtomicU64,
}

impl Connection {
    /// Opens an outbound connection.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        codec: Arc<Codec>,
    ) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream, codec))
    }

    /// Wraps an already-established stream (accepted or dialed).
    ///
    /// The write task starts immediately so `send` works before `start`;
    /// inbound dispatch begins only once `start` is called, giving the
    /// caller a window to attach listeners without racing early messages.
    pub fn from_stream(stream: TcpStream, codec: Arc<Codec>) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(peer.clone(), write_half, outbound_rx));
        Self {
            inner: Arc::new(ConnectionInner {
                peer,
                codec,
                outbound,
                listeners: Mutex::new(Vec::new()),
                read_half: Mutex::new(Some(read_half)),
                reader: Mutex::new(None),
                closed: AtomicBool::new(false),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    /// The remote peer, for logging.
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Starts inbound message dispatch. Subsequent calls are no-ops.
    pub fn start(&self) {
        let read_half = self.inner.read_half.lock().unwrap().take();
        let Some(read_half) = read_half else {
            return;
        };
        let connection = self.clone();
        let handle = tokio::spawn(async move {
            connection.read_loop(read_half).await;
        });
        *self.inner.reader.lock().unwrap() = Some(handle);
    }

    /// Writes one framed message.
    ///
    /// Fails once the connection is shut down or the peer is unreachable;
    /// transport failures are never retried at this layer.
    pub fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::closed(format!(
                "connection to {} is shut down",
                self.peer()
            )));
        }
        let frame = self.inner.codec.encode(message)?;
        self.inner
            .outbound
            .send(WriteOp::Frame(frame))
            .map_err(|_| ConnectionError::closed(format!("peer {} is gone", self.peer())))
    }

    /// Registers a listener; it sees every message from now on.
    pub fn add_listener(&self, listener: impl ConnectionListener) -> ListenerId {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));
        id
    }

    /// Deregisters a listener. Unknown ids are ignored.
    pub fn remove_listener(&self, listener_id: ListenerId) {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != listener_id);
    }

    /// True until `shutdown` has run (locally or via peer loss).
    pub fn is_alive(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closes the channel and stops dispatch. Idempotent; pending sends
    /// fail. Safe to call from inside a listener.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.outbound.send(WriteOp::Close);
        // Dropping the listeners cancels any handshake gate still waiting.
        self.inner.listeners.lock().unwrap().clear();
        if let Some(handle) = self.inner.reader.lock().unwrap().take() {
            handle.abort();
        }
        debug!("Connection to {} shut down", self.peer());
    }

    async fn read_loop(self, mut read_half: OwnedReadHalf) {
        loop {
            let mut len_buf = [0u8; 4];
            if read_half.read_exact(&mut len_buf).await.is_err() {
                debug!("Peer {} closed the connection", self.peer());
                break;
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            if len > self.inner.codec.max_frame_len() {
                // The stream is unsynchronized beyond recovery.
                error!(
                    "Dropping connection to {}: frame of {} bytes exceeds limit of {}",
                    self.peer(),
                    len,
                    self.inner.codec.max_frame_len()
                );
                break;
            }
            let mut payload = vec![0u8; len];
            if read_half.read_exact(&mut payload).await.is_err() {
                warn!("Peer {} closed mid-frame", self.peer());
                break;
            }
            match self.inner.codec.decode(&payload) {
                Ok(message) => self.dispatch(&message),
                // A bad frame is a protocol fault, not a transport fault:
                // log it and keep dispatching subsequent messages.
                Err(e) => warn!("Ignoring undecodable frame from {}: {}", self.peer(), e),
            }
        }
        self.shutdown();
    }

    fn dispatch(&self, message: &Message) {
        // Snapshot outside the lock so listeners can add/remove listeners
        // or shut the connection down without deadlocking dispatch.
        let listeners: Vec<Arc<dyn ConnectionListener>> = self
            .inner
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.message_received(self, message);
        }
    }
}

async fn write_loop(
    peer: String,
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<WriteOp>,
) {
    while let Some(op) = outbound.recv().await {
        match op {
            WriteOp::Frame(frame) => {
                if let Err(e) = write_half.write_all(&frame).await {
                    error!("Error writing to {}: {}", peer, e);
                    break;
                }
            }
            WriteOp::Close => break,
        }
    }
    // Dropping the write half closes the socket.
}
