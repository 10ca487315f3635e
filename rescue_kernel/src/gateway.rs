//! Component admission: turns accepted connections into live sessions.

use rescue_core::config::Config;
use rescue_core::connection::{Connection, ConnectionAcceptor, ConnectionListener};
use rescue_core::messages::{Message, RequestId, SessionId, PROTOCOL_VERSION};
use rescue_core::worldmodel::{ChangeSet, WorldModel};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A component that has completed the full handshake.
pub struct LiveSession {
    pub name: String,
    pub connection: Connection,
}

struct PendingSession {
    request_id: RequestId,
    name: String,
    connection: Connection,
}

/// Session bookkeeping shared between gateway and kernel.
///
/// A session is *pending* between `ConnectOk` and the matching
/// `Acknowledge`; only live sessions receive tick traffic.
pub struct SessionTable {
    next_session: u32,
    pending: BTreeMap<SessionId, PendingSession>,
    live: BTreeMap<SessionId, LiveSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            next_session: 1,
            pending: BTreeMap::new(),
            live: BTreeMap::new(),
        }
    }

    fn allocate(&mut self) -> SessionId {
        let id = SessionId(self.next_session);
        self.next_session += 1;
        id
    }

    /// Snapshot of the live sessions, for one tick's fan-out.
    pub fn live_sessions(&self) -> Vec<(SessionId, Connection)> {
        self.live
            .iter()
            .map(|(id, session)| (*id, session.connection.clone()))
            .collect()
    }

    /// Drops a session whose connection has failed.
    pub fn remove(&mut self, session_id: SessionId) {
        self.pending.remove(&session_id);
        if self.live.remove(&session_id).is_some() {
            info!("Removed {}", session_id);
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// A simulator's change-set reply for one tick, as forwarded off the
/// connection read path.
#[derive(Debug)]
pub struct SimulatorReply {
    pub session_id: SessionId,
    pub tick: u64,
    pub changes: ChangeSet,
}

struct GatewayShared {
    model: Arc<Mutex<WorldModel>>,
    sessions: Arc<Mutex<SessionTable>>,
    kernel_config: Config,
    replies: mpsc::UnboundedSender<SimulatorReply>,
}

impl GatewayShared {
    fn handle_connect(
        &self,
        connection: &Connection,
        request_id: RequestId,
        version: u32,
        name: Option<String>,
    ) {
        let name = name.unwrap_or_else(|| "anonymous".to_string());
        if version != PROTOCOL_VERSION {
            warn!(
                "Refusing '{}': protocol version {} (expected {})",
                name, version, PROTOCOL_VERSION
            );
            let _ = connection.send(&Message::ConnectError {
                request_id,
                reason: format!("Unsupported protocol version: {}", version),
            });
            return;
        }

        let entities = self.model.lock().unwrap().snapshot();
        let session_id = {
            let mut sessions = self.sessions.lock().unwrap();
            let session_id = sessions.allocate();
            sessions.pending.insert(
                session_id,
                PendingSession {
                    request_id,
                    name: name.clone(),
                    connection: connection.clone(),
                },
            );
            session_id
        };
        info!("Component '{}' connecting: assigned {}", name, session_id);

        if let Err(e) = connection.send(&Message::ConnectOk {
            request_id,
            session_id,
            entities,
            config: self.kernel_config.clone(),
        }) {
            error!("Failed to admit '{}': {}", name, e);
            self.sessions.lock().unwrap().remove(session_id);
        }
    }

    fn handle_acknowledge(&self, request_id: RequestId, session_id: SessionId) {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.pending.remove(&session_id) {
            Some(pending) if pending.request_id == request_id => {
                info!("Component '{}' is live as {}", pending.name, session_id);
                sessions.live.insert(
                    session_id,
                    LiveSession {
                        name: pending.name,
                        connection: pending.connection,
                    },
                );
            }
            Some(pending) => {
                warn!(
                    "Acknowledge for {} carries request {}, expected {}; dropping session",
                    session_id, request_id, pending.request_id
                );
            }
            None => warn!("Acknowledge for unknown {}", session_id),
        }
    }
}

/// Accepts component connections and runs the kernel side of the join
/// handshake on each; completed sessions land in the shared
/// [`SessionTable`], and simulator tick replies are forwarded into the
/// channel returned by [`ComponentGateway::new`].
#[derive(Clone)]
pub struct ComponentGateway {
    shared: Arc<GatewayShared>,
}

impl ComponentGateway {
    pub fn new(
        model: Arc<Mutex<WorldModel>>,
        sessions: Arc<Mutex<SessionTable>>,
        kernel_config: Config,
    ) -> (Self, mpsc::UnboundedReceiver<SimulatorReply>) {
        let (replies, reply_rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: Arc::new(GatewayShared {
                    model,
                    sessions,
                    kernel_config,
                    replies,
                }),
            },
            reply_rx,
        )
    }
}

struct AdmissionListener {
    shared: Arc<GatewayShared>,
}

impl ConnectionListener for AdmissionListener {
    fn message_received(&self, connection: &Connection, message: &Message) {
        match message {
            Message::Connect {
                request_id,
                version,
                name,
            } => self
                .shared
                .handle_connect(connection, *request_id, *version, name.clone()),
            Message::Acknowledge {
                request_id,
                session_id,
            } => self.shared.handle_acknowledge(*request_id, *session_id),
            Message::Update {
                target,
                tick,
                changes,
            } => {
                // In a simulator's reply the target names the sender.
                let _ = self.shared.replies.send(SimulatorReply {
                    session_id: *target,
                    tick: *tick,
                    changes: changes.clone(),
                });
            }
            _ => {}
        }
    }
}

impl ConnectionAcceptor for ComponentGateway {
    fn new_connection(&self, connection: Connection) {
        connection.add_listener(AdmissionListener {
            shared: self.shared.clone(),
        });
    }
}
