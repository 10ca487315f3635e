//! The request/response exchange by which a component joins a simulation.

use crate::config::Config;
use crate::connection::{Connection, ConnectionListener};
use crate::error::ComponentError;
use crate::messages::{Message, RequestId, SessionId, PROTOCOL_VERSION};
use crate::worldmodel::{Entity, WorldModel};
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// What a successful join grants: a session identity and the kernel's
/// configuration.
#[derive(Debug, Clone)]
pub struct Membership {
    pub session_id: SessionId,
    pub config: Config,
}

enum JoinReply {
    Granted {
        session_id: SessionId,
        entities: Vec<Entity>,
        config: Config,
    },
    Refused {
        reason: String,
    },
}

/// Single-fire gate: fulfilled by the first matching reply, after which
/// further replies for the same request are ignored.
struct JoinListener {
    request_id: RequestId,
    gate: Mutex<Option<oneshot::Sender<JoinReply>>>,
}

impl JoinListener {
    fn fire(&self, reply: JoinReply) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            let _ = gate.send(reply);
        } else {
            debug!("Ignoring reply for completed request {}", self.request_id);
        }
    }
}

impl ConnectionListener for JoinListener {
    fn message_received(&self, _connection: &Connection, message: &Message) {
        match message {
            Message::ConnectOk {
                request_id,
                session_id,
                entities,
                config,
            } if *request_id == self.request_id => {
                self.fire(JoinReply::Granted {
                    session_id: *session_id,
                    entities: entities.clone(),
                    config: config.clone(),
                });
            }
            Message::ConnectError { request_id, reason } if *request_id == self.request_id => {
                self.fire(JoinReply::Refused {
                    reason: reason.clone(),
                });
            }
            // Anything else, including replies carrying another request id,
            // belongs to a different waiter sharing this connection.
            _ => {}
        }
    }
}

/// Joins a running simulation over an already-started connection.
///
/// Sends a connect request under a fresh [`RequestId`] and waits for the
/// reply carrying the same identifier; on success the initial entity set is
/// applied to `model` and an acknowledgement is sent back. Several joins may
/// run concurrently on one connection without cross-talk.
///
/// Failure is only ever surfaced here, after the wait completes: a refusal
/// as [`ComponentError::ConnectionRefused`], a connection that dies before
/// any reply as [`ComponentError::Interrupted`].
pub async fn join(
    connection: &Connection,
    name: &str,
    model: &mut WorldModel,
) -> Result<Membership, ComponentError> {
    let request_id = RequestId::fresh();
    let (gate_tx, gate_rx) = oneshot::channel();
    let listener_id = connection.add_listener(JoinListener {
        request_id,
        gate: Mutex::new(Some(gate_tx)),
    });
    debug!("Connecting as '{}' under request {}", name, request_id);

    if let Err(e) = connection.send(&Message::Connect {
        request_id,
        version: PROTOCOL_VERSION,
        name: Some(name.to_string()),
    }) {
        connection.remove_listener(listener_id);
        return Err(e.into());
    }

    // The gate sender lives in the listener; connection shutdown drops all
    // listeners, so a dead connection cancels the wait instead of hanging.
    let reply = gate_rx.await;
    connection.remove_listener(listener_id);

    match reply {
        Ok(JoinReply::Granted {
            session_id,
            entities,
            config,
        }) => {
            info!(
                "'{}' joined as {} with {} entities",
                name,
                session_id,
                entities.len()
            );
            model.replace_all(entities);
            connection.send(&Message::Acknowledge {
                request_id,
                session_id,
            })?;
            Ok(Membership { session_id, config })
        }
        Ok(JoinReply::Refused { reason }) => {
            warn!("Join of '{}' refused: {}", name, reason);
            Err(ComponentError::ConnectionRefused(reason))
        }
        Err(_) => Err(ComponentError::Interrupted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Codec;
    use crate::worldmodel::{Entity, EntityId, EntityKind};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn loopback_pair() -> (Connection, Connection) {
        let codec = Arc::new(Codec::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, dialed) = tokio::join!(
            listener.accept(),
            Connection::connect(addr, codec.clone())
        );
        let (stream, _) = accepted.unwrap();
        (Connection::from_stream(stream, codec), dialed.unwrap())
    }

    struct Forward(mpsc::UnboundedSender<Message>);

    impl ConnectionListener for Forward {
        fn message_received(&self, _connection: &Connection, message: &Message) {
            let _ = self.0.send(message.clone());
        }
    }

    #[tokio::test]
    async fn test_join_applies_entities_and_acknowledges() {
        let (kernel, component) = loopback_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        kernel.add_listener(Forward(tx));
        kernel.start();
        component.start();

        let kernel_task = tokio::spawn(async move {
            let request_id = match rx.recv().await.unwrap() {
                Message::Connect { request_id, name, .. } => {
                    assert_eq!(name.as_deref(), Some("traffic"));
                    request_id
                }
                other => panic!("expected connect, got {:?}", other),
            };
            let mut config = Config::new();
            config.set("kernel.tick-seconds", 60);
            kernel
                .send(&Message::ConnectOk {
                    request_id,
                    session_id: SessionId(7),
                    entities: vec![Entity::new(EntityId(1), EntityKind::Road)],
                    config,
                })
                .unwrap();
            match rx.recv().await.unwrap() {
                Message::Acknowledge {
                    request_id: ack_request,
                    session_id,
                } => {
                    assert_eq!(ack_request, request_id);
                    assert_eq!(session_id, SessionId(7));
                }
                other => panic!("expected acknowledge, got {:?}", other),
            }
        });

        let mut model = WorldModel::new();
        let membership = join(&component, "traffic", &mut model).await.unwrap();
        assert_eq!(membership.session_id, SessionId(7));
        assert_eq!(membership.config.int_value("kernel.tick-seconds"), Some(60));
        assert_eq!(model.len(), 1);
        kernel_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_joins_do_not_cross_talk() {
        let (kernel, component) = loopback_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        kernel.add_listener(Forward(tx));
        kernel.start();
        component.start();

        // Collect both connect requests, then answer them in reverse order
        // so each waiter must pick out its own reply.
        let kernel_task = tokio::spawn(async move {
            let mut requests = HashMap::new();
            while requests.len() < 2 {
                if let Message::Connect { request_id, name, .. } = rx.recv().await.unwrap() {
                    requests.insert(name.unwrap(), request_id);
                }
            }
            for (name, session) in [("second", 2u32), ("first", 1u32)] {
                kernel
                    .send(&Message::ConnectOk {
                        request_id: requests[name],
                        session_id: SessionId(session),
                        entities: Vec::new(),
                        config: Config::new(),
                    })
                    .unwrap();
            }
        });

        let mut model_a = WorldModel::new();
        let mut model_b = WorldModel::new();
        let (first, second) = tokio::join!(
            join(&component, "first", &mut model_a),
            join(&component, "second", &mut model_b),
        );
        assert_eq!(first.unwrap().session_id, SessionId(1));
        assert_eq!(second.unwrap().session_id, SessionId(2));
        kernel_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_refusal_carries_reason() {
        let (kernel, component) = loopback_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        kernel.add_listener(Forward(tx));
        kernel.start();
        component.start();

        tokio::spawn(async move {
            if let Message::Connect { request_id, .. } = rx.recv().await.unwrap() {
                kernel
                    .send(&Message::ConnectError {
                        request_id,
                        reason: "simulation is full".to_string(),
                    })
                    .unwrap();
            }
        });

        let mut model = WorldModel::new();
        match join(&component, "late", &mut model).await {
            Err(ComponentError::ConnectionRefused(reason)) => {
                assert_eq!(reason, "simulation is full");
            }
            other => panic!("expected refusal, got {:?}", other.map(|m| m.session_id)),
        }
    }

    #[tokio::test]
    async fn test_dead_connection_interrupts_wait() {
        let (kernel, component) = loopback_pair().await;
        kernel.start();
        component.start();

        // The kernel side goes away without ever replying.
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            kernel.shutdown();
        });

        let mut model = WorldModel::new();
        match join(&component, "orphan", &mut model).await {
            Err(ComponentError::Interrupted) => {}
            other => panic!("expected interruption, got {:?}", other.map(|m| m.session_id)),
        }
    }
}
