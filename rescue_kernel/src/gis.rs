//! World-model bootstrap against a remote GIS service.

use crate::error::KernelError;
use rescue_core::connection::{Codec, Connection, ConnectionListener};
use rescue_core::messages::{Message, RequestId, SessionId, PROTOCOL_VERSION};
use rescue_core::worldmodel::{Entity, WorldModel};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{error, info};

enum GisReply {
    Entities(Vec<Entity>),
    Error(String),
}

/// Single-fire gate for the one-shot GIS exchange; whichever reply arrives
/// first releases the waiter, later replies are ignored.
struct GisListener {
    gate: Mutex<Option<oneshot::Sender<GisReply>>>,
}

impl GisListener {
    fn fire(&self, reply: GisReply) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            let _ = gate.send(reply);
        }
    }
}

impl ConnectionListener for GisListener {
    fn message_received(&self, _connection: &Connection, message: &Message) {
        match message {
            Message::ConnectOk { entities, .. } => self.fire(GisReply::Entities(entities.clone())),
            Message::ConnectError { reason, .. } => self.fire(GisReply::Error(reason.clone())),
            _ => {}
        }
    }
}

/// Builds the kernel's canonical world model by talking to a remote GIS.
pub struct RemoteGisModelSource {
    port: u16,
}

impl RemoteGisModelSource {
    /// Creates a source dialing the GIS on the given local port.
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Runs the one-shot bootstrap exchange.
    ///
    /// On `ConnectOk` the returned model holds the full GIS entity set and
    /// an acknowledgement has been sent; on an explicit `ConnectError` the
    /// refusal is logged and an empty model is returned so the kernel can
    /// still come up. Only a connection that dies before any reply is a
    /// hard error.
    pub async fn build_world_model(&self, codec: Arc<Codec>) -> Result<WorldModel, KernelError> {
        info!("Connecting to remote GIS on port {}...", self.port);
        let connection = Connection::connect(("127.0.0.1", self.port), codec)
            .await
            .map_err(KernelError::Gis)?;

        let (gate_tx, gate_rx) = oneshot::channel();
        connection.add_listener(GisListener {
            gate: Mutex::new(Some(gate_tx)),
        });
        connection.start();

        let request_id = RequestId::fresh();
        connection
            .send(&Message::Connect {
                request_id,
                version: PROTOCOL_VERSION,
                name: None,
            })
            .map_err(KernelError::Gis)?;

        let reply = gate_rx.await;
        let mut model = WorldModel::new();
        match reply {
            Ok(GisReply::Entities(entities)) => {
                model.replace_all(entities);
                if let Err(e) = connection.send(&Message::Acknowledge {
                    request_id,
                    session_id: SessionId(0),
                }) {
                    error!("Failed to acknowledge GIS data: {}", e);
                }
                info!("GIS connected OK: {} entities", model.len());
            }
            Ok(GisReply::Error(reason)) => {
                error!("Error connecting to remote GIS: {}", reason);
            }
            Err(_) => {
                connection.shutdown();
                return Err(KernelError::GisInterrupted);
            }
        }
        connection.shutdown();
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rescue_core::worldmodel::{EntityId, EntityKind};
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<Message>);

    impl ConnectionListener for Forward {
        fn message_received(&self, _connection: &Connection, message: &Message) {
            let _ = self.0.send(message.clone());
        }
    }

    /// A loopback GIS that answers the first connect request with `reply`.
    async fn fake_gis(
        reply: impl FnOnce(RequestId) -> Message + Send + 'static,
    ) -> (u16, tokio::task::JoinHandle<Option<Message>>) {
        let codec = Arc::new(Codec::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let connection = Connection::from_stream(stream, codec);
            let (tx, mut rx) = mpsc::unbounded_channel();
            connection.add_listener(Forward(tx));
            connection.start();
            let request_id = match rx.recv().await? {
                Message::Connect { request_id, name, .. } => {
                    assert_eq!(name, None);
                    request_id
                }
                other => panic!("expected connect, got {:?}", other),
            };
            connection.send(&reply(request_id)).unwrap();
            // Hand back whatever follows (the acknowledgement, if any).
            tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
                .await
                .ok()
                .flatten()
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_successful_bootstrap_replaces_model() {
        let (port, gis) = fake_gis(|request_id| {
            let mut road = Entity::new(EntityId(1), EntityKind::Road);
            road.set_x(100);
            Message::ConnectOk {
                request_id,
                session_id: SessionId(0),
                entities: vec![road, Entity::new(EntityId(2), EntityKind::Building)],
                config: rescue_core::Config::new(),
            }
        })
        .await;

        let model = RemoteGisModelSource::new(port)
            .build_world_model(Arc::new(Codec::new()))
            .await
            .unwrap();
        assert_eq!(model.len(), 2);
        assert_eq!(model.entity(EntityId(1)).unwrap().x(), Some(100));

        match gis.await.unwrap() {
            Some(Message::Acknowledge { session_id, .. }) => {
                assert_eq!(session_id, SessionId(0));
            }
            other => panic!("expected acknowledge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gis_refusal_yields_empty_model() {
        let (port, _gis) = fake_gis(|request_id| Message::ConnectError {
            request_id,
            reason: "map not loaded".to_string(),
        })
        .await;

        let model = RemoteGisModelSource::new(port)
            .build_world_model(Arc::new(Codec::new()))
            .await
            .unwrap();
        assert!(model.is_empty());
    }

    #[tokio::test]
    async fn test_dead_gis_connection_is_an_error() {
        let codec = Arc::new(Codec::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and immediately hang up without replying.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        match RemoteGisModelSource::new(port).build_world_model(codec).await {
            Err(KernelError::GisInterrupted) => {}
            other => panic!("expected interruption, got {:?}", other.map(|m| m.len())),
        }
    }
}
