//! The closed set of control messages exchanged between kernel and components.

use crate::config::Config;
use crate::worldmodel::{ChangeSet, Entity, EntityId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version sent in every connect request.
pub const PROTOCOL_VERSION: u32 = 1;

/// Correlates a handshake reply with its originating request.
///
/// Chosen by the requester; a v4 UUID is unique without coordination, so any
/// number of concurrent handshakes can share one physical connection. The
/// identifier has no meaning beyond one handshake's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generates a fresh request identifier.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 chars are enough to tell requests apart in logs.
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Kernel-assigned identity of a joined component, stable for the life of
/// its connection. Tick messages are addressed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session {}", self.0)
    }
}

/// A command issued by an agent, to be executed by a simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Walk along a path of areas, optionally to an exact point in the last
    /// area.
    Move {
        agent: EntityId,
        path: Vec<EntityId>,
        destination: Option<(i32, i32)>,
    },
    /// Load a casualty into the issuing ambulance.
    Load { agent: EntityId, target: EntityId },
    /// Put down whatever the issuing ambulance is carrying.
    Unload { agent: EntityId },
}

impl AgentCommand {
    /// The entity issuing this command.
    pub fn agent(&self) -> EntityId {
        match self {
            Self::Move { agent, .. } | Self::Load { agent, .. } | Self::Unload { agent } => *agent,
        }
    }
}

/// Every message that can appear on a kernel/component connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum Message {
    /// A component (or the kernel, towards the GIS) asks to join.
    Connect {
        request_id: RequestId,
        version: u32,
        /// Declared component name; `None` on the GIS bootstrap flow.
        name: Option<String>,
    },
    /// Join accepted: session identity, initial entity set, kernel config.
    ConnectOk {
        request_id: RequestId,
        session_id: SessionId,
        entities: Vec<Entity>,
        config: Config,
    },
    /// Join refused, with a human-readable reason.
    ConnectError { request_id: RequestId, reason: String },
    /// Receipt of `ConnectOk`, echoing the assigned session.
    Acknowledge {
        request_id: RequestId,
        session_id: SessionId,
    },
    /// A change-set for one tick, addressed to one session.
    Update {
        target: SessionId,
        tick: u64,
        changes: ChangeSet,
    },
    /// The agent commands issued for one tick, addressed to one session.
    Commands {
        target: SessionId,
        tick: u64,
        commands: Vec<AgentCommand>,
    },
}

impl Message {
    /// Short tag for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::ConnectOk { .. } => "connect_ok",
            Self::ConnectError { .. } => "connect_error",
            Self::Acknowledge { .. } => "acknowledge",
            Self::Update { .. } => "update",
            Self::Commands { .. } => "commands",
        }
    }
}
