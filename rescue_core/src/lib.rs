//! Rescue simulation kernel core - component connection protocol and tick synchronization.
//!
//! A disaster simulation is driven by a central kernel talking to a set of
//! independently running components (a GIS world-model provider, physical
//! simulators, agents) over point-to-point TCP connections. Every component
//! holds a partial copy of a shared world model; the kernel orchestrates
//! discrete ticks, collects commands, and redistributes incremental changes.
//!
//! This crate is the component-facing core of that system:
//! - [`worldmodel`]: the entity store and the change-set delta representation
//! - [`messages`]: the closed set of control messages on the wire
//! - [`connection`]: framed TCP transport, listeners, and the accept loop
//! - [`components`]: the join handshake and the per-tick simulator harness
//!
//! # Scheduling model
//!
//! Two domains coexist: asynchronous I/O (one accept task per listening
//! socket, one read task per connection, listener callbacks invoked on the
//! read path) and synchronous per-tick computation. The two are insulated by
//! single-fire gates: a caller awaits a `oneshot` channel that a listener
//! fulfills exactly once. Listeners capture data and signal; heavy work runs
//! on the waiting side.

pub mod components;
pub mod config;
pub mod connection;
pub mod error;
pub mod messages;
pub mod worldmodel;

pub use components::{join, Membership, SimulatorComponent, SimulatorLogic};
pub use config::Config;
pub use connection::{Codec, Connection, ConnectionAcceptor, ConnectionListener, ConnectionManager};
pub use error::{ComponentError, ConnectionError};
pub use messages::{AgentCommand, Message, RequestId, SessionId, PROTOCOL_VERSION};
pub use worldmodel::{ChangeSet, Entity, EntityId, EntityKind, PropertyKey, PropertyValue, WorldModel};
