//! The steady-state tick loop of a joined simulator component.

use crate::components::handshake::join;
use crate::config::Config;
use crate::connection::{Connection, ConnectionListener};
use crate::error::ComponentError;
use crate::messages::{AgentCommand, Message, SessionId};
use crate::worldmodel::{ChangeSet, WorldModel};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The per-tick behavior a simulator plugs into the harness.
///
/// Implementations own only their internal engine state; the harness owns
/// the connection, the local world model, and the tick bookkeeping.
pub trait SimulatorLogic: Send + 'static {
    /// Declared component name, sent in the connect request.
    fn name(&self) -> &str;

    /// Called once after a successful join, with the freshly applied
    /// initial entity set and the kernel's configuration.
    fn post_connect(&mut self, model: &WorldModel, config: &Config);

    /// Turns one tick's command batch into world-model mutations, recording
    /// every changed attribute in `changes`. Commands the engine rejects
    /// are logged and simply contribute nothing.
    fn process_commands(
        &mut self,
        model: &mut WorldModel,
        tick: u64,
        commands: &[AgentCommand],
        changes: &mut ChangeSet,
    );
}

enum TickMessage {
    Update { tick: u64, changes: ChangeSet },
    Commands { tick: u64, commands: Vec<AgentCommand> },
}

/// Forwards tick traffic addressed to one session into the harness task,
/// keeping all model mutation on a single task.
struct TickListener {
    session_id: SessionId,
    forward: mpsc::UnboundedSender<TickMessage>,
}

impl ConnectionListener for TickListener {
    fn message_received(&self, _connection: &Connection, message: &Message) {
        match message {
            Message::Update {
                target,
                tick,
                changes,
            } if *target == self.session_id => {
                let _ = self.forward.send(TickMessage::Update {
                    tick: *tick,
                    changes: changes.clone(),
                });
            }
            Message::Commands {
                target,
                tick,
                commands,
            } if *target == self.session_id => {
                let _ = self.forward.send(TickMessage::Commands {
                    tick: *tick,
                    commands: commands.clone(),
                });
            }
            // Traffic for other sessions sharing this connection.
            _ => {}
        }
    }
}

/// A joined simulator: local world model plus the command -> simulate ->
/// change-set pipeline, driven by kernel tick messages.
pub struct SimulatorComponent<L: SimulatorLogic> {
    connection: Connection,
    logic: L,
    model: WorldModel,
    session_id: SessionId,
    config: Config,
    last_update_tick: u64,
    desync_count: u64,
    inbox: mpsc::UnboundedReceiver<TickMessage>,
}

impl<L: SimulatorLogic> SimulatorComponent<L> {
    /// Joins the kernel on an already-started connection and wires up the
    /// tick listener.
    pub async fn connect(connection: Connection, mut logic: L) -> Result<Self, ComponentError> {
        let mut model = WorldModel::new();
        let membership = join(&connection, logic.name(), &mut model).await?;
        logic.post_connect(&model, &membership.config);
        let (forward, inbox) = mpsc::unbounded_channel();
        connection.add_listener(TickListener {
            session_id: membership.session_id,
            forward,
        });
        info!(
            "Simulator '{}' ready as {}",
            logic.name(),
            membership.session_id
        );
        Ok(Self {
            connection,
            logic,
            model,
            session_id: membership.session_id,
            config: membership.config,
            last_update_tick: 0,
            desync_count: 0,
            inbox,
        })
    }

    /// Drains tick messages until the connection closes.
    pub async fn run(&mut self) -> Result<(), ComponentError> {
        while let Some(message) = self.inbox.recv().await {
            match message {
                TickMessage::Update { tick, changes } => self.apply_update(tick, &changes),
                TickMessage::Commands { tick, commands } => {
                    let changes = self.run_commands(tick, &commands);
                    self.connection.send(&Message::Update {
                        target: self.session_id,
                        tick,
                        changes,
                    })?;
                }
            }
        }
        info!("Simulator '{}' connection closed", self.logic.name());
        Ok(())
    }

    /// Merges a kernel world-update into the local model.
    ///
    /// A tick number other than `previous + 1` is logged as a
    /// desynchronization but the change-set is still applied and the
    /// counter still advances: best-effort convergence beats rejection.
    pub fn apply_update(&mut self, tick: u64, changes: &ChangeSet) {
        if tick != self.last_update_tick + 1 {
            warn!(
                "Unexpected update from the kernel. Last update: {}, this update: {}",
                self.last_update_tick, tick
            );
            self.desync_count += 1;
        }
        self.last_update_tick = tick;
        self.model.merge(changes);
        debug!(
            "Applied update for tick {} ({} assignments)",
            tick,
            changes.len()
        );
    }

    /// Runs one command batch through the engine, returning the delta.
    pub fn run_commands(&mut self, tick: u64, commands: &[AgentCommand]) -> ChangeSet {
        let mut changes = ChangeSet::new();
        self.logic
            .process_commands(&mut self.model, tick, commands, &mut changes);
        changes
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model(&self) -> &WorldModel {
        &self.model
    }

    pub fn last_update_tick(&self) -> u64 {
        self.last_update_tick
    }

    /// Number of out-of-sequence updates observed so far.
    pub fn desync_count(&self) -> u64 {
        self.desync_count
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    pub fn logic_mut(&mut self) -> &mut L {
        &mut self.logic
    }
}
