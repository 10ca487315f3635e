//! The per-tick orchestration loop.

use crate::gateway::{SessionTable, SimulatorReply};
use rescue_core::messages::{AgentCommand, Message, SessionId};
use rescue_core::worldmodel::{ChangeSet, WorldModel};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Drives the simulation forward one tick at a time.
///
/// Each tick fans a commands batch out to every live session, gathers the
/// simulators' change-set replies, merges them into the canonical model,
/// and broadcasts the merged update. This is the one place the aggregate
/// tick is serialized; components only ever see their own connection.
pub struct Kernel {
    model: Arc<Mutex<WorldModel>>,
    sessions: Arc<Mutex<SessionTable>>,
    replies: mpsc::UnboundedReceiver<SimulatorReply>,
    pending_commands: Vec<AgentCommand>,
    tick: u64,
    reply_timeout: Duration,
}

impl Kernel {
    pub fn new(
        model: Arc<Mutex<WorldModel>>,
        sessions: Arc<Mutex<SessionTable>>,
        replies: mpsc::UnboundedReceiver<SimulatorReply>,
    ) -> Self {
        Self {
            model,
            sessions,
            replies,
            pending_commands: Vec::new(),
            tick: 0,
            reply_timeout: Duration::from_secs(10),
        }
    }

    /// How long one tick waits for simulator replies before moving on.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Queues an agent command for the next tick's batch.
    pub fn submit_command(&mut self, command: AgentCommand) {
        self.pending_commands.push(command);
    }

    /// The last completed tick number.
    pub fn tick_number(&self) -> u64 {
        self.tick
    }

    pub fn model(&self) -> Arc<Mutex<WorldModel>> {
        self.model.clone()
    }

    /// Runs one full command -> simulate -> merge -> broadcast cycle and
    /// returns the new tick number.
    pub async fn tick(&mut self) -> u64 {
        self.tick += 1;
        let tick = self.tick;
        let commands = std::mem::take(&mut self.pending_commands);
        let live = self.sessions.lock().unwrap().live_sessions();
        debug!(
            "Tick {}: {} commands for {} components",
            tick,
            commands.len(),
            live.len()
        );

        let mut awaiting: HashSet<SessionId> = HashSet::new();
        for (session_id, connection) in &live {
            match connection.send(&Message::Commands {
                target: *session_id,
                tick,
                commands: commands.clone(),
            }) {
                Ok(()) => {
                    awaiting.insert(*session_id);
                }
                Err(e) => {
                    warn!("Dropping {}: {}", session_id, e);
                    self.sessions.lock().unwrap().remove(*session_id);
                }
            }
        }

        let merged = self.gather_replies(tick, awaiting).await;
        self.model.lock().unwrap().merge(&merged);

        for (session_id, connection) in &live {
            if let Err(e) = connection.send(&Message::Update {
                target: *session_id,
                tick,
                changes: merged.clone(),
            }) {
                warn!("Dropping {}: {}", session_id, e);
                self.sessions.lock().unwrap().remove(*session_id);
            }
        }
        info!("Tick {} complete ({} merged assignments)", tick, merged.len());
        tick
    }

    /// Collects one change-set reply per awaited session, folding them into
    /// a single delta. Stale or unexpected replies are discarded; a timeout
    /// abandons whoever is still missing rather than stalling the run.
    async fn gather_replies(&mut self, tick: u64, mut awaiting: HashSet<SessionId>) -> ChangeSet {
        let mut merged = ChangeSet::new();
        while !awaiting.is_empty() {
            match tokio::time::timeout(self.reply_timeout, self.replies.recv()).await {
                Ok(Some(reply)) => {
                    if reply.tick != tick {
                        warn!(
                            "Discarding update for tick {} from {} (current tick {})",
                            reply.tick, reply.session_id, tick
                        );
                        continue;
                    }
                    if !awaiting.remove(&reply.session_id) {
                        warn!("Unexpected update from {}", reply.session_id);
                        continue;
                    }
                    merged.merge(&reply.changes);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Timed out waiting for updates from {} component(s)",
                        awaiting.len()
                    );
                    break;
                }
            }
        }
        merged
    }
}
