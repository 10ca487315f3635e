//! Component-side protocol flows: the join handshake and the per-tick
//! simulator harness.

mod handshake;
mod simulator;

pub use handshake::{join, Membership};
pub use simulator::{SimulatorComponent, SimulatorLogic};
