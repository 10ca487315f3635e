//! Area-model traffic simulator for the rescue simulation kernel.
//!
//! Implements the per-tick pipeline of a physical simulator component:
//! validate and apply agent commands against current entity state, advance
//! continuous movement through a fixed-step sub-simulation loop, and emit a
//! minimal change-set of the attributes that actually changed.
//!
//! The world model entities are mirrored into geometric shadow objects
//! ([`objects::TrafficArea`], [`objects::TrafficAgent`],
//! [`objects::TrafficBlockade`]) that exist only inside the engine; nothing
//! outside ever sees them except as the resulting change-set.

pub mod config;
pub mod objects;
pub mod simulator;

pub use config::TrafficConfig;
pub use simulator::TrafficSimulator;
