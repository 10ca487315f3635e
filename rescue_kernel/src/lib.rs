//! Kernel side of the rescue simulation: builds the canonical world model
//! from a remote GIS, admits components over the connection manager, and
//! drives the per-tick command/update exchange.

pub mod error;
pub mod gateway;
pub mod gis;
pub mod kernel;

pub use error::KernelError;
pub use gateway::{ComponentGateway, SessionTable, SimulatorReply};
pub use gis::RemoteGisModelSource;
pub use kernel::Kernel;
