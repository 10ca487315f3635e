//! Kernel-side error types.

use rescue_core::ConnectionError;
use thiserror::Error;

/// Errors raised while bootstrapping or running the kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Dialing or talking to the GIS service failed.
    #[error("Couldn't connect to GIS: {0}")]
    Gis(#[source] ConnectionError),

    /// The GIS connection died before any reply arrived.
    #[error("Interrupted while connecting to GIS")]
    GisInterrupted,
}
