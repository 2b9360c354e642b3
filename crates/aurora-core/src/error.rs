//! Error types for the engine.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A fixed-capacity container was asked to grow past its limit
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A slot ID does not refer to a live entry
    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// GPU error
    #[error("GPU error: {0}")]
    Gpu(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
