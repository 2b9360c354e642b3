//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// A caller broke an API precondition.
    ///
    /// These indicate a programming defect in recording code (using a
    /// destroyed resource, adding to an inactive barrier list, overflowing
    /// a fixed-capacity pool), not a runtime condition. They are reported
    /// as errors rather than asserts so checks stay active in release
    /// builds without changing call sites.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Check an API precondition, returning [`GpuError::ContractViolation`]
/// with the formatted message when it does not hold.
macro_rules! contract {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::GpuError::ContractViolation(format!($($arg)+)));
        }
    };
}

pub(crate) use contract;
