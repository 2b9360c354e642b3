//! Core types and traits for the Aurora engine.
//!
//! This crate provides the foundational pieces shared across the engine:
//! - Engine-wide error types
//! - The fixed-capacity slot arena backing pooled GPU objects

pub mod error;
pub mod pool;

pub use error::{Error, Result};
pub use pool::{SlotId, SlotPool};
