//! Flare Core - Foundational types for the Flare effects runtime
//!
//! This crate provides the types that the other Flare crates depend on:
//! - `ParticleSystemId` / `IdCounter` - deterministic system identifiers
//! - `RuntimeSystem` - trait for systems ticked by the host loop
//! - Error types and Result alias

mod error;
mod id;
mod system;

pub use error::{FlareError, Result};
pub use id::{IdCounter, ParticleSystemId};
pub use system::RuntimeSystem;
