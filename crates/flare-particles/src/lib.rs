//! Flare Particles - deterministic particle system manager
//!
//! Owns every live particle system and particle of a simulation:
//! - Named templates loaded from TOML
//! - Sequential, snapshot-stable system IDs
//! - Priority-bucketed particle registry with oldest-first eviction
//! - Binary save/restore of all saveable systems

pub mod config;
pub mod manager;
pub mod particle;
pub mod priority;
pub mod rand;
pub mod snapshot;
pub mod system;
pub mod template;

pub use config::ManagerConfig;
pub use manager::ParticleSystemManager;
pub use particle::{BucketIter, Particle, ParticleId, ParticleRegistry};
pub use priority::ParticlePriority;
pub use system::ParticleSystem;
pub use template::{ParticleSystemTemplate, TemplateStore};
