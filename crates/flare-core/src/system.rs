//! Runtime system trait

use crate::Result;

/// A system that can be ticked by the host game loop
///
/// Systems are updated in registration order, once per simulation step. All
/// calls happen on the simulation thread; a system must produce identical
/// results for identical input sequences.
pub trait RuntimeSystem {
    /// Called once before the first update
    fn initialize(&mut self) -> Result<()>;

    /// Called once per simulation step
    fn update(&mut self, dt: f32) -> Result<()>;

    /// Called when the system is being shut down
    fn shutdown(&mut self) -> Result<()>;

    /// Human-readable name for this system
    fn name(&self) -> &str;
}
