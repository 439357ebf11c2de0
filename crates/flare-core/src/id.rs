//! Particle system identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// A process-unique particle system identifier.
///
/// Identifiers are handed out by an [`IdCounter`] owned by the particle system
/// manager, so two managers never share a sequence and replays stay lockstep.
/// `ParticleSystemId::NONE` is never assigned to a live system.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticleSystemId(pub u32);

impl ParticleSystemId {
    /// The "no system" sentinel
    pub const NONE: ParticleSystemId = ParticleSystemId(0);

    /// Create a ParticleSystemId from a raw value (for deserialization/testing)
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw u32 value
    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Debug for ParticleSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticleSystemId({})", self.0)
    }
}

impl fmt::Display for ParticleSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source. Starts at (and resets to) `NONE`; every allocation
/// pre-increments, so the first id handed out is 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdCounter {
    last: ParticleSystemId,
}

impl IdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id.
    ///
    /// Past `u32::MAX` the counter wraps to 1. Ids are only unique while fewer
    /// than `u32::MAX` allocations happen between resets; a session is assumed
    /// never to get near that.
    pub fn allocate(&mut self) -> ParticleSystemId {
        self.last = ParticleSystemId(self.last.0.wrapping_add(1));
        if self.last.is_none() {
            // Skip the sentinel on wrap-around
            self.last = ParticleSystemId(1);
        }
        self.last
    }

    /// The most recently allocated id (`NONE` if nothing was allocated)
    pub fn last(&self) -> ParticleSystemId {
        self.last
    }

    /// Overwrite the counter (snapshot restore)
    pub fn restore(&mut self, last: ParticleSystemId) {
        self.last = last;
    }

    pub fn reset(&mut self) {
        self.last = ParticleSystemId::NONE;
    }
}
