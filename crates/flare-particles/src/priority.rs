//! Particle priority levels. The ordinal doubles as the registry bucket index.

use flare_core::{FlareError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority of a particle system's particles, lowest first.
///
/// When the particle budget is exceeded, particles are evicted starting from
/// the lowest priority bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ParticlePriority {
    WeaponExplosion = 0,
    Scorchmark,
    DustTrail,
    Buildup,
    DebrisTrail,
    UnitDamageFx,
    DeathExplosion,
    SemiConstant,
    Constant,
    WeaponTrail,
    AreaEffect,
    Critical,
    AlwaysRender,
}

impl ParticlePriority {
    /// Number of priority buckets
    pub const COUNT: usize = 13;

    pub const LOWEST: ParticlePriority = ParticlePriority::WeaponExplosion;
    pub const HIGHEST: ParticlePriority = ParticlePriority::AlwaysRender;

    pub const ALL: [ParticlePriority; Self::COUNT] = [
        ParticlePriority::WeaponExplosion,
        ParticlePriority::Scorchmark,
        ParticlePriority::DustTrail,
        ParticlePriority::Buildup,
        ParticlePriority::DebrisTrail,
        ParticlePriority::UnitDamageFx,
        ParticlePriority::DeathExplosion,
        ParticlePriority::SemiConstant,
        ParticlePriority::Constant,
        ParticlePriority::WeaponTrail,
        ParticlePriority::AreaEffect,
        ParticlePriority::Critical,
        ParticlePriority::AlwaysRender,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Configuration-file spelling
    pub fn as_str(self) -> &'static str {
        match self {
            ParticlePriority::WeaponExplosion => "weapon_explosion",
            ParticlePriority::Scorchmark => "scorchmark",
            ParticlePriority::DustTrail => "dust_trail",
            ParticlePriority::Buildup => "buildup",
            ParticlePriority::DebrisTrail => "debris_trail",
            ParticlePriority::UnitDamageFx => "unit_damage_fx",
            ParticlePriority::DeathExplosion => "death_explosion",
            ParticlePriority::SemiConstant => "semi_constant",
            ParticlePriority::Constant => "constant",
            ParticlePriority::WeaponTrail => "weapon_trail",
            ParticlePriority::AreaEffect => "area_effect",
            ParticlePriority::Critical => "critical",
            ParticlePriority::AlwaysRender => "always_render",
        }
    }
}

impl Default for ParticlePriority {
    fn default() -> Self {
        ParticlePriority::LOWEST
    }
}

impl FromStr for ParticlePriority {
    type Err = FlareError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| FlareError::UnknownPriority(s.to_string()))
    }
}

impl fmt::Display for ParticlePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
