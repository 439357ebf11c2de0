//! Deterministic per-system random stream.
//!
//! Every particle system owns one generator seeded from its id, and the state
//! travels through snapshots, so emission replays identically on every peer.

use flare_core::ParticleSystemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectRng {
    state: u32,
}

impl EffectRng {
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Seed derived from a system id (murmur3 finalizer, so adjacent ids diverge)
    pub fn for_system(id: ParticleSystemId) -> Self {
        let mut h = id.raw() ^ 0x9E37_79B9;
        h ^= h >> 16;
        h = h.wrapping_mul(0x85EB_CA6B);
        h ^= h >> 13;
        h = h.wrapping_mul(0xC2B2_AE35);
        h ^= h >> 16;
        Self::new(h)
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    /// Rebuild a generator from a saved state
    pub fn from_state(state: u32) -> Self {
        Self::new(state)
    }

    fn next_u32(&mut self) -> u32 {
        // xorshift32
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Float in [0, 1)
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Float in [min, max)
    pub fn range(&mut self, min: f32, max: f32) -> f32 {
        min + self.next_f32() * (max - min)
    }

    /// Unit vector jittered around `base`. Jitter grows with `spread_deg` and
    /// saturates at 90 degrees.
    pub fn spread_direction(&mut self, base: [f32; 3], spread_deg: f32) -> [f32; 3] {
        let base = normalize(base);
        if spread_deg <= 0.0 {
            return base;
        }
        let radius = spread_deg.min(90.0) / 90.0;
        let jitter = loop {
            let v = [
                self.range(-1.0, 1.0),
                self.range(-1.0, 1.0),
                self.range(-1.0, 1.0),
            ];
            if v[0] * v[0] + v[1] * v[1] + v[2] * v[2] <= 1.0 {
                break v;
            }
        };
        normalize([
            base[0] + jitter[0] * radius,
            base[1] + jitter[1] * radius,
            base[2] + jitter[2] * radius,
        ])
    }
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len < 1e-6 {
        return [0.0, 1.0, 0.0];
    }
    [v[0] / len, v[1] / len, v[2] / len]
}
