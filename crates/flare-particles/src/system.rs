//! Live particle system instances: emission, integration and per-instance state

use crate::particle::{Particle, ParticleId, ParticleRegistry};
use crate::rand::EffectRng;
use crate::snapshot;
use crate::template::ParticleSystemTemplate;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flare_core::{ParticleSystemId, Result};
use std::io::{Read, Write};
use std::sync::Arc;

const FLAG_EMITTING: u8 = 1 << 0;
const FLAG_INITIAL_BURST: u8 = 1 << 1;

/// A live emitter built from a [`ParticleSystemTemplate`].
///
/// Instances are owned by the particle system manager. The particles they
/// emit live in the manager's [`ParticleRegistry`]; the system only keeps
/// their handles, oldest first.
#[derive(Debug)]
pub struct ParticleSystem {
    id: ParticleSystemId,
    template: Arc<ParticleSystemTemplate>,
    destroyed: bool,
    saveable: bool,
    master: ParticleSystemId,
    slave: ParticleSystemId,
    particles: Vec<ParticleId>,
    /// World position particles are emitted from
    position: [f32; 3],
    /// Seconds since creation
    age: f32,
    /// Seconds until the next periodic burst
    burst_timer: f32,
    /// Fractional particle accumulator for sub-frame emission
    accumulator: f32,
    emitting: bool,
    initial_burst_done: bool,
    rng: EffectRng,
}

impl ParticleSystem {
    pub fn new(template: Arc<ParticleSystemTemplate>, id: ParticleSystemId) -> Self {
        let burst_timer = template.initial_delay;
        Self {
            id,
            template,
            destroyed: false,
            saveable: true,
            master: ParticleSystemId::NONE,
            slave: ParticleSystemId::NONE,
            particles: Vec::new(),
            position: [0.0; 3],
            age: 0.0,
            burst_timer,
            accumulator: 0.0,
            emitting: true,
            initial_burst_done: false,
            rng: EffectRng::for_system(id),
        }
    }

    pub fn id(&self) -> ParticleSystemId {
        self.id
    }

    pub fn template(&self) -> &Arc<ParticleSystemTemplate> {
        &self.template
    }

    pub fn template_name(&self) -> &str {
        &self.template.name
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Stop emitting; the manager drops the system once its particles expire.
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.emitting = false;
    }

    pub fn is_saveable(&self) -> bool {
        self.saveable
    }

    /// Transient systems (e.g. purely cosmetic client effects) opt out of snapshots
    pub fn set_saveable(&mut self, saveable: bool) {
        self.saveable = saveable;
    }

    /// Whether a snapshot records this system's template and state
    pub fn is_persisted(&self) -> bool {
        self.saveable && !self.destroyed
    }

    pub fn master(&self) -> ParticleSystemId {
        self.master
    }

    pub fn slave(&self) -> ParticleSystemId {
        self.slave
    }

    pub(crate) fn set_master(&mut self, master: ParticleSystemId) {
        self.master = master;
    }

    pub(crate) fn set_slave(&mut self, slave: ParticleSystemId) {
        self.slave = slave;
    }

    pub fn position(&self) -> [f32; 3] {
        self.position
    }

    pub fn set_position(&mut self, position: [f32; 3]) {
        self.position = position;
    }

    pub fn age(&self) -> f32 {
        self.age
    }

    pub fn is_emitting(&self) -> bool {
        self.emitting
    }

    /// Handles of this system's particles, oldest first
    pub fn particles(&self) -> &[ParticleId] {
        &self.particles
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Nothing left to emit and nothing alive
    pub fn is_finished(&self) -> bool {
        !self.emitting && self.particles.is_empty()
    }

    /// Advance emission and integrate this system's particles by `dt` seconds.
    pub(crate) fn step(&mut self, registry: &mut ParticleRegistry, dt: f32) {
        if self.emitting {
            self.age += dt;
            self.emit(registry, dt);
        }
        self.integrate(registry, dt);
    }

    fn emit(&mut self, registry: &mut ParticleRegistry, dt: f32) {
        let t = Arc::clone(&self.template);
        let active = self.age - t.initial_delay;
        if active < 0.0 {
            return;
        }

        if !self.initial_burst_done {
            self.initial_burst_done = true;
            self.spawn_many(registry, t.burst_count);
            if t.one_shot {
                self.emitting = false;
                return;
            }
            self.burst_timer = t.burst_delay;
        } else if t.burst_delay > 0.0 {
            self.burst_timer -= dt;
            if self.burst_timer <= 0.0 {
                // All bursts that fell due this frame, in one go
                let due = (-self.burst_timer / t.burst_delay).floor() + 1.0;
                let room = t.max_particles.saturating_sub(self.particles.len());
                let wanted = (due as u64).saturating_mul(u64::from(t.burst_count));
                self.spawn_many(registry, wanted.min(room as u64) as u32);
                self.burst_timer += due * t.burst_delay;
                if self.burst_timer <= 0.0 {
                    // Delay below f32 resolution of the timer
                    self.burst_timer = t.burst_delay;
                }
            }
        }

        if t.emission_rate > 0.0 {
            self.accumulator += t.emission_rate * dt;
            let count = self.accumulator as u32;
            self.accumulator -= count as f32;
            self.spawn_many(registry, count);
        }

        if t.system_lifetime > 0.0 && active >= t.system_lifetime {
            self.emitting = false;
        }
    }

    fn spawn_many(&mut self, registry: &mut ParticleRegistry, count: u32) {
        for _ in 0..count {
            if self.particles.len() >= self.template.max_particles {
                return;
            }
            let t = &self.template;
            let mut p = Particle::new(self.id, t.priority);
            let speed = self.rng.range(t.speed_min, t.speed_max);
            let dir = self.rng.spread_direction(t.direction, t.spread);
            p.position = self.position;
            p.velocity = [dir[0] * speed, dir[1] * speed, dir[2] * speed];
            p.lifetime = self.rng.range(t.lifetime_min, t.lifetime_max);
            p.size = t.size_start;
            p.color = t.color_start;

            let id = registry.spawn(p);
            registry.add_particle(id, t.priority);
            self.particles.push(id);
        }
    }

    fn integrate(&mut self, registry: &mut ParticleRegistry, dt: f32) {
        let t = &self.template;
        let drag = (1.0 - t.damping * dt).max(0.0);

        self.particles.retain(|&id| {
            let Some(p) = registry.get_mut(id) else {
                return false;
            };
            p.age += dt;
            if p.expired() {
                registry.release(id);
                return false;
            }
            for axis in 0..3 {
                p.velocity[axis] += t.gravity[axis] * dt;
                if t.damping > 0.0 {
                    p.velocity[axis] *= drag;
                }
                p.position[axis] += p.velocity[axis] * dt;
            }
            let k = p.age_ratio();
            p.size = t.size_start + (t.size_end - t.size_start) * k;
            for c in 0..4 {
                p.color[c] = t.color_start[c] + (t.color_end[c] - t.color_start[c]) * k;
            }
            true
        });
    }

    /// Track a particle spawned on this system's behalf by the manager
    pub(crate) fn adopt_particle(&mut self, id: ParticleId) {
        self.particles.push(id);
    }

    /// Drop a handle the registry no longer owns (evicted elsewhere)
    pub(crate) fn forget_particle(&mut self, id: ParticleId) {
        self.particles.retain(|p| *p != id);
    }

    /// Free every particle this system emitted
    pub(crate) fn release_particles(&mut self, registry: &mut ParticleRegistry) {
        for id in self.particles.drain(..) {
            registry.release(id);
        }
    }

    /// Serialize this instance and its particles.
    pub fn write_state<W: Write>(&self, registry: &ParticleRegistry, w: &mut W) -> Result<()> {
        w.write_u32::<LittleEndian>(self.id.raw())?;
        w.write_u32::<LittleEndian>(self.master.raw())?;
        w.write_u32::<LittleEndian>(self.slave.raw())?;
        snapshot::write_vec3(w, self.position)?;
        w.write_f32::<LittleEndian>(self.age)?;
        w.write_f32::<LittleEndian>(self.burst_timer)?;
        w.write_f32::<LittleEndian>(self.accumulator)?;
        let mut flags = 0;
        if self.emitting {
            flags |= FLAG_EMITTING;
        }
        if self.initial_burst_done {
            flags |= FLAG_INITIAL_BURST;
        }
        w.write_u8(flags)?;
        w.write_u32::<LittleEndian>(self.rng.state())?;

        let alive: Vec<&Particle> = self
            .particles
            .iter()
            .filter_map(|id| registry.get(*id))
            .collect();
        w.write_u32::<LittleEndian>(alive.len() as u32)?;
        for p in alive {
            snapshot::write_particle(w, p)?;
        }
        Ok(())
    }

    /// Restore state written by [`write_state`](Self::write_state) into a freshly
    /// constructed instance, re-registering its particles.
    ///
    /// Returns the id the instance had when it was saved. The instance keeps
    /// its own (newly allocated) id; master/slave links still hold saved ids
    /// until the manager remaps them.
    pub fn read_state<R: Read>(
        &mut self,
        registry: &mut ParticleRegistry,
        r: &mut R,
    ) -> Result<ParticleSystemId> {
        let saved_id = ParticleSystemId(r.read_u32::<LittleEndian>()?);
        self.master = ParticleSystemId(r.read_u32::<LittleEndian>()?);
        self.slave = ParticleSystemId(r.read_u32::<LittleEndian>()?);
        self.position = snapshot::read_vec3(r)?;
        self.age = r.read_f32::<LittleEndian>()?;
        self.burst_timer = r.read_f32::<LittleEndian>()?;
        self.accumulator = r.read_f32::<LittleEndian>()?;
        let flags = r.read_u8()?;
        self.emitting = flags & FLAG_EMITTING != 0;
        self.initial_burst_done = flags & FLAG_INITIAL_BURST != 0;
        self.rng = EffectRng::from_state(r.read_u32::<LittleEndian>()?);

        self.release_particles(registry);
        let count = r.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            let (p, registered) = snapshot::read_particle(r, self.id)?;
            let priority = p.priority();
            let id = registry.spawn(p);
            if registered {
                registry.add_particle(id, priority);
            }
            self.particles.push(id);
        }
        Ok(saved_id)
    }
}
