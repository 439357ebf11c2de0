//! The particle system manager: owns every live particle system and particle,
//! enforces the global particle budget and saves/restores the whole state.

use crate::config::ManagerConfig;
use crate::particle::{Particle, ParticleId, ParticleRegistry};
use crate::priority::ParticlePriority;
use crate::snapshot;
use crate::system::ParticleSystem;
use crate::template::{ParticleSystemTemplate, TemplateStore};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flare_core::{FlareError, IdCounter, ParticleSystemId, Result, RuntimeSystem};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

/// Registry of all particle systems and particles.
///
/// Systems are kept in creation order, which is also the order they are
/// updated, swept and written to snapshots. Everything here is deterministic
/// for a given call sequence so peers in a lockstep simulation stay in sync.
pub struct ParticleSystemManager {
    config: ManagerConfig,
    templates: TemplateStore,
    systems: Vec<ParticleSystem>,
    particles: ParticleRegistry,
    ids: IdCounter,
    initialized: bool,
}

impl ParticleSystemManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            templates: TemplateStore::new(),
            systems: Vec::new(),
            particles: ParticleRegistry::new(),
            ids: IdCounter::new(),
            initialized: false,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Load templates from `config.template_path` and clear every bucket.
    pub fn init(&mut self) -> Result<()> {
        let store = TemplateStore::load_from_file(&self.config.template_path)?;
        self.init_with_templates(store);
        Ok(())
    }

    /// Like [`init`](Self::init) with an already built template store.
    pub fn init_with_templates(&mut self, templates: TemplateStore) {
        self.templates = templates;
        self.particles.clear_buckets();
        self.initialized = true;
        info!(
            "particle system manager ready with {} template(s)",
            self.templates.len()
        );
    }

    /// Destroy every system and particle and return the ID counter to `NONE`.
    pub fn reset(&mut self) {
        let systems = self.systems.len();
        while let Some(id) = self.systems.first().map(|s| s.id()) {
            if self.remove_particle_system(id) == 0 {
                // NONE-id entry added from outside; nothing else can match it
                let mut sys = self.systems.remove(0);
                sys.release_particles(&mut self.particles);
            }
        }
        self.particles.clear();
        self.ids.reset();
        if systems > 0 {
            info!("particle system manager reset, {systems} system(s) destroyed");
        }
    }

    /// Step every system, sweep finished ones and enforce the particle budget.
    pub fn update(&mut self, dt: f32) {
        for sys in &mut self.systems {
            sys.step(&mut self.particles, dt);
        }

        let finished: Vec<ParticleSystemId> = self
            .systems
            .iter()
            .filter(|s| s.is_finished())
            .map(|s| s.id())
            .collect();
        for id in finished {
            self.remove_particle_system(id);
        }

        let budget = self.config.max_particles;
        let count = self.particles.count();
        if count > budget {
            let excess = u32::try_from(count - budget).unwrap_or(u32::MAX);
            let removed = self.remove_oldest_particles(excess, self.config.eviction_ceiling);
            if removed < excess {
                debug!(
                    "particle budget exceeded by {} after eviction",
                    excess - removed
                );
            }
        }
    }

    // ── templates ──

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn find_template(&self, name: &str) -> Option<&Arc<ParticleSystemTemplate>> {
        self.templates.find(name)
    }

    // ── particle systems ──

    /// Hand out the next unique system id. Creation and snapshot restore both
    /// allocate through here.
    pub fn allocate_system_id(&mut self) -> ParticleSystemId {
        self.ids.allocate()
    }

    /// Most recently allocated system id (`NONE` after reset)
    pub fn last_system_id(&self) -> ParticleSystemId {
        self.ids.last()
    }

    /// Create a system from `template`. Returns `None` only if no template
    /// was given.
    ///
    /// With `allow_slaves`, a template naming a `slave_system` also creates
    /// that system (one level deep) and links the pair.
    pub fn create_particle_system(
        &mut self,
        template: Option<&Arc<ParticleSystemTemplate>>,
        allow_slaves: bool,
    ) -> Option<ParticleSystemId> {
        let template = template?;
        let id = self.allocate_system_id();
        self.systems.push(ParticleSystem::new(Arc::clone(template), id));
        debug!("created particle system {id} from '{}'", template.name);

        if allow_slaves {
            if let Some(name) = &template.slave_system {
                match self.templates.find(name).cloned() {
                    Some(slave_template) => {
                        if let Some(slave) = self.create_particle_system(Some(&slave_template), false) {
                            self.link_slave(id, slave);
                        }
                    }
                    None => warn!(
                        "particle system '{}' names unknown slave template '{name}'",
                        template.name
                    ),
                }
            }
        }

        Some(id)
    }

    /// [`create_particle_system`](Self::create_particle_system) by template name
    pub fn create_particle_system_by_name(
        &mut self,
        name: &str,
        allow_slaves: bool,
    ) -> Option<ParticleSystemId> {
        let template = self.templates.find(name).cloned();
        self.create_particle_system(template.as_ref(), allow_slaves)
    }

    fn link_slave(&mut self, master: ParticleSystemId, slave: ParticleSystemId) {
        let mut offset = [0.0; 3];
        if let Some(m) = self.find_particle_system_mut(master) {
            m.set_slave(slave);
            offset = m.template().slave_offset;
        }
        if let Some(s) = self.find_particle_system_mut(slave) {
            s.set_master(master);
            s.set_position(offset);
        }
    }

    /// First system with `id`, in creation order. `NONE` never matches.
    pub fn find_particle_system(&self, id: ParticleSystemId) -> Option<&ParticleSystem> {
        if id.is_none() {
            return None;
        }
        self.systems.iter().find(|s| s.id() == id)
    }

    pub fn find_particle_system_mut(&mut self, id: ParticleSystemId) -> Option<&mut ParticleSystem> {
        if id.is_none() {
            return None;
        }
        self.systems.iter_mut().find(|s| s.id() == id)
    }

    /// Move a system, carrying its slave along at the template's offset
    pub fn set_system_position(&mut self, id: ParticleSystemId, position: [f32; 3]) {
        let Some(sys) = self.find_particle_system_mut(id) else {
            return;
        };
        sys.set_position(position);
        let slave = sys.slave();
        let offset = sys.template().slave_offset;
        if let Some(s) = self.find_particle_system_mut(slave) {
            s.set_position([
                position[0] + offset[0],
                position[1] + offset[1],
                position[2] + offset[2],
            ]);
        }
    }

    /// Take ownership of an externally constructed system. Its id should
    /// come from [`allocate_system_id`](Self::allocate_system_id).
    pub fn add_particle_system(&mut self, system: ParticleSystem) {
        self.systems.push(system);
    }

    /// Detach and destroy every registered system with `id`, releasing its
    /// particles and clearing its partner's master/slave link.
    /// Returns how many entries were removed (0 if none were registered).
    pub fn remove_particle_system(&mut self, id: ParticleSystemId) -> usize {
        if id.is_none() {
            return 0;
        }
        let mut removed = 0;
        while let Some(pos) = self.systems.iter().position(|s| s.id() == id) {
            let mut sys = self.systems.remove(pos);
            sys.release_particles(&mut self.particles);
            removed += 1;
        }
        if removed > 0 {
            for other in &mut self.systems {
                if other.master() == id {
                    other.set_master(ParticleSystemId::NONE);
                }
                if other.slave() == id {
                    other.set_slave(ParticleSystemId::NONE);
                }
            }
            debug!("removed particle system {id}");
        }
        removed
    }

    /// Mark a system destroyed: it stops emitting, is left out of snapshots
    /// and is removed once its particles expire. Returns false for unknown ids.
    pub fn destroy_particle_system(&mut self, id: ParticleSystemId) -> bool {
        match self.find_particle_system_mut(id) {
            Some(sys) => {
                sys.destroy();
                true
            }
            None => false,
        }
    }

    /// Registered systems in creation order
    pub fn systems(&self) -> impl Iterator<Item = &ParticleSystem> {
        self.systems.iter()
    }

    pub fn particle_system_count(&self) -> usize {
        self.systems.len()
    }

    // ── particles ──

    pub fn particles(&self) -> &ParticleRegistry {
        &self.particles
    }

    pub fn particle(&self, id: ParticleId) -> Option<&Particle> {
        self.particles.get(id)
    }

    /// Number of particles currently linked into a priority bucket
    pub fn particle_count(&self) -> usize {
        self.particles.count()
    }

    /// Allocate `particle` for `system` and register it in its priority bucket.
    /// Returns `None` if the system is not registered.
    pub fn spawn_particle(
        &mut self,
        system: ParticleSystemId,
        mut particle: Particle,
    ) -> Option<ParticleId> {
        let sys = self
            .systems
            .iter_mut()
            .find(|s| !system.is_none() && s.id() == system)?;
        particle.system = system;
        let priority = particle.priority();
        let id = self.particles.spawn(particle);
        self.particles.add_particle(id, priority);
        sys.adopt_particle(id);
        Some(id)
    }

    /// Link a particle into `priority`'s bucket; no-op if already linked.
    pub fn add_particle(&mut self, particle: ParticleId, priority: ParticlePriority) {
        self.particles.add_particle(particle, priority);
    }

    /// Unlink a particle from its bucket; no-op if not linked.
    pub fn remove_particle(&mut self, particle: ParticleId) {
        self.particles.remove_particle(particle);
    }

    /// Free a particle entirely, detaching it from its bucket and its system.
    pub fn destroy_particle(&mut self, particle: ParticleId) -> bool {
        let Some(p) = self.particles.release(particle) else {
            return false;
        };
        if let Some(sys) = self.systems.iter_mut().find(|s| s.id() == p.system) {
            sys.forget_particle(particle);
        }
        true
    }

    /// Destroy up to `count` of the oldest particles whose priority is below
    /// `ceiling`, lowest priority first. Returns how many were destroyed; this
    /// is less than `count` when nothing evictable remains.
    pub fn remove_oldest_particles(&mut self, count: u32, ceiling: ParticlePriority) -> u32 {
        let mut removed = 0;
        while removed < count && self.particles.count() > 0 {
            let Some(oldest) = self.particles.oldest_below(ceiling) else {
                break;
            };
            self.destroy_particle(oldest);
            removed += 1;
        }
        removed
    }

    // ── snapshots ──

    /// Write the id counter and every system to `w`. Destroyed and
    /// non-saveable systems are written as empty slots.
    pub fn write_snapshot<W: Write>(&self, w: &mut W) -> Result<()> {
        snapshot::write_version(w)?;
        w.write_u32::<LittleEndian>(self.ids.last().raw())?;
        w.write_u32::<LittleEndian>(self.systems.len() as u32)?;
        for sys in &self.systems {
            if sys.is_persisted() {
                snapshot::write_name(w, sys.template_name())?;
                sys.write_state(&self.particles, w)?;
            } else {
                snapshot::write_name(w, "")?;
            }
        }
        Ok(())
    }

    /// Recreate the systems recorded by [`write_snapshot`](Self::write_snapshot).
    ///
    /// Call [`reset`](Self::reset) first: restore adds to whatever is already
    /// registered and overwrites the id counter. Restored systems get fresh ids
    /// above the saved counter; master/slave links are remapped to them.
    ///
    /// On error the systems restored before the failing entry stay in place
    /// (links remapped). The failing entry itself is discarded along with any
    /// particles it had already read. A name missing from the template store
    /// fails with [`FlareError::TemplateNotFound`].
    pub fn read_snapshot<R: Read>(&mut self, r: &mut R) -> Result<()> {
        snapshot::read_version(r)?;
        let last = ParticleSystemId(r.read_u32::<LittleEndian>()?);
        let count = r.read_u32::<LittleEndian>()?;

        if !self.systems.is_empty() {
            warn!(
                "restoring particle snapshot into a manager with {} live system(s); reset() was not called",
                self.systems.len()
            );
        }
        self.ids.restore(last);

        let first = self.systems.len();
        let mut remap: BTreeMap<ParticleSystemId, ParticleSystemId> = BTreeMap::new();
        let restored = self.read_systems(r, count, &mut remap);

        let lookup = |old: ParticleSystemId| remap.get(&old).copied().unwrap_or_default();
        for sys in &mut self.systems[first..] {
            sys.set_master(lookup(sys.master()));
            sys.set_slave(lookup(sys.slave()));
        }
        restored?;

        info!(
            "restored {} particle system(s) from snapshot ({} slot(s))",
            self.systems.len() - first,
            count
        );
        Ok(())
    }

    fn read_systems<R: Read>(
        &mut self,
        r: &mut R,
        count: u32,
        remap: &mut BTreeMap<ParticleSystemId, ParticleSystemId>,
    ) -> Result<()> {
        for _ in 0..count {
            let name = snapshot::read_name(r)?;
            if name.is_empty() {
                continue;
            }
            let template = self
                .templates
                .find(&name)
                .cloned()
                .ok_or(FlareError::TemplateNotFound(name))?;
            let id = self.allocate_system_id();
            let mut sys = ParticleSystem::new(template, id);
            match sys.read_state(&mut self.particles, r) {
                Ok(saved) => {
                    remap.insert(saved, id);
                    self.systems.push(sys);
                }
                Err(e) => {
                    sys.release_particles(&mut self.particles);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl Default for ParticleSystemManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl Drop for ParticleSystemManager {
    fn drop(&mut self) {
        self.reset();
    }
}

impl RuntimeSystem for ParticleSystemManager {
    fn initialize(&mut self) -> Result<()> {
        if !self.initialized {
            self.init()?;
        }
        Ok(())
    }

    fn update(&mut self, dt: f32) -> Result<()> {
        ParticleSystemManager::update(self, dt);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.reset();
        Ok(())
    }

    fn name(&self) -> &str {
        "particles"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LOW: ParticlePriority = ParticlePriority::WeaponExplosion;
    const MEDIUM: ParticlePriority = ParticlePriority::DustTrail;
    const HIGH: ParticlePriority = ParticlePriority::Critical;

    fn quiet(name: &str) -> ParticleSystemTemplate {
        let mut t = ParticleSystemTemplate::named(name);
        t.emission_rate = 0.0;
        t
    }

    fn manager() -> ParticleSystemManager {
        let mut store = TemplateStore::new();
        store.insert(quiet("Spark"));
        let mut smoke = quiet("Smoke");
        smoke.priority = MEDIUM;
        smoke.slave_system = Some("Spark".into());
        smoke.slave_offset = [0.0, 2.0, 0.0];
        store.insert(smoke);
        let mut fire = quiet("Fire");
        fire.emission_rate = 10.0;
        fire.lifetime_min = 5.0;
        fire.lifetime_max = 5.0;
        store.insert(fire);

        let mut mgr = ParticleSystemManager::default();
        mgr.init_with_templates(store);
        mgr
    }

    fn emit(mgr: &mut ParticleSystemManager, sys: ParticleSystemId, priority: ParticlePriority) -> ParticleId {
        mgr.spawn_particle(sys, Particle::new(sys, priority)).unwrap()
    }

    fn snapshot_bytes(mgr: &ParticleSystemManager) -> Vec<u8> {
        let mut buf = Vec::new();
        mgr.write_snapshot(&mut buf).unwrap();
        buf
    }

    #[test]
    fn create_assigns_sequential_ids_and_reset_restarts_them() {
        let mut mgr = manager();
        let ids: Vec<_> = (0..3)
            .map(|_| mgr.create_particle_system_by_name("Spark", true).unwrap())
            .collect();
        assert_eq!(ids, vec![ParticleSystemId(1), ParticleSystemId(2), ParticleSystemId(3)]);
        assert_eq!(mgr.particle_system_count(), 3);

        mgr.reset();
        assert_eq!(mgr.particle_system_count(), 0);
        assert_eq!(mgr.particle_count(), 0);
        assert!(mgr.last_system_id().is_none());
        assert_eq!(
            mgr.create_particle_system_by_name("Spark", true),
            Some(ParticleSystemId(1))
        );
    }

    #[test]
    fn create_from_absent_template_returns_none() {
        let mut mgr = manager();
        assert_eq!(mgr.create_particle_system(None, true), None);
        assert_eq!(mgr.create_particle_system_by_name("spark", true), None);
        assert_eq!(mgr.particle_system_count(), 0);
        assert!(mgr.last_system_id().is_none());
    }

    #[test]
    fn slave_systems_cascade_one_level() {
        let mut mgr = manager();
        let master = mgr.create_particle_system_by_name("Smoke", true).unwrap();
        assert_eq!(mgr.particle_system_count(), 2);

        let slave = mgr.find_particle_system(master).unwrap().slave();
        assert_eq!(slave, ParticleSystemId(2));
        let s = mgr.find_particle_system(slave).unwrap();
        assert_eq!(s.master(), master);
        assert_eq!(s.template_name(), "Spark");

        mgr.set_system_position(master, [1.0, 0.0, 0.0]);
        assert_eq!(mgr.find_particle_system(slave).unwrap().position(), [1.0, 2.0, 0.0]);

        let lone = mgr.create_particle_system_by_name("Smoke", false).unwrap();
        assert!(mgr.find_particle_system(lone).unwrap().slave().is_none());
        assert_eq!(mgr.particle_system_count(), 3);
    }

    #[test]
    fn find_ignores_none_and_unknown_ids() {
        let mut mgr = manager();
        let id = mgr.create_particle_system_by_name("Spark", false).unwrap();
        assert!(mgr.find_particle_system(id).is_some());
        assert!(mgr.find_particle_system(ParticleSystemId::NONE).is_none());
        assert!(mgr.find_particle_system(ParticleSystemId(99)).is_none());
    }

    #[test]
    fn remove_releases_particles_and_unlinks_partner() {
        let mut mgr = manager();
        let master = mgr.create_particle_system_by_name("Smoke", true).unwrap();
        let slave = mgr.find_particle_system(master).unwrap().slave();
        emit(&mut mgr, master, MEDIUM);
        emit(&mut mgr, master, MEDIUM);
        emit(&mut mgr, slave, LOW);

        assert_eq!(mgr.remove_particle_system(master), 1);
        assert_eq!(mgr.particle_count(), 1);
        assert_eq!(mgr.particles().live(), 1);
        assert!(mgr.find_particle_system(slave).unwrap().master().is_none());

        assert_eq!(mgr.remove_particle_system(master), 0);
        assert_eq!(mgr.particle_system_count(), 1);
    }

    #[test]
    fn remove_drops_duplicate_entries() {
        let mut mgr = manager();
        let template = mgr.find_template("Spark").cloned().unwrap();
        let id = mgr.allocate_system_id();
        mgr.add_particle_system(ParticleSystem::new(Arc::clone(&template), id));
        mgr.add_particle_system(ParticleSystem::new(template, id));
        assert_eq!(mgr.particle_system_count(), 2);

        assert_eq!(mgr.remove_particle_system(id), 2);
        assert_eq!(mgr.particle_system_count(), 0);
    }

    #[test]
    fn manager_add_and_remove_particle_are_idempotent() {
        let mut mgr = manager();
        let sys = mgr.create_particle_system_by_name("Spark", false).unwrap();
        let p = emit(&mut mgr, sys, LOW);
        assert_eq!(mgr.particle_count(), 1);

        mgr.add_particle(p, LOW);
        assert_eq!(mgr.particle_count(), 1);

        mgr.remove_particle(p);
        mgr.remove_particle(p);
        assert_eq!(mgr.particle_count(), 0);
        assert!(mgr.particle(p).is_some());

        mgr.add_particle(p, HIGH);
        assert_eq!(mgr.particles().head(HIGH), Some(p));
        mgr.particles().check_invariants().unwrap();
    }

    #[test]
    fn eviction_takes_oldest_lowest_priority_first() {
        let mut mgr = manager();
        let sys = mgr.create_particle_system_by_name("Spark", false).unwrap();
        let low_a = emit(&mut mgr, sys, LOW);
        let low_b = emit(&mut mgr, sys, LOW);
        let medium = emit(&mut mgr, sys, MEDIUM);
        let high_a = emit(&mut mgr, sys, HIGH);
        let high_b = emit(&mut mgr, sys, HIGH);

        assert_eq!(mgr.remove_oldest_particles(2, HIGH), 2);
        assert_eq!(mgr.particle_count(), 3);
        assert!(mgr.particle(low_a).is_none());
        assert!(mgr.particle(low_b).is_none());
        for kept in [medium, high_a, high_b] {
            assert!(mgr.particle(kept).is_some());
        }
        assert_eq!(mgr.find_particle_system(sys).unwrap().particle_count(), 3);
        mgr.particles().check_invariants().unwrap();
    }

    #[test]
    fn eviction_never_crosses_the_ceiling() {
        let mut mgr = manager();
        let sys = mgr.create_particle_system_by_name("Spark", false).unwrap();
        emit(&mut mgr, sys, LOW);
        emit(&mut mgr, sys, MEDIUM);
        emit(&mut mgr, sys, HIGH);

        assert_eq!(mgr.remove_oldest_particles(10, HIGH), 2);
        assert_eq!(mgr.particle_count(), 1);
        assert_eq!(mgr.particles().bucket_len(HIGH), 1);

        assert_eq!(mgr.remove_oldest_particles(10, LOW), 0);
        assert_eq!(mgr.remove_oldest_particles(0, ParticlePriority::HIGHEST), 0);
        assert_eq!(mgr.particle_count(), 1);
    }

    #[test]
    fn eviction_on_empty_registry_removes_nothing() {
        let mut mgr = manager();
        assert_eq!(mgr.remove_oldest_particles(5, ParticlePriority::HIGHEST), 0);
    }

    #[test]
    fn update_enforces_budget() {
        let mut mgr = ParticleSystemManager::new(ManagerConfig {
            max_particles: 4,
            eviction_ceiling: HIGH,
            ..ManagerConfig::default()
        });
        let mut store = TemplateStore::new();
        let mut fire = quiet("Fire");
        fire.emission_rate = 10.0;
        fire.lifetime_min = 5.0;
        fire.lifetime_max = 5.0;
        store.insert(fire);
        mgr.init_with_templates(store);

        let sys = mgr.create_particle_system_by_name("Fire", false).unwrap();
        for _ in 0..10 {
            mgr.update(0.1);
        }
        assert_eq!(mgr.particle_count(), 4);
        assert_eq!(mgr.find_particle_system(sys).unwrap().particle_count(), 4);
        mgr.particles().check_invariants().unwrap();
    }

    #[test]
    fn update_sweeps_finished_and_destroyed_systems() {
        let mut mgr = manager();
        let fire = mgr.create_particle_system_by_name("Fire", false).unwrap();
        let idle = mgr.create_particle_system_by_name("Spark", false).unwrap();
        mgr.update(0.5);
        assert!(mgr.particle_count() > 0);

        assert!(mgr.destroy_particle_system(fire));
        assert!(!mgr.destroy_particle_system(ParticleSystemId(42)));
        mgr.update(0.5);
        assert!(mgr.find_particle_system(fire).is_some());

        for _ in 0..12 {
            mgr.update(0.5);
        }
        assert!(mgr.find_particle_system(fire).is_none());
        assert_eq!(mgr.particle_count(), 0);
        // Still emitting (rate 0, no lifetime), so never finished
        assert!(mgr.find_particle_system(idle).is_some());
    }

    #[test]
    fn snapshot_header_layout() {
        let mut mgr = manager();
        mgr.create_particle_system_by_name("Spark", false);
        let buf = snapshot_bytes(&mgr);

        assert_eq!(buf[0], snapshot::SNAPSHOT_VERSION);
        assert_eq!(&buf[1..5], &1u32.to_le_bytes());
        assert_eq!(&buf[5..9], &1u32.to_le_bytes());
        assert_eq!(&buf[9..11], &5u16.to_le_bytes());
        assert_eq!(&buf[11..16], b"Spark");
    }

    #[test]
    fn snapshot_round_trip_skips_transient_and_destroyed() {
        let mut mgr = manager();
        mgr.create_particle_system_by_name("Fire", false);
        let b = mgr.create_particle_system_by_name("Spark", false).unwrap();
        mgr.create_particle_system_by_name("Fire", false);
        let d = mgr.create_particle_system_by_name("Spark", false).unwrap();
        mgr.find_particle_system_mut(b).unwrap().set_saveable(false);
        mgr.update(0.3);
        mgr.destroy_particle_system(d);
        let live_particles = mgr.particle_count();
        let saved_last = mgr.last_system_id();

        let buf = snapshot_bytes(&mgr);

        let mut restored = manager();
        restored.read_snapshot(&mut buf.as_slice()).unwrap();

        // Two saveable, live systems come back with fresh ids above the counter
        let ids: Vec<_> = restored.systems().map(|s| s.id()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| *id > saved_last));
        assert!(ids[0] < ids[1]);
        assert_eq!(restored.last_system_id(), ids[1]);
        assert!(restored.systems().all(|s| s.template_name() == "Fire"));
        assert_eq!(restored.particle_count(), live_particles);
        restored.particles().check_invariants().unwrap();

        let next = restored.create_particle_system_by_name("Spark", false).unwrap();
        assert!(next > ids[1]);
    }

    #[test]
    fn restored_state_continues_identically() {
        let mut mgr = manager();
        let sys = mgr.create_particle_system_by_name("Fire", false).unwrap();
        mgr.set_system_position(sys, [3.0, 0.0, -1.0]);
        for _ in 0..4 {
            mgr.update(0.1);
        }
        let buf = snapshot_bytes(&mgr);

        let mut restored = manager();
        restored.read_snapshot(&mut buf.as_slice()).unwrap();
        for _ in 0..4 {
            mgr.update(0.1);
            restored.update(0.1);
        }

        let a = mgr.systems().next().unwrap();
        let b = restored.systems().next().unwrap();
        assert_eq!(a.particle_count(), b.particle_count());
        for (pa, pb) in a.particles().iter().zip(b.particles()) {
            let (pa, pb) = (mgr.particle(*pa).unwrap(), restored.particle(*pb).unwrap());
            assert_eq!(pa.position, pb.position);
            assert_eq!(pa.age, pb.age);
        }
    }

    #[test]
    fn snapshot_is_byte_for_byte_reproducible() {
        let run = || {
            let mut mgr = manager();
            mgr.create_particle_system_by_name("Fire", false);
            mgr.create_particle_system_by_name("Smoke", true);
            for _ in 0..5 {
                mgr.update(0.1);
            }
            snapshot_bytes(&mgr)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn restore_remaps_master_slave_links() {
        let mut mgr = manager();
        mgr.create_particle_system_by_name("Spark", false);
        let master = mgr.create_particle_system_by_name("Smoke", true).unwrap();
        mgr.remove_particle_system(ParticleSystemId(1));
        assert_eq!(master, ParticleSystemId(2));
        let buf = snapshot_bytes(&mgr);

        let mut restored = manager();
        restored.read_snapshot(&mut buf.as_slice()).unwrap();
        let ids: Vec<_> = restored.systems().map(|s| s.id()).collect();
        assert_eq!(ids, vec![ParticleSystemId(4), ParticleSystemId(5)]);

        let m = restored.find_particle_system(ids[0]).unwrap();
        let s = restored.find_particle_system(ids[1]).unwrap();
        assert_eq!(m.slave(), s.id());
        assert_eq!(s.master(), m.id());
    }

    #[test]
    fn restore_with_dropped_partner_clears_link() {
        let mut mgr = manager();
        let master = mgr.create_particle_system_by_name("Smoke", true).unwrap();
        mgr.find_particle_system_mut(master).unwrap().set_saveable(false);
        let buf = snapshot_bytes(&mgr);

        let mut restored = manager();
        restored.read_snapshot(&mut buf.as_slice()).unwrap();
        assert_eq!(restored.particle_system_count(), 1);
        assert!(restored.systems().next().unwrap().master().is_none());
    }

    #[test]
    fn restore_with_unknown_template_fails() {
        let mut mgr = manager();
        mgr.create_particle_system_by_name("Spark", false);
        let buf = snapshot_bytes(&mgr);

        let mut other = ParticleSystemManager::default();
        other.init_with_templates(TemplateStore::new());
        let err = other.read_snapshot(&mut buf.as_slice()).unwrap_err();
        match err {
            FlareError::TemplateNotFound(name) => assert_eq!(name, "Spark"),
            e => panic!("unexpected error: {e}"),
        }
        assert_eq!(other.particle_system_count(), 0);
    }

    #[test]
    fn restore_rejects_newer_version_and_truncation() {
        let mut mgr = manager();
        mgr.create_particle_system_by_name("Fire", false);
        mgr.update(0.2);
        let mut buf = snapshot_bytes(&mgr);

        let mut truncated = manager();
        let err = truncated
            .read_snapshot(&mut &buf[..buf.len() - 3])
            .unwrap_err();
        assert!(matches!(err, FlareError::IoError(_)));
        assert_eq!(truncated.particle_system_count(), 0);
        assert_eq!(truncated.particles().live(), 0);

        buf[0] = snapshot::SNAPSHOT_VERSION + 1;
        let err = manager().read_snapshot(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, FlareError::UnsupportedSnapshotVersion { .. }));
    }

    #[test]
    fn truncated_restore_keeps_only_complete_systems() {
        let mut mgr = manager();
        mgr.create_particle_system_by_name("Smoke", true);
        mgr.create_particle_system_by_name("Fire", false);
        mgr.update(0.2);
        let buf = snapshot_bytes(&mgr);

        let mut restored = manager();
        let err = restored
            .read_snapshot(&mut &buf[..buf.len() - 3])
            .unwrap_err();
        assert!(matches!(err, FlareError::IoError(_)));

        // Smoke and its slave made it; the cut-off Fire entry left nothing behind
        let names: Vec<_> = restored.systems().map(|s| s.template_name().to_string()).collect();
        assert_eq!(names, vec!["Smoke", "Spark"]);
        let ids: Vec<_> = restored.systems().map(|s| s.id()).collect();
        assert_eq!(restored.find_particle_system(ids[0]).unwrap().slave(), ids[1]);
        assert_eq!(restored.particle_count(), 0);
        assert_eq!(restored.particles().live(), 0);
        restored.particles().check_invariants().unwrap();
    }

    #[test]
    fn restore_keeps_unlinked_particles_unlinked() {
        let mut mgr = manager();
        let sys = mgr.create_particle_system_by_name("Spark", false).unwrap();
        emit(&mut mgr, sys, MEDIUM);
        let detached = emit(&mut mgr, sys, LOW);
        mgr.remove_particle(detached);
        assert_eq!(mgr.particle_count(), 1);
        let buf = snapshot_bytes(&mgr);

        let mut restored = manager();
        restored.read_snapshot(&mut buf.as_slice()).unwrap();
        assert_eq!(restored.particle_count(), 1);
        assert_eq!(restored.particles().live(), 2);
        assert_eq!(restored.particles().bucket_len(LOW), 0);
        assert_eq!(restored.particles().bucket_len(MEDIUM), 1);

        let handles = restored.systems().next().unwrap().particles().to_vec();
        assert_eq!(handles.len(), 2);
        assert!(restored.particles().is_registered(handles[0]));
        assert!(!restored.particles().is_registered(handles[1]));
        restored.particles().check_invariants().unwrap();
    }

    #[test]
    fn restore_without_reset_keeps_existing_systems() {
        // Restore does not clear pre-existing state; callers must reset first.
        let empty = snapshot_bytes(&manager());

        let mut mgr = manager();
        mgr.create_particle_system_by_name("Spark", false);
        mgr.create_particle_system_by_name("Fire", false);
        mgr.read_snapshot(&mut empty.as_slice()).unwrap();

        assert_eq!(mgr.particle_system_count(), 2);
        assert!(mgr.last_system_id().is_none());

        mgr.reset();
        mgr.read_snapshot(&mut empty.as_slice()).unwrap();
        assert_eq!(mgr.particle_system_count(), 0);
    }

    #[test]
    fn ids_stay_unique_across_create_and_restore() {
        let mut mgr = manager();
        for _ in 0..3 {
            mgr.create_particle_system_by_name("Fire", false);
        }
        let buf = snapshot_bytes(&mgr);

        let mut restored = manager();
        restored.read_snapshot(&mut buf.as_slice()).unwrap();
        for _ in 0..2 {
            restored.create_particle_system_by_name("Spark", true);
        }
        let ids: Vec<_> = restored.systems().map(|s| s.id().raw()).collect();
        assert_eq!(ids, vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn runtime_system_lifecycle() {
        let dir = std::env::temp_dir().join("flare_manager_runtime_test");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("particle_systems.toml");
        std::fs::write(&path, "[Spark]\nburst_count = 3\none_shot = true\n").unwrap();

        let mut mgr = ParticleSystemManager::new(ManagerConfig {
            template_path: path.clone(),
            ..ManagerConfig::default()
        });
        assert!(!mgr.is_initialized());
        RuntimeSystem::initialize(&mut mgr).unwrap();
        assert!(mgr.is_initialized());
        assert_eq!(mgr.name(), "particles");

        mgr.create_particle_system_by_name("Spark", false).unwrap();
        RuntimeSystem::update(&mut mgr, 0.1).unwrap();
        assert_eq!(mgr.particle_count(), 3);

        mgr.shutdown().unwrap();
        assert_eq!(mgr.particle_system_count(), 0);
        assert_eq!(mgr.particle_count(), 0);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn init_with_missing_file_fails() {
        let mut mgr = ParticleSystemManager::new(ManagerConfig {
            template_path: "/nonexistent/particle_systems.toml".into(),
            ..ManagerConfig::default()
        });
        assert!(matches!(mgr.init(), Err(FlareError::IoError(_))));
        assert!(!mgr.is_initialized());
    }

    proptest! {
        #[test]
        fn eviction_stays_below_ceiling_and_takes_oldest_first(
            priorities in prop::collection::vec(0..ParticlePriority::COUNT, 0..40),
            n in 0u32..50,
            ceiling in 0..ParticlePriority::COUNT,
        ) {
            let ceiling = ParticlePriority::ALL[ceiling];
            let mut mgr = manager();
            let sys = mgr.create_particle_system_by_name("Spark", false).unwrap();
            for p in &priorities {
                emit(&mut mgr, sys, ParticlePriority::ALL[*p]);
            }

            // Eviction order: buckets below the ceiling, lowest first, oldest first
            let candidates: Vec<ParticleId> = ParticlePriority::ALL
                .iter()
                .take_while(|p| **p < ceiling)
                .flat_map(|p| mgr.particles().iter_bucket(*p).collect::<Vec<_>>())
                .collect();
            let protected: Vec<usize> = ParticlePriority::ALL
                .iter()
                .filter(|p| **p >= ceiling)
                .map(|p| mgr.particles().bucket_len(*p))
                .collect();

            let removed = mgr.remove_oldest_particles(n, ceiling);

            prop_assert!(removed <= n);
            prop_assert_eq!(removed as usize, (n as usize).min(candidates.len()));
            let (gone, kept) = candidates.split_at(removed as usize);
            prop_assert!(gone.iter().all(|id| mgr.particle(*id).is_none()));
            prop_assert!(kept.iter().all(|id| mgr.particles().is_registered(*id)));

            let after: Vec<usize> = ParticlePriority::ALL
                .iter()
                .filter(|p| **p >= ceiling)
                .map(|p| mgr.particles().bucket_len(*p))
                .collect();
            prop_assert_eq!(after, protected);
            prop_assert_eq!(
                mgr.find_particle_system(sys).unwrap().particle_count(),
                mgr.particle_count()
            );
            prop_assert!(mgr.particles().check_invariants().is_ok());
        }
    }
}
