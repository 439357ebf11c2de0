//! Particle records and the priority-bucketed particle registry
//!
//! Particles live in an arena addressed by generation-checked [`ParticleId`]
//! handles. Registered particles are additionally threaded onto one
//! doubly-linked list per [`ParticlePriority`], oldest at the head, so eviction
//! can always find the oldest particle of the lowest priority in O(1).

use crate::priority::ParticlePriority;
use flare_core::ParticleSystemId;

type Link = Option<u32>;

/// Stable handle to a particle in the [`ParticleRegistry`] arena.
///
/// The generation is bumped whenever a slot is released, so a handle to a
/// released particle never resolves to whatever reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticleId {
    index: u32,
    generation: u32,
}

/// Simulation state of one particle plus its registry links
#[derive(Debug, Clone)]
pub struct Particle {
    /// Owning particle system
    pub system: ParticleSystemId,
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub age: f32,
    pub lifetime: f32,
    pub size: f32,
    pub color: [f32; 4],
    priority: ParticlePriority,
    in_registry: bool,
    prev: Link,
    next: Link,
}

impl Particle {
    pub fn new(system: ParticleSystemId, priority: ParticlePriority) -> Self {
        Self {
            system,
            position: [0.0; 3],
            velocity: [0.0; 3],
            age: 0.0,
            lifetime: 0.0,
            size: 0.0,
            color: [0.0; 4],
            priority,
            in_registry: false,
            prev: None,
            next: None,
        }
    }

    pub fn priority(&self) -> ParticlePriority {
        self.priority
    }

    /// Whether the particle is currently linked into a priority bucket
    pub fn in_registry(&self) -> bool {
        self.in_registry
    }

    /// Normalized age in [0, 1]
    pub fn age_ratio(&self) -> f32 {
        if self.lifetime <= 0.0 {
            1.0
        } else {
            (self.age / self.lifetime).min(1.0)
        }
    }

    pub fn expired(&self) -> bool {
        self.age >= self.lifetime
    }
}

struct Slot {
    generation: u32,
    occupied: bool,
    particle: Particle,
}

/// Arena of every particle plus one linked list per priority bucket.
pub struct ParticleRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    heads: [Link; ParticlePriority::COUNT],
    tails: [Link; ParticlePriority::COUNT],
    /// Number of particles linked into any bucket
    count: usize,
}

impl ParticleRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            heads: [None; ParticlePriority::COUNT],
            tails: [None; ParticlePriority::COUNT],
            count: 0,
        }
    }

    /// Allocate an arena slot for `particle`. The particle starts unregistered.
    pub fn spawn(&mut self, mut particle: Particle) -> ParticleId {
        particle.in_registry = false;
        particle.prev = None;
        particle.next = None;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.occupied = true;
            slot.particle = particle;
            ParticleId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                occupied: true,
                particle,
            });
            ParticleId {
                index,
                generation: 0,
            }
        }
    }

    /// Unlink (if registered) and free a particle, returning its final state.
    pub fn release(&mut self, id: ParticleId) -> Option<Particle> {
        let index = self.resolve(id)?;
        self.remove_particle(id);
        let slot = &mut self.slots[index as usize];
        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(std::mem::replace(
            &mut slot.particle,
            Particle::new(ParticleSystemId::NONE, ParticlePriority::LOWEST),
        ))
    }

    pub fn get(&self, id: ParticleId) -> Option<&Particle> {
        self.resolve(id).map(|i| &self.slots[i as usize].particle)
    }

    /// Mutable access to simulation state; links stay private to the registry.
    pub fn get_mut(&mut self, id: ParticleId) -> Option<&mut Particle> {
        self.resolve(id).map(|i| &mut self.slots[i as usize].particle)
    }

    /// Append a particle to the tail of `priority`'s bucket.
    /// No-op if the handle is stale or the particle is already registered.
    pub fn add_particle(&mut self, id: ParticleId, priority: ParticlePriority) {
        let Some(index) = self.resolve(id) else {
            return;
        };
        let bucket = priority.index();
        let tail = self.tails[bucket];

        let p = &mut self.slots[index as usize].particle;
        if p.in_registry {
            return;
        }
        p.priority = priority;
        p.prev = tail;
        p.next = None;
        p.in_registry = true;

        match tail {
            Some(t) => self.slots[t as usize].particle.next = Some(index),
            None => self.heads[bucket] = Some(index),
        }
        self.tails[bucket] = Some(index);
        self.count += 1;
    }

    /// Splice a particle out of its bucket. No-op if it is not registered.
    pub fn remove_particle(&mut self, id: ParticleId) {
        let Some(index) = self.resolve(id) else {
            return;
        };

        let p = &self.slots[index as usize].particle;
        if !p.in_registry {
            return;
        }
        let (prev, next, bucket) = (p.prev, p.next, p.priority.index());

        if let Some(n) = next {
            self.slots[n as usize].particle.prev = prev;
        }
        if let Some(pv) = prev {
            self.slots[pv as usize].particle.next = next;
        }
        if self.heads[bucket] == Some(index) {
            self.heads[bucket] = next;
        }
        if self.tails[bucket] == Some(index) {
            self.tails[bucket] = prev;
        }

        let p = &mut self.slots[index as usize].particle;
        p.prev = None;
        p.next = None;
        p.in_registry = false;
        self.count -= 1;
    }

    pub fn is_registered(&self, id: ParticleId) -> bool {
        self.get(id).is_some_and(|p| p.in_registry)
    }

    /// Oldest registered particle of a bucket
    pub fn head(&self, priority: ParticlePriority) -> Option<ParticleId> {
        self.heads[priority.index()].map(|i| self.handle(i))
    }

    /// Oldest registered particle strictly below `ceiling`, lowest bucket first
    pub fn oldest_below(&self, ceiling: ParticlePriority) -> Option<ParticleId> {
        ParticlePriority::ALL
            .iter()
            .take_while(|p| **p < ceiling)
            .find_map(|p| self.head(*p))
    }

    /// Registered particles of a bucket, oldest first
    pub fn iter_bucket(&self, priority: ParticlePriority) -> BucketIter<'_> {
        BucketIter {
            registry: self,
            cursor: self.heads[priority.index()],
        }
    }

    pub fn bucket_len(&self, priority: ParticlePriority) -> usize {
        self.iter_bucket(priority).count()
    }

    /// Number of registered particles across all buckets
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of allocated arena slots (registered or not)
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Unlink every particle and empty all buckets. Arena slots stay allocated.
    pub fn clear_buckets(&mut self) {
        for slot in &mut self.slots {
            slot.particle.in_registry = false;
            slot.particle.prev = None;
            slot.particle.next = None;
        }
        self.heads = [None; ParticlePriority::COUNT];
        self.tails = [None; ParticlePriority::COUNT];
        self.count = 0;
    }

    /// Release every particle. Slots are kept for reuse and generations are
    /// bumped, so handles from before the clear stay stale.
    pub fn clear(&mut self) {
        self.clear_buckets();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.occupied {
                slot.occupied = false;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }

    /// Verify bucket endpoints, back-links, membership flags and the total
    /// count against the list contents.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut linked = 0;
        for priority in ParticlePriority::ALL {
            let b = priority.index();
            match (self.heads[b], self.tails[b]) {
                (None, None) => continue,
                (Some(h), Some(t)) => {
                    if self.slots[h as usize].particle.prev.is_some() {
                        return Err(format!("{priority}: head has a back-link"));
                    }
                    if self.slots[t as usize].particle.next.is_some() {
                        return Err(format!("{priority}: tail has a forward link"));
                    }
                }
                _ => return Err(format!("{priority}: head/tail disagree on emptiness")),
            }

            let mut prev: Link = None;
            let mut cursor = self.heads[b];
            while let Some(i) = cursor {
                let slot = &self.slots[i as usize];
                let p = &slot.particle;
                if !slot.occupied || !p.in_registry {
                    return Err(format!("{priority}: slot {i} linked but not registered"));
                }
                if p.priority != priority {
                    return Err(format!("{priority}: slot {i} belongs to {}", p.priority));
                }
                if p.prev != prev {
                    return Err(format!("{priority}: slot {i} has a stale back-link"));
                }
                linked += 1;
                if linked > self.slots.len() {
                    return Err(format!("{priority}: cycle detected"));
                }
                prev = cursor;
                cursor = p.next;
            }
            if prev != self.tails[b] {
                return Err(format!("{priority}: tail does not end the list"));
            }
        }

        let flagged = self
            .slots
            .iter()
            .filter(|s| s.occupied && s.particle.in_registry)
            .count();
        if flagged != linked {
            return Err(format!("{flagged} particles flagged but {linked} linked"));
        }
        if linked != self.count {
            return Err(format!("count is {} but {linked} linked", self.count));
        }
        Ok(())
    }

    fn resolve(&self, id: ParticleId) -> Option<u32> {
        let slot = self.slots.get(id.index as usize)?;
        (slot.occupied && slot.generation == id.generation).then_some(id.index)
    }

    fn handle(&self, index: u32) -> ParticleId {
        ParticleId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }
}

impl Default for ParticleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks one bucket from head to tail
pub struct BucketIter<'a> {
    registry: &'a ParticleRegistry,
    cursor: Link,
}

impl Iterator for BucketIter<'_> {
    type Item = ParticleId;

    fn next(&mut self) -> Option<ParticleId> {
        let index = self.cursor?;
        self.cursor = self.registry.slots[index as usize].particle.next;
        Some(self.registry.handle(index))
    }
}
