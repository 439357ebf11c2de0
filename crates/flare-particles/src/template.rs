//! Particle system templates (parsed from TOML) and the template store

use crate::priority::ParticlePriority;
use flare_core::{FlareError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Immutable blueprint for a particle system, keyed by name in a [`TemplateStore`]
#[derive(Debug, Clone)]
pub struct ParticleSystemTemplate {
    pub name: String,
    pub priority: ParticlePriority,
    /// Emit `burst_count` once and then stop
    pub one_shot: bool,
    /// Seconds until the system stops emitting (0 = forever)
    pub system_lifetime: f32,
    /// Seconds before the first emission
    pub initial_delay: f32,
    /// Seconds between bursts (0 = no periodic bursts)
    pub burst_delay: f32,
    pub burst_count: u32,
    /// Continuous emission, particles per second
    pub emission_rate: f32,
    /// Per-system cap on live particles
    pub max_particles: usize,
    pub lifetime_min: f32,
    pub lifetime_max: f32,
    pub speed_min: f32,
    pub speed_max: f32,
    pub direction: [f32; 3],
    /// Directional jitter around `direction`, in degrees
    pub spread: f32,
    pub gravity: [f32; 3],
    pub damping: f32,
    pub size_start: f32,
    pub size_end: f32,
    pub color_start: [f32; 4],
    pub color_end: [f32; 4],
    /// Template spawned alongside this one when slave creation is allowed
    pub slave_system: Option<String>,
    pub slave_offset: [f32; 3],
}

impl ParticleSystemTemplate {
    /// A template with default settings
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: ParticlePriority::default(),
            one_shot: false,
            system_lifetime: 0.0,
            initial_delay: 0.0,
            burst_delay: 0.0,
            burst_count: 0,
            emission_rate: 10.0,
            max_particles: 256,
            lifetime_min: 1.0,
            lifetime_max: 2.0,
            speed_min: 1.0,
            speed_max: 3.0,
            direction: [0.0, 1.0, 0.0],
            spread: 15.0,
            gravity: [0.0, -9.81, 0.0],
            damping: 0.0,
            size_start: 0.1,
            size_end: 0.0,
            color_start: [1.0, 1.0, 1.0, 1.0],
            color_end: [1.0, 1.0, 1.0, 0.0],
            slave_system: None,
            slave_offset: [0.0; 3],
        }
    }

    /// Parse a template from its TOML table. Missing keys keep their defaults.
    pub fn from_toml(name: &str, table: &toml::value::Table) -> Result<Self> {
        let mut t = Self::named(name);

        if let Some(v) = table.get("priority") {
            let s = v.as_str().ok_or_else(|| {
                FlareError::InvalidTemplate(format!("{name}: priority must be a string"))
            })?;
            t.priority = s.parse()?;
        }
        if let Some(v) = table.get("one_shot") {
            t.one_shot = v.as_bool().unwrap_or(false);
        }
        if let Some(v) = table.get("system_lifetime") {
            t.system_lifetime = toml_f32(v, t.system_lifetime).max(0.0);
        }
        if let Some(v) = table.get("initial_delay") {
            t.initial_delay = toml_f32(v, t.initial_delay).max(0.0);
        }
        if let Some(v) = table.get("burst_delay") {
            t.burst_delay = toml_f32(v, t.burst_delay).max(0.0);
        }
        if let Some(v) = table.get("burst_count") {
            t.burst_count = v.as_integer().unwrap_or(0).max(0) as u32;
        }
        if let Some(v) = table.get("emission_rate") {
            t.emission_rate = toml_f32(v, t.emission_rate).max(0.0);
        }
        if let Some(v) = table.get("max_particles") {
            let n = v.as_integer().unwrap_or(256).max(0) as usize;
            t.max_particles = n.min(10000);
        }
        if let Some(v) = table.get("lifetime_min") {
            t.lifetime_min = toml_f32(v, t.lifetime_min);
        }
        if let Some(v) = table.get("lifetime_max") {
            t.lifetime_max = toml_f32(v, t.lifetime_max);
        }
        if let Some(v) = table.get("speed_min") {
            t.speed_min = toml_f32(v, t.speed_min);
        }
        if let Some(v) = table.get("speed_max") {
            t.speed_max = toml_f32(v, t.speed_max);
        }
        if let Some(v) = table.get("direction") {
            t.direction = toml_vec3(v, t.direction);
        }
        if let Some(v) = table.get("spread") {
            t.spread = toml_f32(v, t.spread);
        }
        if let Some(v) = table.get("gravity") {
            t.gravity = toml_vec3(v, t.gravity);
        }
        if let Some(v) = table.get("damping") {
            t.damping = toml_f32(v, t.damping);
        }
        if let Some(v) = table.get("size_start") {
            t.size_start = toml_f32(v, t.size_start);
        }
        if let Some(v) = table.get("size_end") {
            t.size_end = toml_f32(v, t.size_end);
        }
        if let Some(v) = table.get("color_start") {
            t.color_start = toml_vec4(v, t.color_start);
        }
        if let Some(v) = table.get("color_end") {
            t.color_end = toml_vec4(v, t.color_end);
        }
        if let Some(v) = table.get("slave_system") {
            t.slave_system = v.as_str().filter(|s| !s.is_empty()).map(String::from);
        }
        if let Some(v) = table.get("slave_offset") {
            t.slave_offset = toml_vec3(v, t.slave_offset);
        }

        if t.lifetime_max < t.lifetime_min {
            return Err(FlareError::InvalidTemplate(format!(
                "{name}: lifetime_max ({}) is below lifetime_min ({})",
                t.lifetime_max, t.lifetime_min
            )));
        }

        Ok(t)
    }
}

/// Name → template lookup, populated once at manager init.
///
/// Ordered by name so listings are deterministic.
#[derive(Debug, Default, Clone)]
pub struct TemplateStore {
    templates: BTreeMap<String, Arc<ParticleSystemTemplate>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every top-level table of a TOML document as one template
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let root: toml::value::Table = toml::from_str(content)?;
        let mut store = Self::new();
        for (name, value) in &root {
            if name.is_empty() {
                return Err(FlareError::InvalidTemplate("empty template name".into()));
            }
            let table = value.as_table().ok_or_else(|| {
                FlareError::InvalidTemplate(format!("{name}: expected a table"))
            })?;
            store.insert(ParticleSystemTemplate::from_toml(name, table)?);
        }
        Ok(store)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let store = Self::from_toml_str(&content)?;
        log::info!(
            "loaded {} particle system template(s) from {}",
            store.len(),
            path.as_ref().display()
        );
        Ok(store)
    }

    /// Register a template, replacing any existing one with the same name
    pub fn insert(&mut self, template: ParticleSystemTemplate) -> Arc<ParticleSystemTemplate> {
        let template = Arc::new(template);
        self.templates
            .insert(template.name.clone(), Arc::clone(&template));
        template
    }

    /// Exact, case-sensitive lookup
    pub fn find(&self, name: &str) -> Option<&Arc<ParticleSystemTemplate>> {
        self.templates.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ParticleSystemTemplate>> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

// ── TOML helpers (handle integer/float coercion) ──

fn toml_f32(v: &toml::Value, default: f32) -> f32 {
    v.as_float()
        .map(|f| f as f32)
        .or_else(|| v.as_integer().map(|i| i as f32))
        .unwrap_or(default)
}

fn toml_vec3(v: &toml::Value, default: [f32; 3]) -> [f32; 3] {
    match v.as_array() {
        Some(arr) if arr.len() >= 3 => {
            [0, 1, 2].map(|i| toml_f32(&arr[i], default[i]))
        }
        _ => default,
    }
}

fn toml_vec4(v: &toml::Value, default: [f32; 4]) -> [f32; 4] {
    match v.as_array() {
        Some(arr) if arr.len() >= 4 => {
            [0, 1, 2, 3].map(|i| toml_f32(&arr[i], default[i]))
        }
        _ => default,
    }
}
