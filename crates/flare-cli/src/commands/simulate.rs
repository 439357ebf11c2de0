//! Simulate command: instantiate a template, step the manager, optionally save

use anyhow::{Context, Result};
use flare_particles::{ManagerConfig, ParticleSystemManager, TemplateStore};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub struct SimulateArgs {
    pub templates: String,
    pub effect: String,
    pub count: u32,
    pub frames: u32,
    pub dt: f32,
    pub config: Option<String>,
    pub position: Option<[f32; 3]>,
    pub out: Option<String>,
}

pub fn run(args: SimulateArgs) -> Result<()> {
    if args.dt <= 0.0 {
        anyhow::bail!("--dt must be positive, got {}", args.dt);
    }

    let mut config = match &args.config {
        Some(path) => ManagerConfig::load(path)
            .with_context(|| format!("Failed to load config '{}'", path))?,
        None => ManagerConfig::default(),
    };
    config.template_path = PathBuf::from(&args.templates);

    let store = TemplateStore::load_from_file(&config.template_path)
        .with_context(|| format!("Failed to load templates from '{}'", args.templates))?;
    let mut manager = ParticleSystemManager::new(config);
    manager.init_with_templates(store);

    for _ in 0..args.count {
        let id = manager
            .create_particle_system_by_name(&args.effect, true)
            .with_context(|| format!("Unknown template '{}'", args.effect))?;
        if let Some(position) = args.position {
            manager.set_system_position(id, position);
        }
    }

    let mut peak = manager.particle_count();
    for _ in 0..args.frames {
        manager.update(args.dt);
        peak = peak.max(manager.particle_count());
    }

    println!(
        "Simulated {} frame(s) of {:.3}s ({:.2}s total)",
        args.frames,
        args.dt,
        args.frames as f32 * args.dt
    );
    println!("  Systems:   {}", manager.particle_system_count());
    println!(
        "  Particles: {} (peak {}, budget {})",
        manager.particle_count(),
        peak,
        manager.config().max_particles
    );
    println!("  Last ID:   {}", manager.last_system_id());

    if let Some(out) = &args.out {
        let file = File::create(out).with_context(|| format!("Failed to create '{}'", out))?;
        let mut writer = BufWriter::new(file);
        manager
            .write_snapshot(&mut writer)
            .context("Failed to write snapshot")?;
        writer.flush()?;
        println!("Snapshot written to {}", out);
    }

    Ok(())
}
