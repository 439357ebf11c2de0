//! Flare CLI - Command-line interface for Flare particle systems

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{inspect, simulate, templates};

#[derive(Parser)]
#[command(name = "flare")]
#[command(about = "Inspect, simulate and snapshot deterministic particle systems", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the templates defined in a TOML file
    Templates {
        /// Path to template file
        file: String,
    },

    /// Create systems from a template and step the manager
    Simulate {
        /// Path to template file
        templates: String,

        /// Template to instantiate
        #[arg(long)]
        effect: String,

        /// Number of systems to create
        #[arg(long, default_value = "1")]
        count: u32,

        /// Number of update steps
        #[arg(long, default_value = "60")]
        frames: u32,

        /// Seconds per step
        #[arg(long, default_value = "0.033")]
        dt: f32,

        /// Manager config file (budget and eviction ceiling)
        #[arg(long)]
        config: Option<String>,

        /// Emitter position (comma-separated x,y,z)
        #[arg(long, value_parser = parse_vec3)]
        position: Option<[f32; 3]>,

        /// Write a snapshot here after the last step
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Restore a snapshot into a fresh manager and summarize it
    Inspect {
        /// Path to snapshot file
        snapshot: String,

        /// Path to template file
        #[arg(long)]
        templates: String,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

fn parse_vec3(s: &str) -> Result<[f32; 3], String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("expected 3 comma-separated values, got {}", parts.len()));
    }
    let x: f32 = parts[0].trim().parse().map_err(|e| format!("invalid x: {}", e))?;
    let y: f32 = parts[1].trim().parse().map_err(|e| format!("invalid y: {}", e))?;
    let z: f32 = parts[2].trim().parse().map_err(|e| format!("invalid z: {}", e))?;
    Ok([x, y, z])
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Templates { file } => templates::run(&file),
        Commands::Simulate {
            templates,
            effect,
            count,
            frames,
            dt,
            config,
            position,
            out,
        } => simulate::run(simulate::SimulateArgs {
            templates,
            effect,
            count,
            frames,
            dt,
            config,
            position,
            out,
        }),
        Commands::Inspect {
            snapshot,
            templates,
            format,
        } => inspect::run(&snapshot, &templates, &format),
    }
}
