//! Templates command

use anyhow::{Context, Result};
use flare_particles::TemplateStore;

pub fn run(file: &str) -> Result<()> {
    let store = TemplateStore::load_from_file(file)
        .with_context(|| format!("Failed to load templates from '{}'", file))?;

    if store.is_empty() {
        println!("No templates in {}", file);
        return Ok(());
    }

    println!("{} template(s) in {}:", store.len(), file);
    for t in store.iter() {
        let mut line = format!("  {:<24} {:<16}", t.name, t.priority);
        if t.one_shot {
            line.push_str(&format!(" burst {}", t.burst_count));
        } else {
            line.push_str(&format!(" {}/s", t.emission_rate));
        }
        if let Some(slave) = &t.slave_system {
            let marker = if store.find(slave).is_some() { "" } else { " (missing)" };
            line.push_str(&format!(" -> {}{}", slave, marker));
        }
        println!("{}", line);
    }

    Ok(())
}
