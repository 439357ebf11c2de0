//! Binary snapshot primitives.
//!
//! All values are little-endian. The manager-level layout is
//! `[version:u8][last_id:u32][count:u32]` followed by `count` entries of
//! `[name_len:u16][name][state]`; an empty name marks a skipped entry and
//! carries no state.

use crate::particle::Particle;
use crate::priority::ParticlePriority;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flare_core::{FlareError, ParticleSystemId, Result};
use std::io::{Read, Write};

/// Newest snapshot format this build reads and the one it writes
pub const SNAPSHOT_VERSION: u8 = 1;

/// Write the format version tag
pub fn write_version<W: Write>(w: &mut W) -> Result<()> {
    w.write_u8(SNAPSHOT_VERSION)?;
    Ok(())
}

/// Read the format version tag, rejecting versions newer than this build
pub fn read_version<R: Read>(r: &mut R) -> Result<u8> {
    let found = r.read_u8()?;
    if found == 0 || found > SNAPSHOT_VERSION {
        return Err(FlareError::UnsupportedSnapshotVersion {
            found,
            supported: SNAPSHOT_VERSION,
        });
    }
    Ok(found)
}

/// Length-prefixed (u16) name
pub fn write_name<W: Write>(w: &mut W, name: &str) -> Result<()> {
    let len = u16::try_from(name.len()).map_err(|_| FlareError::NameTooLong(name.len()))?;
    w.write_u16::<LittleEndian>(len)?;
    w.write_all(name.as_bytes())?;
    Ok(())
}

pub fn read_name<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| FlareError::SnapshotCorrupt(format!("template name is not UTF-8: {e}")))
}

pub fn write_vec3<W: Write>(w: &mut W, v: [f32; 3]) -> Result<()> {
    for c in v {
        w.write_f32::<LittleEndian>(c)?;
    }
    Ok(())
}

pub fn read_vec3<R: Read>(r: &mut R) -> Result<[f32; 3]> {
    Ok([
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
    ])
}

pub fn write_vec4<W: Write>(w: &mut W, v: [f32; 4]) -> Result<()> {
    for c in v {
        w.write_f32::<LittleEndian>(c)?;
    }
    Ok(())
}

pub fn read_vec4<R: Read>(r: &mut R) -> Result<[f32; 4]> {
    Ok([
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
    ])
}

/// Per-particle state: priority, bucket membership, kinematics, lifetime,
/// appearance
pub fn write_particle<W: Write>(w: &mut W, p: &Particle) -> Result<()> {
    w.write_u8(p.priority().index() as u8)?;
    w.write_u8(u8::from(p.in_registry()))?;
    write_vec3(w, p.position)?;
    write_vec3(w, p.velocity)?;
    w.write_f32::<LittleEndian>(p.age)?;
    w.write_f32::<LittleEndian>(p.lifetime)?;
    w.write_f32::<LittleEndian>(p.size)?;
    write_vec4(w, p.color)?;
    Ok(())
}

/// Read one particle owned by `system`, plus whether it was linked into its
/// priority bucket when saved. The returned particle is not yet registered.
pub fn read_particle<R: Read>(r: &mut R, system: ParticleSystemId) -> Result<(Particle, bool)> {
    let raw = r.read_u8()?;
    let priority = ParticlePriority::from_index(raw as usize)
        .ok_or_else(|| FlareError::SnapshotCorrupt(format!("particle priority {raw} out of range")))?;
    let registered = match r.read_u8()? {
        0 => false,
        1 => true,
        other => {
            return Err(FlareError::SnapshotCorrupt(format!(
                "particle membership flag {other} is not 0 or 1"
            )))
        }
    };
    let mut p = Particle::new(system, priority);
    p.position = read_vec3(r)?;
    p.velocity = read_vec3(r)?;
    p.age = r.read_f32::<LittleEndian>()?;
    p.lifetime = r.read_f32::<LittleEndian>()?;
    p.size = r.read_f32::<LittleEndian>()?;
    p.color = read_vec4(r)?;
    Ok((p, registered))
}
