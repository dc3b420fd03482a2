//! ASCII phase-space format: run parameters, component definitions, and
//! the molecule table. The checkpoint writer emits the same schema, so a
//! finished run's `<prefix>.restart.inp` feeds straight back in.
//!
//! Layout:
//!
//! ```text
//! MDProjectConfig
//! # comment lines start with '#'
//! timestepLength 0.002
//! cutoffRadius 2.5
//! boxLength 10 10 10
//! epsilonRF inf
//! targetTemperature 0.7
//! datastructure LinkedCells 1
//! output res 100 runA
//! NumberOfComponents 1
//! numSites 1 0 0 0
//! LJ 0 0 0 1.0 1.0 0
//! mass 1.0
//! inertia 1 1 1
//! NumberOfMolecules 2
//! 1 0  0 0 0  0 0 0  1 0 0 0  0 0 0
//! ```
//!
//! Molecule rows are `id cid x y z vx vy vz q0 q1 q2 q3 Dx Dy Dz`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use polymd_core::component::{
    ChargeSite, Component, ComponentTable, DipoleSite, LjSite, QuadrupoleSite,
};
use polymd_core::config::{SimulationConfig, WriterKind};
use polymd_core::errors::{PolymdError, Result};
use polymd_core::math::Quat;
use polymd_core::molecule::MoleculeRecord;

/// Everything a run needs from its input.
#[derive(Debug, Clone)]
pub struct PhaseSpaceData {
    pub config: SimulationConfig,
    pub components: Vec<Component>,
    pub molecules: Vec<MoleculeRecord>,
}

struct Tokens {
    words: Vec<String>,
    at: usize,
    path: String,
}

impl Tokens {
    fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| PolymdError::phase_space(format!("{}: {}", path.display(), e)))?;
        let mut words = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.starts_with('#') {
                continue;
            }
            words.extend(trimmed.split_whitespace().map(str::to_string));
        }
        Ok(Self {
            words,
            at: 0,
            path: path.display().to_string(),
        })
    }

    fn next(&mut self) -> Result<&str> {
        let w = self
            .words
            .get(self.at)
            .ok_or_else(|| PolymdError::phase_space(format!("{}: unexpected end of file", self.path)))?;
        self.at += 1;
        Ok(w)
    }

    fn peek(&self) -> Option<&str> {
        self.words.get(self.at).map(|s| s.as_str())
    }

    fn f64(&mut self) -> Result<f64> {
        let path = self.path.clone();
        let w = self.next()?;
        if w == "inf" {
            return Ok(f64::INFINITY);
        }
        w.parse()
            .map_err(|_| PolymdError::phase_space(format!("{}: expected a number, got '{}'", path, w)))
    }

    fn usize(&mut self) -> Result<usize> {
        let path = self.path.clone();
        let w = self.next()?;
        w.parse()
            .map_err(|_| PolymdError::phase_space(format!("{}: expected an integer, got '{}'", path, w)))
    }

    fn u64(&mut self) -> Result<u64> {
        let path = self.path.clone();
        let w = self.next()?;
        w.parse()
            .map_err(|_| PolymdError::phase_space(format!("{}: expected an integer, got '{}'", path, w)))
    }

    fn vec3(&mut self) -> Result<[f64; 3]> {
        Ok([self.f64()?, self.f64()?, self.f64()?])
    }
}

/// Parse an ASCII phase-space / checkpoint file.
pub fn read_phase_space(path: &Path) -> Result<PhaseSpaceData> {
    let mut t = Tokens::from_file(path)?;
    let header = t.next()?;
    if header != "MDProjectConfig" {
        return Err(PolymdError::phase_space(format!(
            "{}: not a phase-space file (first token '{}')",
            path.display(),
            header
        )));
    }

    let mut config = SimulationConfig::default();
    let mut config_writers: Vec<WriterKind> = Vec::new();
    let mut components = Vec::new();
    let mut molecules = Vec::new();

    while let Some(token) = t.peek() {
        let token = token.to_string();
        t.at += 1;
        match token.as_str() {
            "timestepLength" => config.timestep_length = t.f64()?,
            "cutoffRadius" => config.cutoff_radius = t.f64()?,
            "boxLength" => config.global_box = t.vec3()?,
            "epsilonRF" => config.epsilon_rf = t.f64()?,
            "targetTemperature" => config.target_temperature = Some(t.f64()?),
            "datastructure" => {
                let kind = t.next()?.to_string();
                match kind.as_str() {
                    "LinkedCells" => config.cells_in_cutoff = t.usize()?,
                    "AdaptiveSubCells" => {
                        return Err(PolymdError::config(
                            "data structure AdaptiveSubCells is not supported; use LinkedCells",
                        ))
                    }
                    other => {
                        return Err(PolymdError::config(format!(
                            "unknown data structure '{}'",
                            other
                        )))
                    }
                }
            }
            "output" => {
                let writer = parse_writer_name(t.next()?)?;
                config_writers.push(writer);
                config.output_frequency = t.u64()?;
                config.output_prefix = t.next()?.to_string();
            }
            "phaseSpaceFile" => {
                let rel = t.next()?.to_string();
                let nested_path = path.parent().unwrap_or(Path::new("")).join(rel);
                let nested = read_phase_space(&nested_path)?;
                components.extend(nested.components);
                molecules.extend(nested.molecules);
            }
            "NumberOfComponents" => {
                let n = t.usize()?;
                for id in 0..n {
                    components.push(read_component(&mut t, id)?);
                }
            }
            "NumberOfMolecules" => {
                let n = t.usize()?;
                for _ in 0..n {
                    molecules.push(read_molecule_row(&mut t)?);
                }
            }
            other => {
                return Err(PolymdError::phase_space(format!(
                    "{}: unknown token '{}'",
                    path.display(),
                    other
                )))
            }
        }
    }

    if !config_writers.is_empty() {
        config.output_writers = config_writers;
    }
    log::info!(
        "{}: {} components, {} molecules",
        path.display(),
        components.len(),
        molecules.len()
    );
    Ok(PhaseSpaceData {
        config,
        components,
        molecules,
    })
}

/// Accept both the short codes (`res`) and the original writer names
/// (`ResultWriter`).
fn parse_writer_name(name: &str) -> Result<WriterKind> {
    match name {
        "CheckpointWriter" => Ok(WriterKind::Checkpoint),
        "XyzWriter" => Ok(WriterKind::Xyz),
        "ResultWriter" => Ok(WriterKind::Result),
        "PovWriter" => Ok(WriterKind::Pov),
        "VisWriter" => Ok(WriterKind::Vis),
        short => WriterKind::parse(short),
    }
}

fn read_component(t: &mut Tokens, id: usize) -> Result<Component> {
    let path = t.path.clone();
    let tag = t.next()?;
    if tag != "numSites" {
        return Err(PolymdError::phase_space(format!(
            "{}: expected 'numSites' for component {}, got '{}'",
            path, id, tag
        )));
    }
    let n_lj = t.usize()?;
    let n_charge = t.usize()?;
    let n_dipole = t.usize()?;
    let n_quad = t.usize()?;

    let mut comp = Component {
        id,
        lj_sites: Vec::with_capacity(n_lj),
        charges: Vec::with_capacity(n_charge),
        dipoles: Vec::with_capacity(n_dipole),
        quadrupoles: Vec::with_capacity(n_quad),
        mass: 1.0,
        inertia: [1.0; 3],
    };

    for _ in 0..n_lj {
        expect(t, "LJ")?;
        comp.lj_sites.push(LjSite {
            offset: t.vec3()?,
            eps: t.f64()?,
            sigma: t.f64()?,
            shift6: t.f64()?,
        });
    }
    for _ in 0..n_charge {
        expect(t, "Charge")?;
        comp.charges.push(ChargeSite {
            offset: t.vec3()?,
            q: t.f64()?,
        });
    }
    for _ in 0..n_dipole {
        expect(t, "Dipole")?;
        comp.dipoles.push(DipoleSite {
            offset: t.vec3()?,
            abs_mu: t.f64()?,
            axis: t.vec3()?,
        });
    }
    for _ in 0..n_quad {
        expect(t, "Quadrupole")?;
        comp.quadrupoles.push(QuadrupoleSite {
            offset: t.vec3()?,
            abs_q: t.f64()?,
            axis: t.vec3()?,
        });
    }

    expect(t, "mass")?;
    comp.mass = t.f64()?;
    expect(t, "inertia")?;
    comp.inertia = t.vec3()?;
    Ok(comp)
}

fn expect(t: &mut Tokens, what: &str) -> Result<()> {
    let path = t.path.clone();
    let got = t.next()?;
    if got != what {
        return Err(PolymdError::phase_space(format!(
            "{}: expected '{}', got '{}'",
            path, what, got
        )));
    }
    Ok(())
}

fn read_molecule_row(t: &mut Tokens) -> Result<MoleculeRecord> {
    let id = t.u64()?;
    let component_id = t.usize()? as u16;
    let r = t.vec3()?;
    let v = t.vec3()?;
    let q = Quat::new(t.f64()?, t.f64()?, t.f64()?, t.f64()?);
    let d = t.vec3()?;
    Ok(MoleculeRecord {
        id,
        component_id,
        r,
        v,
        q,
        d,
    })
}

/// Write the final (or periodic) state in the input schema.
pub fn write_checkpoint(
    path: &Path,
    config: &SimulationConfig,
    table: &ComponentTable,
    molecules: &[MoleculeRecord],
) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    writeln!(w, "MDProjectConfig")?;
    writeln!(w, "# checkpoint written by polymd")?;
    writeln!(w, "timestepLength {}", config.timestep_length)?;
    writeln!(w, "cutoffRadius {}", config.cutoff_radius)?;
    writeln!(
        w,
        "boxLength {} {} {}",
        config.global_box[0], config.global_box[1], config.global_box[2]
    )?;
    if config.epsilon_rf.is_infinite() {
        writeln!(w, "epsilonRF inf")?;
    } else {
        writeln!(w, "epsilonRF {}", config.epsilon_rf)?;
    }
    if let Some(t) = config.target_temperature {
        writeln!(w, "targetTemperature {}", t)?;
    }
    writeln!(w, "datastructure LinkedCells {}", config.cells_in_cutoff)?;

    writeln!(w, "NumberOfComponents {}", table.num_components())?;
    for comp in table.components() {
        writeln!(
            w,
            "numSites {} {} {} {}",
            comp.lj_sites.len(),
            comp.charges.len(),
            comp.dipoles.len(),
            comp.quadrupoles.len()
        )?;
        for s in &comp.lj_sites {
            writeln!(
                w,
                "LJ {} {} {} {} {} {}",
                s.offset[0], s.offset[1], s.offset[2], s.eps, s.sigma, s.shift6
            )?;
        }
        for s in &comp.charges {
            writeln!(w, "Charge {} {} {} {}", s.offset[0], s.offset[1], s.offset[2], s.q)?;
        }
        for s in &comp.dipoles {
            writeln!(
                w,
                "Dipole {} {} {} {} {} {} {}",
                s.offset[0], s.offset[1], s.offset[2], s.abs_mu, s.axis[0], s.axis[1], s.axis[2]
            )?;
        }
        for s in &comp.quadrupoles {
            writeln!(
                w,
                "Quadrupole {} {} {} {} {} {} {}",
                s.offset[0], s.offset[1], s.offset[2], s.abs_q, s.axis[0], s.axis[1], s.axis[2]
            )?;
        }
        writeln!(w, "mass {}", comp.mass)?;
        writeln!(
            w,
            "inertia {} {} {}",
            comp.inertia[0], comp.inertia[1], comp.inertia[2]
        )?;
    }

    writeln!(w, "NumberOfMolecules {}", molecules.len())?;
    let mut sorted: Vec<&MoleculeRecord> = molecules.iter().collect();
    sorted.sort_by_key(|m| m.id);
    for m in sorted {
        writeln!(
            w,
            "{} {} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e}",
            m.id,
            m.component_id,
            m.r[0],
            m.r[1],
            m.r[2],
            m.v[0],
            m.v[1],
            m.v[2],
            m.q.w,
            m.q.x,
            m.q.y,
            m.q.z,
            m.d[0],
            m.d[1],
            m.d[2]
        )?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir();
        let path = dir.join(format!(
            "polymd_ps_{}_{}.inp",
            std::process::id(),
            content.len()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    const SAMPLE: &str = "MDProjectConfig\n\
        # two argon-like particles\n\
        timestepLength 0.002\n\
        cutoffRadius 2.5\n\
        boxLength 10 10 10\n\
        datastructure LinkedCells 1\n\
        NumberOfComponents 1\n\
        numSites 1 0 0 0\n\
        LJ 0 0 0 1.0 1.0 0\n\
        mass 1.0\n\
        inertia 1 1 1\n\
        NumberOfMolecules 2\n\
        1 0 1 1 1 0 0 0 1 0 0 0 0 0 0\n\
        2 0 2 1 1 0 0 0 1 0 0 0 0 0 0\n";

    #[test]
    fn test_read_sample() {
        let path = write_temp(SAMPLE);
        let data = read_phase_space(&path).unwrap();
        assert_eq!(data.config.timestep_length, 0.002);
        assert_eq!(data.config.cutoff_radius, 2.5);
        assert_eq!(data.components.len(), 1);
        assert_eq!(data.molecules.len(), 2);
        assert_eq!(data.molecules[1].r, [2.0, 1.0, 1.0]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_rejects_wrong_header() {
        let path = write_temp("SomethingElse\n");
        assert!(read_phase_space(&path).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_rejects_adaptive_subcells() {
        let path = write_temp("MDProjectConfig\ndatastructure AdaptiveSubCells 2\n");
        let err = read_phase_space(&path).unwrap_err();
        assert!(matches!(err, PolymdError::Config(_)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let path = write_temp(SAMPLE);
        let data = read_phase_space(&path).unwrap();
        let table =
            ComponentTable::build(data.components.clone(), data.config.cutoff_radius, 1.0).unwrap();

        let out = std::env::temp_dir().join(format!("polymd_ckp_{}.restart.inp", std::process::id()));
        write_checkpoint(&out, &data.config, &table, &data.molecules).unwrap();
        let back = read_phase_space(&out).unwrap();
        assert_eq!(back.molecules.len(), 2);
        assert_eq!(back.molecules[0].id, 1);
        assert_eq!(back.molecules[0].r, data.molecules[0].r);
        std::fs::remove_file(path).ok();
        std::fs::remove_file(out).ok();
    }
}
