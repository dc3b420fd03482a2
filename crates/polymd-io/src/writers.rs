//! Output writers.
//!
//! Each writer is one case of a variant with a fixed capability set
//! (`init`, `per_step`, `finish`). Writers run on rank 0 only; the step
//! loop gathers the molecule records there when a writer needs them.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Local;
use serde::Serialize;

use polymd_core::component::ComponentTable;
use polymd_core::config::{SimulationConfig, WriterKind};
use polymd_core::domain::Domain;
use polymd_core::errors::Result;
use polymd_core::molecule::MoleculeRecord;

use crate::phase_space::write_checkpoint;

/// Everything a writer may look at for one step.
pub struct OutputContext<'a> {
    pub config: &'a SimulationConfig,
    pub table: &'a ComponentTable,
    pub domain: &'a Domain,
    /// Gathered molecule records; only present on rank 0.
    pub records: Option<&'a [MoleculeRecord]>,
}

pub enum OutputWriter {
    Checkpoint(CheckpointWriter),
    Xyz(XyzWriter),
    Result(ResultWriter),
    Pov(PovWriter),
    Vis(VisWriter),
}

impl OutputWriter {
    pub fn new(kind: WriterKind, config: &SimulationConfig) -> Self {
        let prefix = config.output_prefix.clone();
        match kind {
            WriterKind::Checkpoint => OutputWriter::Checkpoint(CheckpointWriter { prefix }),
            WriterKind::Xyz => OutputWriter::Xyz(XyzWriter { prefix }),
            WriterKind::Result => OutputWriter::Result(ResultWriter {
                prefix,
                file: None,
                steps: 0,
                upot_sum: 0.0,
                pressure_sum: 0.0,
            }),
            WriterKind::Pov => OutputWriter::Pov(PovWriter { prefix }),
            WriterKind::Vis => OutputWriter::Vis(VisWriter { prefix }),
        }
    }

    /// True if this writer wants the gathered molecule records.
    pub fn needs_molecules(&self) -> bool {
        !matches!(self, OutputWriter::Result(_))
    }

    pub fn init(&mut self, ctx: &OutputContext) -> Result<()> {
        match self {
            OutputWriter::Result(w) => w.init(ctx),
            _ => Ok(()),
        }
    }

    pub fn per_step(&mut self, ctx: &OutputContext, step: u64) -> Result<()> {
        if step % ctx.config.output_frequency != 0 {
            return Ok(());
        }
        match self {
            OutputWriter::Checkpoint(w) => w.write(ctx, step),
            OutputWriter::Xyz(w) => w.write(ctx, step),
            OutputWriter::Result(w) => w.write(ctx, step),
            OutputWriter::Pov(w) => w.write(ctx, step),
            OutputWriter::Vis(w) => w.write(ctx, step),
        }
    }

    pub fn finish(&mut self, ctx: &OutputContext) -> Result<()> {
        match self {
            OutputWriter::Checkpoint(w) => {
                let path = PathBuf::from(format!("{}.restart.inp", w.prefix));
                if let Some(records) = ctx.records {
                    write_checkpoint(&path, ctx.config, ctx.table, records)?;
                }
                Ok(())
            }
            OutputWriter::Result(w) => w.finish(),
            _ => Ok(()),
        }
    }
}

/// Periodic output path: numbered when running incrementally, otherwise
/// overwritten in place.
fn step_path(prefix: &str, incremental: bool, step: u64, ext: &str) -> PathBuf {
    if incremental {
        PathBuf::from(format!("{}-{:07}.{}", prefix, step, ext))
    } else {
        PathBuf::from(format!("{}.{}", prefix, ext))
    }
}

pub struct CheckpointWriter {
    prefix: String,
}

impl CheckpointWriter {
    fn write(&mut self, ctx: &OutputContext, step: u64) -> Result<()> {
        let Some(records) = ctx.records else {
            return Ok(());
        };
        let path = if ctx.config.incremental_output {
            PathBuf::from(format!("{}-{:07}.restart.inp", self.prefix, step))
        } else {
            PathBuf::from(format!("{}.restart.inp", self.prefix))
        };
        write_checkpoint(&path, ctx.config, ctx.table, records)
    }
}

pub struct XyzWriter {
    prefix: String,
}

impl XyzWriter {
    fn write(&mut self, ctx: &OutputContext, step: u64) -> Result<()> {
        let Some(records) = ctx.records else {
            return Ok(());
        };
        let path = step_path(&self.prefix, ctx.config.incremental_output, step, "xyz");
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "{}", records.len())?;
        writeln!(w, "step {} t {:.6}", step, ctx.domain.current_time())?;
        for m in records {
            // Element letter per component keeps viewers happy.
            let element = (b'A' + (m.component_id as u8 % 26)) as char;
            writeln!(w, "{} {:.8} {:.8} {:.8}", element, m.r[0], m.r[1], m.r[2])?;
        }
        w.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ResultSummary {
    steps_recorded: u64,
    mean_upot_per_molecule: f64,
    mean_pressure: f64,
}

pub struct ResultWriter {
    prefix: String,
    file: Option<BufWriter<File>>,
    steps: u64,
    upot_sum: f64,
    pressure_sum: f64,
}

impl ResultWriter {
    fn init(&mut self, _ctx: &OutputContext) -> Result<()> {
        let mut f = BufWriter::new(File::create(format!("{}.res", self.prefix))?);
        writeln!(f, "# polymd results, started {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "# step\tU_pot/N\tpressure\tT")?;
        self.file = Some(f);
        Ok(())
    }

    fn write(&mut self, ctx: &OutputContext, step: u64) -> Result<()> {
        let upot = ctx.domain.average_global_upot();
        let pressure = ctx.domain.global_pressure();
        if let Some(f) = &mut self.file {
            writeln!(
                f,
                "{}\t{:.10}\t{:.10}\t{:.10}",
                step,
                upot,
                pressure,
                ctx.domain.temperature()
            )?;
            f.flush()?;
        }
        self.steps += 1;
        self.upot_sum += upot;
        self.pressure_sum += pressure;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let summary = ResultSummary {
            steps_recorded: self.steps,
            mean_upot_per_molecule: if self.steps > 0 {
                self.upot_sum / self.steps as f64
            } else {
                0.0
            },
            mean_pressure: if self.steps > 0 {
                self.pressure_sum / self.steps as f64
            } else {
                0.0
            },
        };
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| polymd_core::errors::PolymdError::internal(e.to_string()))?;
        std::fs::write(format!("{}.res.json", self.prefix), json)?;
        Ok(())
    }
}

pub struct PovWriter {
    prefix: String,
}

impl PovWriter {
    fn write(&mut self, ctx: &OutputContext, step: u64) -> Result<()> {
        let Some(records) = ctx.records else {
            return Ok(());
        };
        let path = step_path(&self.prefix, ctx.config.incremental_output, step, "pov");
        let mut w = BufWriter::new(File::create(path)?);
        let l = ctx.config.global_box;
        writeln!(w, "// polymd scene, step {}", step)?;
        writeln!(w, "#include \"colors.inc\"")?;
        writeln!(
            w,
            "camera {{ location <{:.2}, {:.2}, {:.2}> look_at <{:.2}, {:.2}, {:.2}> }}",
            l[0] * 1.5,
            l[1] * 1.5,
            l[2] * 1.5,
            l[0] * 0.5,
            l[1] * 0.5,
            l[2] * 0.5
        )?;
        writeln!(w, "light_source {{ <{:.2}, {:.2}, {:.2}> color White }}", l[0] * 2.0, l[1] * 2.0, l[2] * 2.0)?;
        for m in records {
            writeln!(
                w,
                "sphere {{ <{:.5}, {:.5}, {:.5}>, 0.5 pigment {{ color Blue }} }}",
                m.r[0], m.r[1], m.r[2]
            )?;
        }
        w.flush()?;
        Ok(())
    }
}

pub struct VisWriter {
    prefix: String,
}

impl VisWriter {
    fn write(&mut self, ctx: &OutputContext, step: u64) -> Result<()> {
        let Some(records) = ctx.records else {
            return Ok(());
        };
        let path = step_path(&self.prefix, ctx.config.incremental_output, step, "vis");
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "# id cid x y z q0 q1 q2 q3")?;
        for m in records {
            writeln!(
                w,
                "{} {} {:.8} {:.8} {:.8} {:.6} {:.6} {:.6} {:.6}",
                m.id, m.component_id, m.r[0], m.r[1], m.r[2], m.q.w, m.q.x, m.q.y, m.q.z
            )?;
        }
        w.flush()?;
        Ok(())
    }
}
