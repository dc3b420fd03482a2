//! polymd CLI entry point.
//!
//! Parallel molecular dynamics for rigid multi-site molecules with
//! Lennard-Jones, charge, dipole, and quadrupole sites.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use polymd_core::component::Component;
use polymd_core::config::{DecompKind, ExchangePattern, SimulationConfig, WriterKind};
use polymd_core::errors::PolymdError;
use polymd_io::{generate_cubic_lattice, load_input, PhaseSpaceData};
use polymd_parallel::decomp::Decomposition;
use polymd_parallel::transport::LocalRing;
use polymd_sim::{MirrorDirection, MirrorKind, MirrorPlugin, Plugin, Simulation};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "polymd")]
#[command(version = VERSION)]
#[command(about = "Parallel MD for rigid multi-site molecules", long_about = None)]
struct Args {
    /// Input file: XML configuration (.xml) or ASCII phase space.
    ///
    /// Optional when --generate is used.
    input: Option<PathBuf>,

    /// Number of timesteps to run.
    #[arg(short = 't', long)]
    timesteps: u64,

    /// Comma-separated output writers (subset of pov,vis,res,ckp,xyz).
    #[arg(short = 'o', long, default_value = "ckp")]
    output: String,

    /// Steps between periodic output.
    #[arg(short = 'f', long = "output-frequency", default_value_t = 100)]
    output_frequency: u64,

    /// Prefix for all output files.
    #[arg(short = 'p', long = "output-filename", default_value = "default")]
    output_filename: String,

    /// Number output files instead of overwriting them.
    #[arg(short = 'i', long)]
    incremental: bool,

    /// Ranks to run (threads over the in-process transport).
    #[arg(long, default_value_t = 1)]
    ranks: usize,

    /// Decomposition: grid or kd.
    #[arg(long, default_value = "grid")]
    decomp: String,

    /// Exchange one axis at a time instead of the full shell.
    #[arg(long)]
    three_stage: bool,

    /// Overlap halo exchange with inner-cell computation.
    #[arg(long)]
    overlap: bool,

    /// Generate N molecules on a cubic lattice instead of reading a
    /// phase space.
    #[arg(long)]
    generate: Option<usize>,

    /// Box edge length for --generate.
    #[arg(long, default_value_t = 10.0)]
    box_length: f64,

    /// Initial temperature for --generate (reduced units).
    #[arg(long, default_value_t = 1.0)]
    temperature: f64,

    /// Log a flop estimate of the force calculation each step.
    #[arg(long)]
    count_flops: bool,

    /// Mirror plane position along y; molecules moving past it are
    /// sent back towards lower y by the selected rule.
    #[arg(long)]
    mirror: Option<f64>,

    /// Mirror rule: reflect, diffuse, probabilistic, or ramped.
    #[arg(long, default_value = "reflect")]
    mirror_kind: String,

    /// Wall temperature for the diffuse mirror rule.
    #[arg(long, default_value_t = 1.0)]
    mirror_temperature: f64,

    /// Reflection probability for the probabilistic mirror rule.
    #[arg(long, default_value_t = 0.5)]
    mirror_ratio: f64,

    /// First step of the ramped mirror rule's ramp.
    #[arg(long, default_value_t = 0)]
    mirror_ramp_start: u64,

    /// Step at which the ramped mirror rule reaches full reflection.
    #[arg(long, default_value_t = 1000)]
    mirror_ramp_stop: u64,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e)
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = e.print();
            return;
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    if let Err(err) = run(args) {
        log::error!("{}", err);
        let code = err
            .downcast_ref::<PolymdError>()
            .map(|e| e.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.timesteps == 0 {
        anyhow::bail!(PolymdError::config("-t/--timesteps must be positive"));
    }

    let mut data = resolve_input(&args)?;

    data.config.num_timesteps = args.timesteps;
    data.config.output_frequency = args.output_frequency;
    data.config.output_prefix = args.output_filename.clone();
    data.config.incremental_output = args.incremental;
    data.config.num_ranks = args.ranks;
    data.config.decomp = match args.decomp.as_str() {
        "grid" => DecompKind::Grid,
        "kd" => DecompKind::KdTree,
        other => {
            anyhow::bail!(PolymdError::config(format!(
                "unknown decomposition '{}' (expected grid or kd)",
                other
            )))
        }
    };
    data.config.exchange_pattern = if args.three_stage {
        ExchangePattern::ThreeStage
    } else {
        ExchangePattern::FullShell
    };
    data.config.overlap_communication = args.overlap;

    let mut writers = Vec::new();
    for token in args.output.split(',').filter(|s| !s.is_empty()) {
        writers.push(WriterKind::parse(token.trim())?);
    }
    data.config.output_writers = writers;
    data.config.validate()?;

    // Resolve (and validate) the mirror setup before any rank starts.
    let mirror = match args.mirror {
        Some(pos) => {
            let kind = mirror_kind(&args)?;
            MirrorPlugin::new(1, pos, MirrorDirection::TowardLower, kind, 0)?;
            Some((pos, kind))
        }
        None => None,
    };

    if args.ranks == 1 {
        let decomp =
            Decomposition::sequential(data.config.global_box, data.config.cutoff_radius);
        let mut sim = Simulation::new(
            data.config.clone(),
            data.components.clone(),
            &data.molecules,
            decomp,
        )?;
        configure_sim(&mut sim, &args, mirror, 0)?;
        sim.run()?;
        return Ok(());
    }

    // One thread per rank over the in-process transport.
    let endpoints = LocalRing::connect(args.ranks);
    let count_flops = args.count_flops;
    let mut handles = Vec::new();
    for endpoint in endpoints {
        let config = data.config.clone();
        let components = data.components.clone();
        let molecules = data.molecules.clone();
        handles.push(std::thread::spawn(move || -> Result<(), PolymdError> {
            let rank = endpoint.rank();
            let decomp = Decomposition::parallel(
                endpoint,
                config.global_box,
                config.cutoff_radius,
                config.decomp,
                config.exchange_pattern,
                Duration::from_secs_f64(config.deadlock_timeout_secs),
            )?;
            let mut sim = Simulation::new(config, components, &molecules, decomp)?;
            if count_flops {
                sim.enable_flop_counting();
            }
            if let Some((pos, kind)) = mirror {
                sim.add_plugin(Plugin::Mirror(MirrorPlugin::new(
                    1,
                    pos,
                    MirrorDirection::TowardLower,
                    kind,
                    rank,
                )?));
            }
            sim.run()
        }));
    }

    let mut first_error: Option<PolymdError> = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(_) => {
                if first_error.is_none() {
                    first_error = Some(PolymdError::internal("a rank thread panicked"));
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e.into());
    }
    Ok(())
}

fn configure_sim(
    sim: &mut Simulation,
    args: &Args,
    mirror: Option<(f64, MirrorKind)>,
    rank: usize,
) -> Result<(), PolymdError> {
    if args.count_flops {
        sim.enable_flop_counting();
    }
    if let Some((pos, kind)) = mirror {
        sim.add_plugin(Plugin::Mirror(MirrorPlugin::new(
            1,
            pos,
            MirrorDirection::TowardLower,
            kind,
            rank,
        )?));
    }
    Ok(())
}

/// The mirror rule selected by the `--mirror-*` options.
fn mirror_kind(args: &Args) -> Result<MirrorKind, PolymdError> {
    match args.mirror_kind.as_str() {
        "reflect" => Ok(MirrorKind::Reflect),
        "diffuse" => Ok(MirrorKind::Diffuse {
            temperature: args.mirror_temperature,
        }),
        "probabilistic" => Ok(MirrorKind::Probabilistic {
            ratio: args.mirror_ratio,
        }),
        "ramped" => Ok(MirrorKind::Ramped {
            start_step: args.mirror_ramp_start,
            stop_step: args.mirror_ramp_stop,
        }),
        other => Err(PolymdError::config(format!(
            "unknown mirror kind '{}' (expected reflect|diffuse|probabilistic|ramped)",
            other
        ))),
    }
}

fn resolve_input(args: &Args) -> anyhow::Result<PhaseSpaceData> {
    if let Some(n) = args.generate {
        let mut config = SimulationConfig::default();
        config.global_box = [args.box_length; 3];
        let component = Component::single_lj(0, 1.0, 1.0, 1.0);
        let molecules =
            generate_cubic_lattice(n, config.global_box, args.temperature, &component, 4711)?;
        log::info!(
            "generated {} molecules on a cubic lattice at T = {}",
            n,
            args.temperature
        );
        return Ok(PhaseSpaceData {
            config,
            components: vec![component],
            molecules,
        });
    }

    let path = args
        .input
        .as_ref()
        .ok_or_else(|| PolymdError::config("an input file (or --generate) is required"))?;
    Ok(load_input(path)?)
}
