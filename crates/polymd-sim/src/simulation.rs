//! The per-step loop.
//!
//! Order per step: integrator pre-force, molecule exchange (leaving and
//! halo copies), cache rebuild, cell update, pair traversal, halo
//! clearing, integrator post-force, global reduction, thermostat scaling,
//! plugins, output. The overlapped variant splits the halo exchange into
//! stages and computes inner cells while ghosts are in flight.

use std::path::PathBuf;
use std::sync::Arc;

use polymd_core::component::{Component, ComponentTable};
use polymd_core::config::SimulationConfig;
use polymd_core::domain::Domain;
use polymd_core::errors::Result;
use polymd_core::molecule::MoleculeRecord;
use polymd_io::writers::{OutputContext, OutputWriter};
use polymd_io::write_checkpoint;
use polymd_parallel::decomp::Decomposition;
use polymd_parallel::partner::MessageType;
use polymd_physics::cells::LinkedCells;
use polymd_physics::integrator::Leapfrog;
use polymd_physics::{PairFlopCounter, VectorizedCellProcessor};

use crate::plugins::Plugin;

pub struct Simulation {
    config: SimulationConfig,
    table: Arc<ComponentTable>,
    domain: Domain,
    container: LinkedCells,
    decomp: Decomposition,
    integrator: Leapfrog,
    processor: VectorizedCellProcessor,
    writers: Vec<OutputWriter>,
    plugins: Vec<Plugin>,
    flop_counter: Option<PairFlopCounter>,
    step: u64,
}

impl Simulation {
    /// Build one rank's simulation. Molecules outside this rank's
    /// subdomain are ignored (every rank is handed the full initial
    /// state and keeps its share).
    pub fn new(
        config: SimulationConfig,
        components: Vec<Component>,
        molecules: &[MoleculeRecord],
        decomp: Decomposition,
    ) -> Result<Self> {
        config.validate()?;
        let table = Arc::new(ComponentTable::build(
            components,
            config.cutoff_radius,
            config.epsilon_rf,
        )?);

        let (lo, hi) = decomp.bounding_box();
        let mut container =
            LinkedCells::new(lo, hi, config.cutoff_radius, config.cells_in_cutoff)?;

        let global = config.global_box;
        let mut owned = 0usize;
        for rec in molecules {
            let mut rec = rec.clone();
            for d in 0..3 {
                rec.r[d] = rec.r[d].rem_euclid(global[d]);
            }
            if container.owns_position(rec.r) {
                container.insert(rec.into_molecule());
                owned += 1;
            }
        }
        log::info!(
            "rank {}: owns {} of {} molecules",
            decomp.rank(),
            owned,
            molecules.len()
        );

        let domain = Domain::new(global, config.epsilon_rf, config.target_temperature);
        let integrator = Leapfrog::new(config.timestep_length);
        let processor = VectorizedCellProcessor::new(table.clone());

        // Writers live on rank 0; other ranks only feed the gathers.
        let writers = if decomp.rank() == 0 {
            config
                .output_writers
                .iter()
                .map(|k| OutputWriter::new(*k, &config))
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            config,
            table,
            domain,
            container,
            decomp,
            integrator,
            processor,
            writers,
            plugins: Vec::new(),
            flop_counter: None,
            step: 0,
        })
    }

    pub fn add_plugin(&mut self, plugin: Plugin) {
        self.plugins.push(plugin);
    }

    pub fn enable_flop_counting(&mut self) {
        self.flop_counter = Some(PairFlopCounter::new(self.config.cutoff_radius));
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn container(&self) -> &LinkedCells {
        &self.container
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn table(&self) -> &ComponentTable {
        &self.table
    }

    /// Owned molecules of this rank.
    pub fn owned_records(&self) -> Vec<MoleculeRecord> {
        self.container.owned_records()
    }

    /// All molecules, gathered on rank 0.
    pub fn gathered_records(&mut self) -> Result<Option<Vec<MoleculeRecord>>> {
        let records = self.container.owned_records();
        self.decomp.gather_to_root(records)
    }

    /// Compute the initial forces and global values, then run all
    /// configured timesteps and write the final checkpoint.
    pub fn run(&mut self) -> Result<()> {
        self.initialize()?;
        if self.decomp.rank() == 0 {
            log::info!(
                "starting simulation: {} steps of dt {}",
                self.config.num_timesteps,
                self.config.timestep_length
            );
        }
        for _ in 0..self.config.num_timesteps {
            self.step_once()?;
        }
        self.finish()
    }

    /// Initial force evaluation so the first pre-force kick sees step-0
    /// forces.
    pub fn initialize(&mut self) -> Result<()> {
        self.exchange_and_compute_forces()?;
        self.reduce_global_values()?;
        for w in &mut self.writers {
            let ctx = OutputContext {
                config: &self.config,
                table: &self.table,
                domain: &self.domain,
                records: None,
            };
            w.init(&ctx)?;
        }
        Ok(())
    }

    /// One full timestep.
    pub fn step_once(&mut self) -> Result<()> {
        self.step += 1;
        let table = self.table.clone();

        // 1. Pre-force half-step.
        self.container.for_each_owned_mut(|m| {
            let comp = table.component(m.component_id as usize);
            self.integrator.pre_force(m, comp);
        });

        // 2-6. Exchange, caches, cell update, traversal, halo clearing.
        self.exchange_and_compute_forces()?;

        // 7. Post-force half-step.
        self.container.for_each_owned_mut(|m| {
            let comp = table.component(m.component_id as usize);
            self.integrator.post_force(m, comp);
        });

        // 8. Global sums and temperature factors.
        self.reduce_global_values()?;

        // 9. Velocity scaling.
        if self.domain.thermostat_enabled() {
            let beta_trans = self.domain.beta_trans();
            let beta_rot = self.domain.beta_rot();
            self.container.for_each_owned_mut(|m| {
                m.scale_v(beta_trans);
                m.scale_d(beta_rot);
            });
        }

        // 10. Time, plugins, output.
        self.domain.advance_time(self.integrator.timestep_length());
        let mut plugins = std::mem::take(&mut self.plugins);
        for p in &mut plugins {
            p.after_forces(&mut self.container, &self.table, self.step);
        }
        self.plugins = plugins;

        self.output(self.step)?;
        Ok(())
    }

    /// Final checkpoint (`<prefix>.restart.inp`) plus writer teardown.
    pub fn finish(&mut self) -> Result<()> {
        let gathered = self.gathered_records()?;
        if let Some(records) = &gathered {
            let path = PathBuf::from(format!("{}.restart.inp", self.config.output_prefix));
            write_checkpoint(&path, &self.config, &self.table, records)?;
            log::info!("wrote final checkpoint {}", path.display());
        }
        let ctx = OutputContext {
            config: &self.config,
            table: &self.table,
            domain: &self.domain,
            records: gathered.as_deref(),
        };
        for w in &mut self.writers {
            w.finish(&ctx)?;
        }
        Ok(())
    }

    fn exchange_and_compute_forces(&mut self) -> Result<()> {
        self.container.delete_outer_particles();

        if self.config.overlap_communication && self.decomp.num_ranks() > 1 {
            self.overlapped_exchange_and_traversal()?;
        } else {
            self.decomp
                .exchange_molecules(&mut self.container, MessageType::LeavingAndHaloCopies)?;
            self.container.update();
            self.container.update_caches(&self.table, false);
            self.run_flop_pass()?;
            self.container
                .traverse_pairs(&mut self.processor, &mut self.domain)?;
        }

        self.container.delete_outer_particles();
        Ok(())
    }

    /// The overlapped variant: leaving molecules migrate first, then each
    /// halo-copy stage is posted, a slice of the inner cells is computed
    /// while it is in flight, and the stage is completed. The cells that
    /// depend on halo state run last.
    fn overlapped_exchange_and_traversal(&mut self) -> Result<()> {
        self.decomp
            .exchange_molecules(&mut self.container, MessageType::LeavingOnly)?;
        self.container.update();
        self.container.update_caches(&self.table, false);
        self.run_flop_pass_overlapped()?;

        let stage_count = self.decomp.stage_count();
        self.container.begin_overlapped_traversal(&mut self.processor);
        for stage in 0..stage_count {
            self.decomp
                .prepare_stage(&mut self.container, stage, MessageType::HaloCopies)?;
            self.container
                .traverse_partial_innermost_cells(&mut self.processor, stage, stage_count);
            self.decomp.finish_stage(&mut self.container, stage)?;
        }
        self.container.update_caches(&self.table, true);
        self.container.traverse_non_innermost_cells(&mut self.processor);
        self.container
            .finish_traversal(&mut self.processor, &mut self.domain)
    }

    /// Extra diagnostic traversal when flop counting is on.
    fn run_flop_pass(&mut self) -> Result<()> {
        if let Some(counter) = &mut self.flop_counter {
            self.container.traverse_pairs(counter, &mut self.domain)?;
        }
        Ok(())
    }

    fn run_flop_pass_overlapped(&mut self) -> Result<()> {
        // The counter only sees owned molecules here; ghosts are still in
        // flight. Good enough for the estimate it provides.
        self.run_flop_pass()
    }

    fn reduce_global_values(&mut self) -> Result<()> {
        let table = self.table.clone();
        let mut num = 0usize;
        let mut rot_dof = 0usize;
        let mut ekin_trans2 = 0.0;
        let mut ekin_rot2 = 0.0;
        self.container.for_each_owned(|m| {
            let comp = table.component(m.component_id as usize);
            num += 1;
            rot_dof += comp.rotational_dof();
            ekin_trans2 += m.ekin_trans2(comp);
            ekin_rot2 += m.ekin_rot2(comp);
        });
        self.domain
            .set_local_kinetics(num, rot_dof, ekin_trans2, ekin_rot2);

        let local = self.domain.local_reduction();
        let reduced = self.decomp.allreduce_sum(&local)?;
        let mut arr = [0.0; polymd_core::domain::REDUCTION_WIDTH];
        arr.copy_from_slice(&reduced);
        self.domain.apply_global_reduction(&arr);
        Ok(())
    }

    fn output(&mut self, step: u64) -> Result<()> {
        let due = step % self.config.output_frequency == 0;
        if !due {
            return Ok(());
        }
        // Console line on rank 0, as every step's summary.
        if self.decomp.rank() == 0 {
            log::info!(
                "step {}\tU_pot/N {:.6}\tp {:.6}\tT {:.6}",
                step,
                self.domain.average_global_upot(),
                self.domain.global_pressure(),
                self.domain.temperature()
            );
        }

        let need_molecules = self.writers.iter().any(|w| w.needs_molecules());
        // The gather is a collective: every rank participates whenever
        // rank 0 has a molecule-consuming writer.
        let any_molecule_writer = self
            .decomp
            .allreduce_sum(&[if need_molecules { 1.0 } else { 0.0 }])?[0]
            > 0.0;
        let gathered = if any_molecule_writer {
            let records = self.container.owned_records();
            self.decomp.gather_to_root(records)?
        } else {
            None
        };

        let ctx = OutputContext {
            config: &self.config,
            table: &self.table,
            domain: &self.domain,
            records: gathered.as_deref(),
        };
        for w in &mut self.writers {
            w.per_step(&ctx, step)?;
        }
        Ok(())
    }
}
