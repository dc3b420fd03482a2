//! The SoA-backed pair processor, instantiated per SIMD backend.

use std::marker::PhantomData;
use std::sync::Arc;

use polymd_core::component::ComponentTable;
use polymd_core::domain::Domain;
use polymd_core::errors::Result;

use crate::cells::{Cell, CellKind};
use crate::kernel::pairs::{calculate_cell, calculate_cell_pair, MacroSums, Scratch};
use crate::kernel::CellProcessor;
use crate::simd::SimdReal;
use crate::soa::CellSoA;

/// Computes forces, torques, and macroscopic sums for all site pairs
/// within the cutoff. One SoA buffer is kept per cell for the duration of
/// a traversal.
pub struct PairProcessor<V: SimdReal> {
    table: Arc<ComponentTable>,
    cutoff2: f64,
    eps_rf_inv_rc3: f64,
    sums: MacroSums,
    soas: Vec<CellSoA>,
    scratch: Scratch,
    _backend: PhantomData<V>,
}

/// The production kernel (four f64 lanes).
pub type VectorizedCellProcessor = PairProcessor<wide::f64x4>;

/// The scalar oracle; same code path at width one.
pub type ReferenceCellProcessor = PairProcessor<f64>;

impl<V: SimdReal> PairProcessor<V> {
    pub fn new(table: Arc<ComponentTable>) -> Self {
        let cutoff = table.cutoff();
        let eps_rf_inv_rc3 = table.eps_rf_inv_rc3();
        log::debug!("pair processor: {}-lane backend", V::WIDTH);
        Self {
            table,
            cutoff2: cutoff * cutoff,
            eps_rf_inv_rc3,
            sums: MacroSums::default(),
            soas: Vec::new(),
            scratch: Scratch::default(),
            _backend: PhantomData,
        }
    }

    /// The raw accumulators of the current traversal (tests use these).
    pub fn sums(&self) -> &MacroSums {
        &self.sums
    }

    pub fn soa(&self, idx: usize) -> &CellSoA {
        &self.soas[idx]
    }

    pub fn soa_mut(&mut self, idx: usize) -> &mut CellSoA {
        &mut self.soas[idx]
    }
}

impl<V: SimdReal> CellProcessor for PairProcessor<V> {
    fn init_traversal(&mut self, num_cells: usize) {
        self.sums.reset();
        if self.soas.len() < num_cells {
            if !self.soas.is_empty() {
                log::warn!(
                    "SoA pool grows from {} to {} cells beyond its preallocation",
                    self.soas.len(),
                    num_cells
                );
            }
            self.soas.resize_with(num_cells, CellSoA::default);
        }
    }

    fn preprocess_cell(&mut self, idx: usize, cell: &Cell) {
        let Self { soas, table, .. } = self;
        soas[idx].fill(&cell.molecules, table);
    }

    fn process_cell(&mut self, idx: usize, kind: CellKind) {
        if kind == CellKind::Halo {
            return;
        }
        let Self {
            soas,
            table,
            sums,
            scratch,
            cutoff2,
            eps_rf_inv_rc3,
            ..
        } = self;
        if soas[idx].mol_num < 2 {
            return;
        }
        calculate_cell::<V, true>(&mut soas[idx], table, *cutoff2, *eps_rf_inv_rc3, sums, scratch);
    }

    fn process_cell_pair(&mut self, c1: usize, k1: CellKind, c2: usize, k2: CellKind) {
        debug_assert_ne!(c1, c2);
        if k1 == CellKind::Halo && k2 == CellKind::Halo {
            return;
        }
        let one_halo = (k1 == CellKind::Halo) != (k2 == CellKind::Halo);
        // Both owned: always accumulate macroscopics. Exactly one halo:
        // only for the lower-index first cell, which visits each periodic
        // pair image exactly once.
        let macroscopic = if one_halo { c1 < c2 } else { true };

        let Self {
            soas,
            table,
            sums,
            scratch,
            cutoff2,
            eps_rf_inv_rc3,
            ..
        } = self;

        let (soa1, soa2) = if c1 < c2 {
            let (lo, hi) = soas.split_at_mut(c2);
            (&mut lo[c1], &mut hi[0])
        } else {
            let (lo, hi) = soas.split_at_mut(c1);
            (&mut hi[0], &mut lo[c2])
        };

        if macroscopic {
            calculate_cell_pair::<V, true>(soa1, soa2, table, *cutoff2, *eps_rf_inv_rc3, sums, scratch);
        } else {
            calculate_cell_pair::<V, false>(soa1, soa2, table, *cutoff2, *eps_rf_inv_rc3, sums, scratch);
        }
    }

    fn postprocess_cell(&mut self, idx: usize, cell: &mut Cell) -> Result<()> {
        self.soas[idx].scatter(&mut cell.molecules)
    }

    fn end_traversal(&mut self, domain: &mut Domain) {
        domain.set_local_potential(
            self.sums.upot6lj / 6.0 + self.sums.upot_xpoles + self.sums.my_rf,
            self.sums.virial + 3.0 * self.sums.my_rf,
        );
    }
}
