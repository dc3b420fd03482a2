//! A cell processor that counts work instead of doing it.
//!
//! Useful for traversal validation in tests and for a cheap flop estimate
//! of the force calculation (`--count-flops` in the CLI).

use polymd_core::domain::Domain;
use polymd_core::errors::Result;
use polymd_core::math::Vec3;

use crate::cells::{Cell, CellKind};
use crate::kernel::CellProcessor;

/// Flop cost model per counted event, matching the arithmetic of the
/// vectorized LJ path: distance check, kernel body, Newton-3 sum, and the
/// macroscopic tail.
const FLOPS_MOL_DIST: f64 = 8.0;
const FLOPS_LJ_KERNEL: f64 = 12.0;
const FLOPS_LJ_SUM: f64 = 6.0;
const FLOPS_MACRO: f64 = 7.0;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FlopCounts {
    /// Molecule-distance evaluations.
    pub mol_dist: f64,
    /// LJ site-pair force computations.
    pub lj_pairs: f64,
    /// Site pairs that also accumulate macroscopic values.
    pub macro_pairs: f64,
}

impl FlopCounts {
    pub fn flops(&self) -> f64 {
        self.mol_dist * FLOPS_MOL_DIST
            + self.lj_pairs * (FLOPS_LJ_KERNEL + FLOPS_LJ_SUM)
            + self.macro_pairs * FLOPS_MACRO
    }

    fn add(&mut self, other: &FlopCounts) {
        self.mol_dist += other.mol_dist;
        self.lj_pairs += other.lj_pairs;
        self.macro_pairs += other.macro_pairs;
    }
}

/// Lightweight per-cell snapshot taken at preprocess time.
#[derive(Debug, Default, Clone)]
struct CellSnapshot {
    positions: Vec<Vec3>,
    lj_counts: Vec<usize>,
}

pub struct PairFlopCounter {
    cutoff2: f64,
    current: FlopCounts,
    total: FlopCounts,
    cells: Vec<CellSnapshot>,
}

impl PairFlopCounter {
    pub fn new(cutoff: f64) -> Self {
        Self {
            cutoff2: cutoff * cutoff,
            current: FlopCounts::default(),
            total: FlopCounts::default(),
            cells: Vec::new(),
        }
    }

    pub fn current(&self) -> &FlopCounts {
        &self.current
    }

    pub fn total(&self) -> &FlopCounts {
        &self.total
    }
}

impl CellProcessor for PairFlopCounter {
    fn init_traversal(&mut self, num_cells: usize) {
        self.current = FlopCounts::default();
        if self.cells.len() < num_cells {
            self.cells.resize_with(num_cells, CellSnapshot::default);
        }
    }

    fn preprocess_cell(&mut self, idx: usize, cell: &Cell) {
        let snap = &mut self.cells[idx];
        snap.positions.clear();
        snap.lj_counts.clear();
        for m in &cell.molecules {
            snap.positions.push(m.r);
            snap.lj_counts.push(m.lj_pos.len());
        }
    }

    fn process_cell(&mut self, idx: usize, kind: CellKind) {
        if kind == CellKind::Halo {
            return;
        }
        let snap = &self.cells[idx];
        let n = snap.positions.len();
        let mut counts = FlopCounts::default();
        for i in 0..n {
            for j in (i + 1)..n {
                counts.mol_dist += 1.0;
                if dist2(snap.positions[i], snap.positions[j]) < self.cutoff2 {
                    let pairs = (snap.lj_counts[i] * snap.lj_counts[j]) as f64;
                    counts.lj_pairs += pairs;
                    counts.macro_pairs += pairs;
                }
            }
        }
        self.current.add(&counts);
    }

    fn process_cell_pair(&mut self, c1: usize, k1: CellKind, c2: usize, k2: CellKind) {
        if k1 == CellKind::Halo && k2 == CellKind::Halo {
            return;
        }
        let one_halo = (k1 == CellKind::Halo) != (k2 == CellKind::Halo);
        let macroscopic = if one_halo { c1 < c2 } else { true };

        let mut counts = FlopCounts::default();
        {
            let (s1, s2) = (&self.cells[c1], &self.cells[c2]);
            for (i, ri) in s1.positions.iter().enumerate() {
                for (j, rj) in s2.positions.iter().enumerate() {
                    counts.mol_dist += 1.0;
                    if dist2(*ri, *rj) < self.cutoff2 {
                        let pairs = (s1.lj_counts[i] * s2.lj_counts[j]) as f64;
                        counts.lj_pairs += pairs;
                        if macroscopic {
                            counts.macro_pairs += pairs;
                        }
                    }
                }
            }
        }
        self.current.add(&counts);
    }

    fn postprocess_cell(&mut self, _idx: usize, _cell: &mut Cell) -> Result<()> {
        Ok(())
    }

    fn end_traversal(&mut self, _domain: &mut Domain) {
        self.total.add(&self.current);
        log::info!(
            "flop count: {:.0} molecule distances, {:.0} LJ site pairs, {:.0} macroscopic pairs, ~{:.3e} flops",
            self.current.mol_dist,
            self.current.lj_pairs,
            self.current.macro_pairs,
            self.current.flops()
        );
    }
}

#[inline]
fn dist2(a: Vec3, b: Vec3) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}
