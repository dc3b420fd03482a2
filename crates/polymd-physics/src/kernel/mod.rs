//! Cell processors: the pair-interaction kernels and diagnostics.
//!
//! A [`CellProcessor`] is stateful across one whole traversal: accumulators
//! reset in `init_traversal`, per-cell buffers built in `preprocess_cell`,
//! interactions computed in `process_cell` / `process_cell_pair`, forces
//! scattered back in `postprocess_cell`, and the macroscopic sums folded
//! into the domain in `end_traversal`.

pub mod flops;
pub mod pairs;
pub mod processor;

use polymd_core::domain::Domain;
use polymd_core::errors::Result;

use crate::cells::{Cell, CellKind};

pub trait CellProcessor {
    fn init_traversal(&mut self, num_cells: usize);

    /// Build per-cell state (e.g. the SoA buffer) from the cell's
    /// molecules.
    fn preprocess_cell(&mut self, idx: usize, cell: &Cell);

    /// Self-interactions inside one owned cell.
    fn process_cell(&mut self, idx: usize, kind: CellKind);

    /// Cross-interactions between two cells. Macroscopic accumulation
    /// follows the halo rule: both owned counts, exactly one halo counts
    /// only when `c1 < c2`, both halo is skipped.
    fn process_cell_pair(&mut self, c1: usize, k1: CellKind, c2: usize, k2: CellKind);

    /// Scatter per-site forces/torques back onto the owning molecules.
    fn postprocess_cell(&mut self, idx: usize, cell: &mut Cell) -> Result<()>;

    /// Fold the traversal's macroscopic sums into the domain.
    fn end_traversal(&mut self, domain: &mut Domain);
}
