//! Linked-cells particle container.
//!
//! The subdomain (plus a halo ring wider than the cutoff) is partitioned
//! into uniform cells of side >= cutoff / k. Cells are classified once:
//! halo cells lie outside the owned box, boundary cells are owned cells
//! within one cutoff of it, inner cells are the rest. Inner cells are
//! exactly the set whose pair computation never touches halo state, which
//! is what the overlapped traversal stages rely on.
//!
//! Pair traversal: every non-halo cell is visited once as the "outer"
//! cell; forward neighbours are always paired, backward neighbours only
//! when they are halo cells. Each unordered pair is therefore produced
//! exactly once and halo-halo pairs never appear.

use polymd_core::domain::Domain;
use polymd_core::errors::{PolymdError, Result};
use polymd_core::math::Vec3;
use polymd_core::molecule::{Molecule, MoleculeRecord};

use crate::kernel::CellProcessor;

/// Cell classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Owned, and all pair partners are owned as well.
    Inner,
    /// Owned, within one cutoff of the subdomain boundary.
    Boundary,
    /// Outside the owned box, within one cutoff of it.
    Halo,
}

/// One spatial bucket.
#[derive(Debug, Default)]
pub struct Cell {
    pub molecules: Vec<Molecule>,
}

pub struct LinkedCells {
    bbox_min: Vec3,
    bbox_max: Vec3,
    cutoff: f64,
    cell_len: Vec3,
    /// Cells covering the owned box, per axis.
    inner_dims: [usize; 3],
    /// Halo ring width in cells, per axis.
    halo_width: [usize; 3],
    /// Total grid dimensions including the halo ring.
    dims: [usize; 3],
    cells: Vec<Cell>,
    kinds: Vec<CellKind>,
    /// Lexicographically positive neighbour offsets within the cutoff.
    forward_offsets: Vec<[isize; 3]>,
    /// Inner (innermost) cell indices, the overlap stages partition these.
    inner_cells: Vec<usize>,
}

impl LinkedCells {
    pub fn new(bbox_min: Vec3, bbox_max: Vec3, cutoff: f64, cells_in_cutoff: usize) -> Result<Self> {
        if cells_in_cutoff < 1 {
            return Err(PolymdError::config("cells per cutoff must be at least 1"));
        }
        let mut inner_dims = [0usize; 3];
        let mut cell_len = [0.0; 3];
        let mut halo_width = [0usize; 3];
        let mut dims = [0usize; 3];
        for d in 0..3 {
            let extent = bbox_max[d] - bbox_min[d];
            if extent < cutoff {
                return Err(PolymdError::config(format!(
                    "subdomain extent {} in axis {} is below the cutoff {}",
                    extent, d, cutoff
                )));
            }
            let n = ((extent * cells_in_cutoff as f64 / cutoff).floor() as usize).max(1);
            inner_dims[d] = n;
            cell_len[d] = extent / n as f64;
            halo_width[d] = (cutoff / cell_len[d]).ceil() as usize;
            dims[d] = n + 2 * halo_width[d];
        }

        let num_cells = dims[0] * dims[1] * dims[2];
        let mut cells = Vec::with_capacity(num_cells);
        cells.resize_with(num_cells, Cell::default);

        let mut kinds = Vec::with_capacity(num_cells);
        let mut inner_cells = Vec::new();
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    let kind = classify([x, y, z], inner_dims, halo_width);
                    if kind == CellKind::Inner {
                        inner_cells.push(kinds.len());
                    }
                    kinds.push(kind);
                }
            }
        }

        let rc2 = cutoff * cutoff;
        let mut forward_offsets = Vec::new();
        let reach = halo_width;
        for dz in -(reach[2] as isize)..=(reach[2] as isize) {
            for dy in -(reach[1] as isize)..=(reach[1] as isize) {
                for dx in -(reach[0] as isize)..=(reach[0] as isize) {
                    let forward = dz > 0 || (dz == 0 && (dy > 0 || (dy == 0 && dx > 0)));
                    if !forward {
                        continue;
                    }
                    let mut dist2 = 0.0;
                    let off = [dx, dy, dz];
                    for d in 0..3 {
                        let gap = (off[d].unsigned_abs().saturating_sub(1)) as f64 * cell_len[d];
                        dist2 += gap * gap;
                    }
                    if dist2 <= rc2 {
                        forward_offsets.push(off);
                    }
                }
            }
        }

        log::debug!(
            "LinkedCells: dims {:?} (inner {:?}, halo {:?}), {} forward offsets",
            dims,
            inner_dims,
            halo_width,
            forward_offsets.len()
        );

        Ok(Self {
            bbox_min,
            bbox_max,
            cutoff,
            cell_len,
            inner_dims,
            halo_width,
            dims,
            cells,
            kinds,
            forward_offsets,
            inner_cells,
        })
    }

    pub fn bbox(&self) -> (Vec3, Vec3) {
        (self.bbox_min, self.bbox_max)
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn kind(&self, idx: usize) -> CellKind {
        self.kinds[idx]
    }

    #[inline]
    fn linear(&self, idx3: [usize; 3]) -> usize {
        (idx3[2] * self.dims[1] + idx3[1]) * self.dims[0] + idx3[0]
    }

    /// Cell index of a position; positions beyond the halo ring clamp to
    /// the outermost layer (they are about to be exchanged away anyway).
    pub fn cell_index_of(&self, r: Vec3) -> usize {
        let mut idx3 = [0usize; 3];
        for d in 0..3 {
            let rel = (r[d] - self.bbox_min[d]) / self.cell_len[d];
            let idx = rel.floor() as isize + self.halo_width[d] as isize;
            idx3[d] = idx.clamp(0, self.dims[d] as isize - 1) as usize;
        }
        self.linear(idx3)
    }

    /// True if the position lies inside the owned box.
    pub fn owns_position(&self, r: Vec3) -> bool {
        (0..3).all(|d| r[d] >= self.bbox_min[d] && r[d] < self.bbox_max[d])
    }

    pub fn insert(&mut self, molecule: Molecule) {
        let idx = self.cell_index_of(molecule.r);
        self.cells[idx].molecules.push(molecule);
    }

    /// Relocate molecules whose positions crossed cell boundaries.
    pub fn update(&mut self) {
        let mut moved = Vec::new();
        for idx in 0..self.cells.len() {
            let taken = std::mem::take(&mut self.cells[idx].molecules);
            let mut keep = Vec::with_capacity(taken.len());
            for m in taken {
                if self.cell_index_of(m.r) == idx {
                    keep.push(m);
                } else {
                    moved.push(m);
                }
            }
            self.cells[idx].molecules = keep;
        }
        for m in moved {
            self.insert(m);
        }
    }

    /// Discard all halo molecules (ghosts are regenerated every exchange).
    pub fn delete_outer_particles(&mut self) {
        for idx in 0..self.cells.len() {
            if self.kinds[idx] == CellKind::Halo {
                self.cells[idx].molecules.clear();
            }
        }
    }

    pub fn num_owned(&self) -> usize {
        self.cells
            .iter()
            .zip(&self.kinds)
            .filter(|(_, k)| **k != CellKind::Halo)
            .map(|(c, _)| c.molecules.len())
            .sum()
    }

    /// Visit every owned molecule mutably.
    pub fn for_each_owned_mut(&mut self, mut f: impl FnMut(&mut Molecule)) {
        for (cell, kind) in self.cells.iter_mut().zip(&self.kinds) {
            if *kind != CellKind::Halo {
                for m in &mut cell.molecules {
                    f(m);
                }
            }
        }
    }

    pub fn for_each_owned(&self, mut f: impl FnMut(&Molecule)) {
        for (cell, kind) in self.cells.iter().zip(&self.kinds) {
            if *kind != CellKind::Halo {
                for m in &cell.molecules {
                    f(m);
                }
            }
        }
    }

    pub fn owned_records(&self) -> Vec<MoleculeRecord> {
        let mut out = Vec::with_capacity(self.num_owned());
        self.for_each_owned(|m| out.push(MoleculeRecord::from_molecule(m)));
        out
    }

    /// Rebuild world-frame site caches. `halo_only` restricts the pass to
    /// ghost molecules (used after a halo-copy stage completes).
    pub fn update_caches(&mut self, table: &polymd_core::component::ComponentTable, halo_only: bool) {
        for (cell, kind) in self.cells.iter_mut().zip(&self.kinds) {
            if halo_only && *kind != CellKind::Halo {
                continue;
            }
            for m in &mut cell.molecules {
                m.update_cache(table.component(m.component_id as usize));
            }
        }
    }

    fn region_candidate_cells(&self, lo: Vec3, hi: Vec3) -> Vec<usize> {
        // Inflate by one cell: a molecule can sit one cell away from the
        // bucket matching its current position until `update` runs.
        let mut lo3 = [0usize; 3];
        let mut hi3 = [0usize; 3];
        for d in 0..3 {
            let l = ((lo[d] - self.bbox_min[d]) / self.cell_len[d]).floor() as isize
                + self.halo_width[d] as isize
                - 1;
            let h = ((hi[d] - self.bbox_min[d]) / self.cell_len[d]).ceil() as isize
                + self.halo_width[d] as isize
                + 1;
            lo3[d] = l.clamp(0, self.dims[d] as isize - 1) as usize;
            hi3[d] = h.clamp(0, self.dims[d] as isize) as usize;
        }
        let mut out = Vec::new();
        for z in lo3[2]..hi3[2] {
            for y in lo3[1]..hi3[1] {
                for x in lo3[0]..hi3[0] {
                    out.push(self.linear([x, y, z]));
                }
            }
        }
        out
    }

    /// Copy records of molecules inside the half-open box [lo, hi).
    pub fn collect_region(&self, lo: Vec3, hi: Vec3, include_halo: bool) -> Vec<MoleculeRecord> {
        let mut out = Vec::new();
        for idx in self.region_candidate_cells(lo, hi) {
            if !include_halo && self.kinds[idx] == CellKind::Halo {
                continue;
            }
            for m in &self.cells[idx].molecules {
                if in_box(m.r, lo, hi) {
                    out.push(MoleculeRecord::from_molecule(m));
                }
            }
        }
        out
    }

    /// Remove and return molecules inside [lo, hi).
    pub fn extract_region(&mut self, lo: Vec3, hi: Vec3, include_halo: bool) -> Vec<MoleculeRecord> {
        let mut out = Vec::new();
        for idx in self.region_candidate_cells(lo, hi) {
            if !include_halo && self.kinds[idx] == CellKind::Halo {
                continue;
            }
            let cell = &mut self.cells[idx];
            let mut i = 0;
            while i < cell.molecules.len() {
                if in_box(cell.molecules[i].r, lo, hi) {
                    out.push(MoleculeRecord::from_molecule(&cell.molecules.swap_remove(i)));
                } else {
                    i += 1;
                }
            }
        }
        out
    }

    /// Drop any ghost whose id already occurs in the container (periodic
    /// self-neighbour case).
    pub fn insert_deduplicated(&mut self, record: MoleculeRecord) {
        let idx = self.cell_index_of(record.r);
        let exists = self.cells[idx]
            .molecules
            .iter()
            .any(|m| m.id == record.id && (m.r == record.r));
        if !exists {
            self.cells[idx].molecules.push(record.into_molecule());
        }
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Visit each cell once and each unordered cell pair within the
    /// cutoff once, Newton's third law observed by the processor.
    pub fn traverse_pairs<P: CellProcessor>(&mut self, p: &mut P, domain: &mut Domain) -> Result<()> {
        p.init_traversal(self.cells.len());
        for idx in 0..self.cells.len() {
            p.preprocess_cell(idx, &self.cells[idx]);
        }
        for idx in 0..self.cells.len() {
            if self.kinds[idx] != CellKind::Halo {
                self.process_outer_cell(p, idx);
            }
        }
        self.finish_traversal(p, domain)
    }

    /// Start an overlapped traversal: only owned cells are buffered, the
    /// halo ring is still in flight.
    pub fn begin_overlapped_traversal<P: CellProcessor>(&mut self, p: &mut P) {
        p.init_traversal(self.cells.len());
        for idx in 0..self.cells.len() {
            if self.kinds[idx] != CellKind::Halo {
                p.preprocess_cell(idx, &self.cells[idx]);
            }
        }
    }

    /// Process stage `stage` of `stage_count` of the inner cells. The
    /// stages partition the inner set; their union is exactly the set of
    /// cells whose forces are independent of halo state.
    pub fn traverse_partial_innermost_cells<P: CellProcessor>(
        &mut self,
        p: &mut P,
        stage: usize,
        stage_count: usize,
    ) {
        debug_assert!(stage < stage_count);
        for slot in (stage..self.inner_cells.len()).step_by(stage_count) {
            let idx = self.inner_cells[slot];
            self.process_outer_cell(p, idx);
        }
    }

    /// Process the complement of the inner set after the halo arrived.
    pub fn traverse_non_innermost_cells<P: CellProcessor>(&mut self, p: &mut P) {
        for idx in 0..self.cells.len() {
            if self.kinds[idx] == CellKind::Halo {
                p.preprocess_cell(idx, &self.cells[idx]);
            }
        }
        for idx in 0..self.cells.len() {
            if self.kinds[idx] == CellKind::Boundary {
                self.process_outer_cell(p, idx);
            }
        }
    }

    /// Scatter forces back and fold the macroscopic sums into the domain.
    pub fn finish_traversal<P: CellProcessor>(&mut self, p: &mut P, domain: &mut Domain) -> Result<()> {
        for idx in 0..self.cells.len() {
            p.postprocess_cell(idx, &mut self.cells[idx])?;
        }
        p.end_traversal(domain);
        Ok(())
    }

    fn process_outer_cell<P: CellProcessor>(&self, p: &mut P, idx: usize) {
        let kind = self.kinds[idx];
        debug_assert!(kind != CellKind::Halo);
        p.process_cell(idx, kind);

        let idx3 = [
            idx % self.dims[0],
            (idx / self.dims[0]) % self.dims[1],
            idx / (self.dims[0] * self.dims[1]),
        ];
        for off in &self.forward_offsets {
            if let Some(n) = self.neighbour(idx3, *off) {
                p.process_cell_pair(idx, kind, n, self.kinds[n]);
            }
            let back = [-off[0], -off[1], -off[2]];
            if let Some(n) = self.neighbour(idx3, back) {
                if self.kinds[n] == CellKind::Halo {
                    p.process_cell_pair(idx, kind, n, CellKind::Halo);
                }
            }
        }
    }

    #[inline]
    fn neighbour(&self, idx3: [usize; 3], off: [isize; 3]) -> Option<usize> {
        let mut n = [0usize; 3];
        for d in 0..3 {
            let v = idx3[d] as isize + off[d];
            if v < 0 || v >= self.dims[d] as isize {
                return None;
            }
            n[d] = v as usize;
        }
        Some(self.linear(n))
    }
}

fn classify(idx3: [usize; 3], inner_dims: [usize; 3], halo_width: [usize; 3]) -> CellKind {
    let mut boundary = false;
    for d in 0..3 {
        let h = halo_width[d];
        let n = inner_dims[d];
        if idx3[d] < h || idx3[d] >= h + n {
            return CellKind::Halo;
        }
        if idx3[d] < 2 * h || idx3[d] >= n {
            boundary = true;
        }
    }
    if boundary {
        CellKind::Boundary
    } else {
        CellKind::Inner
    }
}

#[inline]
fn in_box(r: Vec3, lo: Vec3, hi: Vec3) -> bool {
    (0..3).all(|d| r[d] >= lo[d] && r[d] < hi[d])
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymd_core::math::Quat;

    fn mol(id: u64, r: Vec3) -> Molecule {
        Molecule::new(id, 0, r, [0.0; 3], Quat::identity(), [0.0; 3])
    }

    fn container() -> LinkedCells {
        LinkedCells::new([0.0; 3], [10.0; 3], 2.5, 1).unwrap()
    }

    #[test]
    fn test_grid_dimensions() {
        let c = container();
        // 10 / 2.5 = 4 inner cells plus one halo layer each side.
        assert_eq!(c.inner_dims, [4, 4, 4]);
        assert_eq!(c.halo_width, [1, 1, 1]);
        assert_eq!(c.dims, [6, 6, 6]);
    }

    #[test]
    fn test_classification() {
        let c = container();
        assert_eq!(c.kind(c.cell_index_of([-1.0, 5.0, 5.0])), CellKind::Halo);
        assert_eq!(c.kind(c.cell_index_of([0.5, 5.0, 5.0])), CellKind::Boundary);
        assert_eq!(c.kind(c.cell_index_of([5.0, 5.0, 5.0])), CellKind::Inner);
    }

    #[test]
    fn test_insert_update_relocates() {
        let mut c = container();
        c.insert(mol(1, [1.0, 1.0, 1.0]));
        let before = c.cell_index_of([1.0, 1.0, 1.0]);
        c.for_each_owned_mut(|m| m.r = [8.0, 8.0, 8.0]);
        c.update();
        let after = c.cell_index_of([8.0, 8.0, 8.0]);
        assert_ne!(before, after);
        assert_eq!(c.cells[after].molecules.len(), 1);
        assert_eq!(c.cells[before].molecules.len(), 0);
    }

    #[test]
    fn test_region_extraction() {
        let mut c = container();
        c.insert(mol(1, [0.5, 5.0, 5.0]));
        c.insert(mol(2, [5.0, 5.0, 5.0]));
        let taken = c.extract_region([0.0, 0.0, 0.0], [1.0, 10.0, 10.0], false);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].id, 1);
        assert_eq!(c.num_owned(), 1);
    }

    #[test]
    fn test_delete_outer_only_clears_ghosts() {
        let mut c = container();
        c.insert(mol(1, [5.0, 5.0, 5.0]));
        c.insert(mol(2, [-1.0, 5.0, 5.0])); // lands in halo
        assert_eq!(c.num_owned(), 1);
        c.delete_outer_particles();
        let mut total = 0;
        for cell in &c.cells {
            total += cell.molecules.len();
        }
        assert_eq!(total, 1);
    }

    #[test]
    fn test_inner_cells_partition_by_stage() {
        let c = container();
        let total = c.inner_cells.len();
        assert!(total > 0);
        let mut seen = std::collections::HashSet::new();
        for stage in 0..3 {
            for slot in (stage..total).step_by(3) {
                assert!(seen.insert(c.inner_cells[slot]));
            }
        }
        assert_eq!(seen.len(), total);
    }
}
