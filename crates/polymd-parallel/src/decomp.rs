//! Domain decomposition variants.
//!
//! Tagged-variant dispatch over the decomposition capability set
//! (exchange, collectives, bounding box): a sequential single-rank wrap,
//! and the message-passing decomposition with either a Cartesian-grid or
//! a k-d-tree rank layout.

use std::time::Duration;

use polymd_core::config::{DecompKind, ExchangePattern};
use polymd_core::errors::{PolymdError, Result};
use polymd_core::math::Vec3;
use polymd_core::molecule::MoleculeRecord;
use polymd_physics::cells::LinkedCells;

use crate::kdtree::KdNode;
use crate::partner::MessageType;
use crate::scheme::{sequential_axis, NeighbourScheme};
use crate::transport::Endpoint;

pub enum Decomposition {
    Sequential(SequentialDecomp),
    Parallel(Box<ParallelDecomp>),
}

/// Single process owning the whole domain: every exchange degenerates to
/// the periodic wrap along each axis.
pub struct SequentialDecomp {
    global: Vec3,
    cutoff: f64,
}

/// One rank of a multi-process decomposition.
pub struct ParallelDecomp {
    endpoint: Endpoint,
    layout: Vec<(Vec3, Vec3)>,
    scheme: NeighbourScheme,
}

impl Decomposition {
    pub fn sequential(global: Vec3, cutoff: f64) -> Self {
        Decomposition::Sequential(SequentialDecomp { global, cutoff })
    }

    /// Build this rank's view of a multi-rank decomposition.
    pub fn parallel(
        endpoint: Endpoint,
        global: Vec3,
        cutoff: f64,
        kind: DecompKind,
        pattern: ExchangePattern,
        deadlock_timeout: Duration,
    ) -> Result<Self> {
        let size = endpoint.size();
        let layout = match kind {
            DecompKind::Grid => grid_layout(size, global),
            DecompKind::KdTree => kd_layout(size, global, cutoff)?,
        };
        for (rank, (lo, hi)) in layout.iter().enumerate() {
            for d in 0..3 {
                if hi[d] - lo[d] < cutoff {
                    return Err(PolymdError::config(format!(
                        "subdomain of rank {} is thinner than the cutoff in axis {}",
                        rank, d
                    )));
                }
            }
        }
        let scheme = NeighbourScheme::new(
            pattern,
            endpoint.rank(),
            &layout,
            cutoff,
            global,
            deadlock_timeout,
        );
        log::info!(
            "rank {}/{}: subdomain {:?}..{:?}",
            endpoint.rank(),
            size,
            layout[endpoint.rank()].0,
            layout[endpoint.rank()].1
        );
        Ok(Decomposition::Parallel(Box::new(ParallelDecomp {
            endpoint,
            layout,
            scheme,
        })))
    }

    pub fn rank(&self) -> usize {
        match self {
            Decomposition::Sequential(_) => 0,
            Decomposition::Parallel(p) => p.endpoint.rank(),
        }
    }

    pub fn num_ranks(&self) -> usize {
        match self {
            Decomposition::Sequential(_) => 1,
            Decomposition::Parallel(p) => p.endpoint.size(),
        }
    }

    /// This rank's subdomain box.
    pub fn bounding_box(&self) -> (Vec3, Vec3) {
        match self {
            Decomposition::Sequential(s) => ([0.0; 3], s.global),
            Decomposition::Parallel(p) => p.layout[p.endpoint.rank()],
        }
    }

    pub fn stage_count(&self) -> usize {
        match self {
            Decomposition::Sequential(_) => 1,
            Decomposition::Parallel(p) => p.scheme.stage_count(),
        }
    }

    /// Blocking exchange of all stages.
    pub fn exchange_molecules(
        &mut self,
        container: &mut LinkedCells,
        msg_type: MessageType,
    ) -> Result<()> {
        for stage in 0..self.stage_count() {
            self.prepare_stage(container, stage, msg_type)?;
            self.finish_stage(container, stage)?;
        }
        Ok(())
    }

    /// Post the sends of one stage (non-blocking).
    pub fn prepare_stage(
        &mut self,
        container: &mut LinkedCells,
        stage: usize,
        msg_type: MessageType,
    ) -> Result<()> {
        match self {
            Decomposition::Sequential(s) => {
                for d in 0..3 {
                    sequential_axis(container, d, msg_type, s.cutoff, s.global[d]);
                }
                Ok(())
            }
            Decomposition::Parallel(p) => {
                p.scheme.init_stage(container, &p.endpoint, stage, msg_type)
            }
        }
    }

    /// Complete one stage: progress sends/receives until all partners
    /// are done (deadlock-guarded).
    pub fn finish_stage(&mut self, container: &mut LinkedCells, stage: usize) -> Result<()> {
        match self {
            Decomposition::Sequential(_) => Ok(()),
            Decomposition::Parallel(p) => {
                p.scheme.finalize_stage(container, &mut p.endpoint, stage)
            }
        }
    }

    /// Element-wise sum over all ranks (blocking collective).
    pub fn allreduce_sum(&mut self, values: &[f64]) -> Result<Vec<f64>> {
        match self {
            Decomposition::Sequential(_) => Ok(values.to_vec()),
            Decomposition::Parallel(p) => p.endpoint.allreduce_sum(values),
        }
    }

    /// Gather molecule records on rank 0.
    pub fn gather_to_root(
        &mut self,
        records: Vec<MoleculeRecord>,
    ) -> Result<Option<Vec<MoleculeRecord>>> {
        match self {
            Decomposition::Sequential(_) => Ok(Some(records)),
            Decomposition::Parallel(p) => p.endpoint.gather_to_root(records),
        }
    }

    pub fn barrier(&mut self) -> Result<()> {
        match self {
            Decomposition::Sequential(_) => Ok(()),
            Decomposition::Parallel(p) => p.endpoint.barrier(),
        }
    }

}

/// Balanced three-factor grid: prime factors of `size`, largest first,
/// each assigned to the currently shortest effective edge.
pub fn grid_dims(size: usize, global: Vec3) -> [usize; 3] {
    let mut dims = [1usize; 3];
    for f in prime_factors(size).into_iter().rev() {
        let d = (0..3)
            .max_by(|&a, &b| {
                let ea = global[a] / dims[a] as f64;
                let eb = global[b] / dims[b] as f64;
                ea.partial_cmp(&eb).expect("finite extents")
            })
            .expect("three dimensions");
        dims[d] *= f;
    }
    dims
}

fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut f = 2;
    while f * f <= n {
        while n % f == 0 {
            out.push(f);
            n /= f;
        }
        f += 1;
    }
    if n > 1 {
        out.push(n);
    }
    out
}

fn grid_layout(size: usize, global: Vec3) -> Vec<(Vec3, Vec3)> {
    let dims = grid_dims(size, global);
    let mut layout = Vec::with_capacity(size);
    for rank in 0..size {
        let coords = [
            rank % dims[0],
            (rank / dims[0]) % dims[1],
            rank / (dims[0] * dims[1]),
        ];
        let mut lo = [0.0; 3];
        let mut hi = [0.0; 3];
        for d in 0..3 {
            lo[d] = coords[d] as f64 * global[d] / dims[d] as f64;
            hi[d] = (coords[d] + 1) as f64 * global[d] / dims[d] as f64;
        }
        layout.push((lo, hi));
    }
    layout
}

fn kd_layout(size: usize, global: Vec3, cutoff: f64) -> Result<Vec<(Vec3, Vec3)>> {
    let mut cells = [0usize; 3];
    for d in 0..3 {
        cells[d] = ((global[d] / cutoff).floor() as usize).max(1);
    }
    let mut root = KdNode::root(size, cells);
    root.build_kd_tree();
    let mut layout = Vec::with_capacity(size);
    for rank in 0..size {
        let leaf = root.find_area_for_process(rank).ok_or_else(|| {
            PolymdError::internal(format!("k-d tree has no leaf for rank {}", rank))
        })?;
        let mut lo = [0.0; 3];
        let mut hi = [0.0; 3];
        for d in 0..3 {
            let cell = global[d] / cells[d] as f64;
            lo[d] = leaf.low[d] as f64 * cell;
            hi[d] = leaf.high[d] as f64 * cell;
        }
        layout.push((lo, hi));
    }
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_dims_splits_longest_axis() {
        assert_eq!(grid_dims(3, [30.0, 10.0, 10.0]), [3, 1, 1]);
        let d = grid_dims(4, [10.0, 10.0, 10.0]);
        assert_eq!(d.iter().product::<usize>(), 4);
        assert!(d.contains(&2));
    }

    #[test]
    fn test_grid_layout_tiles_domain() {
        let layout = grid_layout(6, [30.0, 20.0, 10.0]);
        assert_eq!(layout.len(), 6);
        let volume: f64 = layout
            .iter()
            .map(|(lo, hi)| (0..3).map(|d| hi[d] - lo[d]).product::<f64>())
            .sum();
        assert!((volume - 6000.0).abs() < 1e-9);
    }

    #[test]
    fn test_sequential_collectives_are_identity() {
        let mut d = Decomposition::sequential([10.0; 3], 2.5);
        assert_eq!(d.allreduce_sum(&[1.0, 2.0]).unwrap(), vec![1.0, 2.0]);
        assert_eq!(d.num_ranks(), 1);
        assert_eq!(d.stage_count(), 1);
    }

    #[test]
    fn test_kd_layout_covers_domain() {
        let layout = kd_layout(3, [30.0, 10.0, 10.0], 2.5).unwrap();
        let volume: f64 = layout
            .iter()
            .map(|(lo, hi)| (0..3).map(|d| hi[d] - lo[d]).product::<f64>())
            .sum();
        assert!((volume - 3000.0).abs() < 1e-9);
    }
}
