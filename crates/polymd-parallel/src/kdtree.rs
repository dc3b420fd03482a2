//! k-d decomposition tree.
//!
//! The domain is discretised into cells; the tree recursively
//! bipartitions blocks of cells among processes, always splitting along
//! the longest remaining dimension, proportionally to the process counts.
//! Only the static construction is used here; the leaves provide the
//! rectangular rank layout.

/// One node of the decomposition tree. Regions are half-open cell-index
/// boxes relative to the global cell grid.
#[derive(Debug, Clone)]
pub struct KdNode {
    /// Processes sharing this region.
    pub num_procs: usize,
    pub low: [usize; 3],
    pub high: [usize; 3],
    /// True where this region spans the whole domain in that dimension.
    pub covers_whole_domain: [bool; 3],
    pub node_id: usize,
    /// Owning process (meaningful for leaves).
    pub owning_proc: usize,
    pub child1: Option<Box<KdNode>>,
    pub child2: Option<Box<KdNode>>,
}

impl KdNode {
    /// Root node covering `global_cells` for `num_procs` processes.
    pub fn root(num_procs: usize, global_cells: [usize; 3]) -> Self {
        Self {
            num_procs,
            low: [0; 3],
            high: global_cells,
            covers_whole_domain: [true; 3],
            node_id: 0,
            owning_proc: 0,
            child1: None,
            child2: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.child1.is_none() && self.child2.is_none()
    }

    fn extent(&self, d: usize) -> usize {
        self.high[d] - self.low[d]
    }

    /// Greedy initial decomposition: bipartition recursively, always in
    /// the dimension with the longest extent, cells split proportionally
    /// to the process counts.
    pub fn build_kd_tree(&mut self) {
        if self.num_procs <= 1 {
            return;
        }
        let dim = (0..3)
            .max_by_key(|&d| self.extent(d))
            .expect("three dimensions");
        let p1 = self.num_procs / 2;
        let p2 = self.num_procs - p1;
        let extent = self.extent(dim);
        let cells1 = ((extent * p1 + self.num_procs / 2) / self.num_procs)
            .max(1)
            .min(extent - 1);
        let split = self.low[dim] + cells1;

        let mut covers1 = self.covers_whole_domain;
        let mut covers2 = self.covers_whole_domain;
        covers1[dim] = false;
        covers2[dim] = false;

        let mut high1 = self.high;
        high1[dim] = split;
        let mut low2 = self.low;
        low2[dim] = split;

        let mut c1 = KdNode {
            num_procs: p1,
            low: self.low,
            high: high1,
            covers_whole_domain: covers1,
            node_id: self.node_id * 2 + 1,
            owning_proc: self.owning_proc,
            child1: None,
            child2: None,
        };
        let mut c2 = KdNode {
            num_procs: p2,
            low: low2,
            high: self.high,
            covers_whole_domain: covers2,
            node_id: self.node_id * 2 + 2,
            owning_proc: self.owning_proc + p1,
            child1: None,
            child2: None,
        };
        c1.build_kd_tree();
        c2.build_kd_tree();
        self.child1 = Some(Box::new(c1));
        self.child2 = Some(Box::new(c2));
    }

    /// Structural equality of two trees.
    pub fn equals(&self, other: &KdNode) -> bool {
        if self.num_procs != other.num_procs
            || self.low != other.low
            || self.high != other.high
            || self.node_id != other.node_id
            || self.owning_proc != other.owning_proc
            || self.covers_whole_domain != other.covers_whole_domain
        {
            return false;
        }
        match (&self.child1, &other.child1) {
            (Some(a), Some(b)) if !a.equals(b) => return false,
            (Some(_), None) | (None, Some(_)) => return false,
            _ => {}
        }
        match (&self.child2, &other.child2) {
            (Some(a), Some(b)) if !a.equals(b) => return false,
            (Some(_), None) | (None, Some(_)) => return false,
            _ => {}
        }
        true
    }

    /// The leaf with `owning_proc == rank` and `num_procs == 1`.
    pub fn find_area_for_process(&self, rank: usize) -> Option<&KdNode> {
        if self.is_leaf() {
            return (self.num_procs == 1 && self.owning_proc == rank).then_some(self);
        }
        if rank < self.owning_proc || rank >= self.owning_proc + self.num_procs {
            return None;
        }
        self.child1
            .as_deref()
            .and_then(|c| c.find_area_for_process(rank))
            .or_else(|| {
                self.child2
                    .as_deref()
                    .and_then(|c| c.find_area_for_process(rank))
            })
    }

    /// Depth-first dump, children indented under their parents.
    pub fn print_tree(&self, prefix: &str) {
        let label = if self.is_leaf() { "LEAF" } else { "INNER" };
        log::info!(
            "{}{} id {} procs {} owner {} cells {:?}..{:?}",
            prefix,
            label,
            self.node_id,
            self.num_procs,
            self.owning_proc,
            self.low,
            self.high
        );
        let deeper = format!("{}  ", prefix);
        if let Some(c) = &self.child1 {
            c.print_tree(&deeper);
        }
        if let Some(c) = &self.child2 {
            c.print_tree(&deeper);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_is_deterministic_and_equal() {
        let mut a = KdNode::root(4, [8, 8, 8]);
        let mut b = KdNode::root(4, [8, 8, 8]);
        a.build_kd_tree();
        b.build_kd_tree();
        assert!(a.equals(&b));
        assert!(!a.is_leaf());
    }

    #[test]
    fn test_unequal_trees() {
        let mut a = KdNode::root(4, [8, 8, 8]);
        let mut b = KdNode::root(2, [8, 8, 8]);
        a.build_kd_tree();
        b.build_kd_tree();
        assert!(!a.equals(&b));
    }

    #[test]
    fn test_find_area_for_every_process() {
        let mut root = KdNode::root(5, [16, 8, 8]);
        root.build_kd_tree();
        for rank in 0..5 {
            let leaf = root.find_area_for_process(rank).expect("leaf exists");
            assert_eq!(leaf.num_procs, 1);
            assert_eq!(leaf.owning_proc, rank);
            assert!(leaf.is_leaf());
        }
        assert!(root.find_area_for_process(5).is_none());
    }

    #[test]
    fn test_leaves_partition_the_grid() {
        let mut root = KdNode::root(3, [9, 6, 6]);
        root.build_kd_tree();
        let mut volume = 0usize;
        for rank in 0..3 {
            let leaf = root.find_area_for_process(rank).unwrap();
            volume += (0..3).map(|d| leaf.high[d] - leaf.low[d]).product::<usize>();
        }
        assert_eq!(volume, 9 * 6 * 6);
    }

    #[test]
    fn test_split_along_longest_dimension() {
        let mut root = KdNode::root(2, [16, 4, 4]);
        root.build_kd_tree();
        let c1 = root.child1.as_ref().unwrap();
        assert_eq!(c1.high[0], 8);
        assert_eq!(c1.high[1], 4);
        assert!(!c1.covers_whole_domain[0]);
        assert!(c1.covers_whole_domain[1]);
    }
}
