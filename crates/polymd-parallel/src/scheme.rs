//! Neighbour communication schemes.
//!
//! Full-shell exchanges with up to 26 neighbours in a single phase; the
//! three-stage variant communicates one axis at a time with regions
//! widened in the other axes, so the cumulative effect equals full shell.
//! Axes along which the subdomain covers the whole domain degenerate to a
//! local periodic wrap with no traffic.
//!
//! `finalize_stage` is the non-blocking progress loop: kickstart sends,
//! probe for counts, post and progress receives, until every partner is
//! done. A wall clock bounds the loop; after one second of waiting each
//! partner's state is logged, and past the configured timeout the stage
//! aborts with a distinguished communication error.

use std::time::{Duration, Instant};

use polymd_core::config::ExchangePattern;
use polymd_core::errors::{PolymdError, Result};
use polymd_core::math::Vec3;
use polymd_physics::cells::LinkedCells;

use crate::partner::{CommunicationPartner, MessageType};
use crate::region::{all_offsets, HaloRegion};
use crate::transport::Endpoint;

pub struct NeighbourScheme {
    pattern: ExchangePattern,
    /// Partners per stage: one entry for full shell, three for staged.
    neighbours: Vec<Vec<CommunicationPartner>>,
    covers: [bool; 3],
    cutoff: f64,
    global: Vec3,
    deadlock_timeout: Duration,
}

impl NeighbourScheme {
    pub fn new(
        pattern: ExchangePattern,
        own_rank: usize,
        layout: &[(Vec3, Vec3)],
        cutoff: f64,
        global: Vec3,
        deadlock_timeout: Duration,
    ) -> Self {
        let (own_lo, own_hi) = layout[own_rank];
        let mut covers = [false; 3];
        for d in 0..3 {
            covers[d] = (own_hi[d] - own_lo[d] - global[d]).abs() < 1e-9;
        }

        let full_shell = discover_partners(own_rank, layout, cutoff, global, covers);
        let neighbours = match pattern {
            ExchangePattern::FullShell => vec![full_shell],
            ExchangePattern::ThreeStage => {
                let mut staged: Vec<Vec<CommunicationPartner>> = vec![Vec::new(); 3];
                for p in full_shell {
                    if let Some(axis) = p.face_axis() {
                        let mut p = p;
                        p.enlarge_in_other_directions(axis, cutoff);
                        staged[axis].push(p);
                    }
                }
                staged
            }
        };

        for (stage, ps) in neighbours.iter().enumerate() {
            log::debug!(
                "rank {}: stage {} has {} communication partners",
                own_rank,
                stage,
                ps.len()
            );
        }

        Self {
            pattern,
            neighbours,
            covers,
            cutoff,
            global,
            deadlock_timeout,
        }
    }

    pub fn stage_count(&self) -> usize {
        self.neighbours.len()
    }

    pub fn covers_whole_domain(&self) -> [bool; 3] {
        self.covers
    }

    /// Duplicate removal applies when the subdomain covers the whole
    /// domain along every exchanged axis.
    fn remove_recv_duplicates(&self) -> bool {
        self.covers.iter().all(|c| *c)
    }

    /// Pack and post all sends of one stage; covered axes wrap locally.
    pub fn init_stage(
        &mut self,
        container: &mut LinkedCells,
        endpoint: &Endpoint,
        stage: usize,
        msg_type: MessageType,
    ) -> Result<()> {
        match self.pattern {
            ExchangePattern::FullShell => {
                for d in 0..3 {
                    if self.covers[d] {
                        sequential_axis(container, d, msg_type, self.cutoff, self.global[d]);
                    }
                }
            }
            ExchangePattern::ThreeStage => {
                if self.covers[stage] {
                    sequential_axis(container, stage, msg_type, self.cutoff, self.global[stage]);
                    return Ok(());
                }
            }
        }
        for p in &mut self.neighbours[stage] {
            p.init_send(container, endpoint, stage as u8, msg_type)?;
        }
        Ok(())
    }

    /// Progress all partners of one stage until done, with the deadlock
    /// guard. Incoming molecules are unpacked as they arrive.
    pub fn finalize_stage(
        &mut self,
        container: &mut LinkedCells,
        endpoint: &mut Endpoint,
        stage: usize,
    ) -> Result<()> {
        let remove_duplicates = self.remove_recv_duplicates();
        let partners = &mut self.neighbours[stage];
        if partners.is_empty() {
            return Ok(());
        }
        let own_rank = endpoint.rank();
        let start = Instant::now();
        let mut wait_marker = Duration::from_secs(1);

        loop {
            endpoint.poll();
            let mut all_done = true;
            for p in partners.iter_mut() {
                all_done &= p.test_send();
            }
            for p in partners.iter_mut() {
                all_done &= p.probe_count(endpoint, stage as u8);
            }
            for p in partners.iter_mut() {
                all_done &= p.test_recv(container, endpoint, stage as u8, remove_duplicates);
            }
            if all_done {
                break;
            }

            let waited = start.elapsed();
            if waited > wait_marker {
                log::warn!(
                    "rank {}: exchange stage {} waiting for more than {:?}",
                    own_rank,
                    stage,
                    wait_marker
                );
                wait_marker += Duration::from_secs(1);
                for p in partners.iter() {
                    p.deadlock_diagnostic(own_rank);
                }
            }
            if waited > self.deadlock_timeout {
                let snapshot: Vec<String> =
                    partners.iter().map(|p| p.state_summary()).collect();
                log::error!(
                    "rank {}: exchange stage {} deadlocked after {:?}: [{}]",
                    own_rank,
                    stage,
                    self.deadlock_timeout,
                    snapshot.join("; ")
                );
                return Err(PolymdError::CommunicationDeadlock {
                    rank: own_rank,
                    message: format!("stage {} partners: {}", stage, snapshot.join("; ")),
                });
            }
            std::thread::yield_now();
        }

        for p in partners.iter_mut() {
            p.reset();
        }
        Ok(())
    }
}

/// Build the full-shell partner list against an arbitrary rectangular
/// layout. Each face/edge/corner halo region is wrapped onto the torus
/// piecewise; every rank whose box intersects a piece becomes a partner
/// with matching send/receive regions. Offsets whose non-zero axes are
/// all covered wrap locally instead.
fn discover_partners(
    own_rank: usize,
    layout: &[(Vec3, Vec3)],
    cutoff: f64,
    global: Vec3,
    covers: [bool; 3],
) -> Vec<CommunicationPartner> {
    let (own_lo, own_hi) = layout[own_rank];
    let mut partners = Vec::new();

    for offset in all_offsets() {
        if (0..3).all(|d| offset[d] == 0 || covers[d]) {
            continue;
        }
        let halo = HaloRegion::halo_of(own_lo, own_hi, cutoff, offset);
        let copy = HaloRegion::copy_of(own_lo, own_hi, cutoff, offset);

        for (piece, shift) in halo.wrapped_pieces(global) {
            let target_lo = [
                piece.lo[0] + shift[0],
                piece.lo[1] + shift[1],
                piece.lo[2] + shift[2],
            ];
            let target_hi = [
                piece.hi[0] + shift[0],
                piece.hi[1] + shift[1],
                piece.hi[2] + shift[2],
            ];
            for (rank, (b_lo, b_hi)) in layout.iter().enumerate() {
                if rank == own_rank {
                    continue;
                }
                let probe = HaloRegion {
                    lo: target_lo,
                    hi: target_hi,
                    offset,
                };
                let Some((i_lo, i_hi)) = probe.intersect(*b_lo, *b_hi) else {
                    continue;
                };
                // Map the overlap back into this rank's unwrapped frame.
                let leave_lo = [i_lo[0] - shift[0], i_lo[1] - shift[1], i_lo[2] - shift[2]];
                let leave_hi = [i_hi[0] - shift[0], i_hi[1] - shift[1], i_hi[2] - shift[2]];

                // Owned molecules within one cutoff of the overlap are
                // that rank's ghosts; anything farther never passes the
                // cutoff mask.
                let mut send_lo = [0.0; 3];
                let mut send_hi = [0.0; 3];
                for d in 0..3 {
                    send_lo[d] = (leave_lo[d] - cutoff).max(copy.lo[d]);
                    send_hi[d] = (leave_hi[d] + cutoff).min(copy.hi[d]);
                    if send_hi[d] < send_lo[d] {
                        send_hi[d] = send_lo[d];
                    }
                }

                partners.push(CommunicationPartner::new(
                    rank,
                    offset,
                    (send_lo, send_hi),
                    (leave_lo, leave_hi),
                    shift,
                ));
            }
        }
    }
    partners
}

/// Periodic wrap along one axis for a subdomain that covers the whole
/// domain there: re-enter leaving owners and mirror boundary strips into
/// the halo, no network traffic involved.
pub fn sequential_axis(
    container: &mut LinkedCells,
    d: usize,
    msg_type: MessageType,
    cutoff: f64,
    global_len: f64,
) {
    if msg_type != MessageType::HaloCopies {
        handle_leaving_axis(container, d, cutoff, global_len);
    }
    if msg_type != MessageType::LeavingOnly {
        populate_halo_axis(container, d, cutoff, global_len);
    }
}

fn slab(container: &LinkedCells, d: usize, cutoff: f64, lo_d: f64, hi_d: f64) -> (Vec3, Vec3) {
    let (lo, hi) = container.bbox();
    let mut s_lo = [0.0; 3];
    let mut s_hi = [0.0; 3];
    for a in 0..3 {
        s_lo[a] = lo[a] - cutoff;
        s_hi[a] = hi[a] + cutoff;
    }
    s_lo[d] = lo_d;
    s_hi[d] = hi_d;
    (s_lo, s_hi)
}

fn handle_leaving_axis(container: &mut LinkedCells, d: usize, cutoff: f64, global_len: f64) {
    let (lo, hi) = container.bbox();

    let (b_lo, b_hi) = slab(container, d, cutoff, lo[d] - cutoff, lo[d]);
    for rec in container.extract_region(b_lo, b_hi, true) {
        let mut rec = rec;
        rec.r[d] += global_len;
        container.insert(rec.into_molecule());
    }

    let (t_lo, t_hi) = slab(container, d, cutoff, hi[d], hi[d] + cutoff);
    for rec in container.extract_region(t_lo, t_hi, true) {
        let mut rec = rec;
        rec.r[d] -= global_len;
        container.insert(rec.into_molecule());
    }
}

fn populate_halo_axis(container: &mut LinkedCells, d: usize, cutoff: f64, global_len: f64) {
    let (lo, hi) = container.bbox();

    // Bottom strip mirrors above the top face.
    let (b_lo, b_hi) = slab(container, d, cutoff, lo[d], lo[d] + cutoff);
    let mut shift_up = [0.0; 3];
    shift_up[d] = global_len;
    let bottom = container.collect_region(b_lo, b_hi, true);
    for rec in bottom {
        container.insert(rec.shifted(shift_up).into_molecule());
    }

    // Top strip mirrors below the bottom face.
    let (t_lo, t_hi) = slab(container, d, cutoff, hi[d] - cutoff, hi[d]);
    let mut shift_down = [0.0; 3];
    shift_down[d] = -global_len;
    let top = container.collect_region(t_lo, t_hi, true);
    for rec in top {
        container.insert(rec.shifted(shift_down).into_molecule());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymd_core::math::Quat;
    use polymd_core::molecule::Molecule;

    fn mol(id: u64, r: Vec3) -> Molecule {
        Molecule::new(id, 0, r, [0.0; 3], Quat::identity(), [0.0; 3])
    }

    #[test]
    fn test_sequential_wrap_reenters_leavers() {
        let mut c = LinkedCells::new([0.0; 3], [10.0; 3], 2.5, 1).unwrap();
        c.insert(mol(1, [-0.5, 5.0, 5.0]));
        sequential_axis(&mut c, 0, MessageType::LeavingOnly, 2.5, 10.0);
        assert_eq!(c.num_owned(), 1);
        let recs = c.owned_records();
        assert!((recs[0].r[0] - 9.5).abs() < 1e-12);
    }

    #[test]
    fn test_sequential_halo_population() {
        let mut c = LinkedCells::new([0.0; 3], [10.0; 3], 2.5, 1).unwrap();
        c.insert(mol(1, [0.5, 5.0, 5.0]));
        sequential_axis(&mut c, 0, MessageType::HaloCopies, 2.5, 10.0);
        // One owner plus one ghost above the top face.
        assert_eq!(c.num_owned(), 1);
        let ghosts = c.collect_region([10.0, 0.0, 0.0], [12.5, 10.0, 10.0], true);
        assert_eq!(ghosts.len(), 1);
        assert!((ghosts[0].r[0] - 10.5).abs() < 1e-12);
    }

    #[test]
    fn test_cumulative_corner_ghosts() {
        let mut c = LinkedCells::new([0.0; 3], [10.0; 3], 2.5, 1).unwrap();
        c.insert(mol(1, [0.5, 0.5, 5.0]));
        for d in 0..2 {
            sequential_axis(&mut c, d, MessageType::HaloCopies, 2.5, 10.0);
        }
        // The corner image (10.5, 10.5, 5.0) must exist.
        let corner = c.collect_region([10.0, 10.0, 0.0], [12.5, 12.5, 10.0], true);
        assert_eq!(corner.len(), 1);
    }

    #[test]
    fn test_two_rank_partner_discovery() {
        let layout = vec![
            ([0.0, 0.0, 0.0], [10.0, 10.0, 10.0]),
            ([10.0, 0.0, 0.0], [20.0, 10.0, 10.0]),
        ];
        let covers = [false, true, true];
        let partners = discover_partners(0, &layout, 2.5, [20.0, 10.0, 10.0], covers);
        // Only x-offsets survive (y/z wrap locally); both +x and -x map
        // to rank 1 through the periodic image.
        assert!(!partners.is_empty());
        assert!(partners.iter().all(|p| p.rank() == 1));
        assert!(partners.iter().all(|p| p.offset()[0] != 0));
        let plus: Vec<_> = partners.iter().filter(|p| p.offset() == [1, 0, 0]).collect();
        assert_eq!(plus.len(), 1);
    }
}
