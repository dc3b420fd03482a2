//! Cross-rank exchange: migration, ghost layers, and the deadlock guard.

use std::time::{Duration, Instant};

use polymd_core::config::{DecompKind, ExchangePattern};
use polymd_core::errors::PolymdError;
use polymd_core::math::Quat;
use polymd_core::molecule::Molecule;
use polymd_parallel::decomp::Decomposition;
use polymd_parallel::partner::MessageType;
use polymd_parallel::transport::{FaultPlan, LocalRing};
use polymd_physics::cells::LinkedCells;

const GLOBAL: [f64; 3] = [20.0, 10.0, 10.0];
const CUTOFF: f64 = 2.5;

fn mol(id: u64, r: [f64; 3]) -> Molecule {
    Molecule::new(id, 0, r, [0.0; 3], Quat::identity(), [0.0; 3])
}

fn two_rank_decomp(
    endpoint: polymd_parallel::transport::Endpoint,
    timeout: Duration,
) -> Decomposition {
    Decomposition::parallel(
        endpoint,
        GLOBAL,
        CUTOFF,
        DecompKind::Grid,
        ExchangePattern::FullShell,
        timeout,
    )
    .unwrap()
}

#[test]
fn test_leaving_molecule_migrates() {
    let _ = env_logger::builder().is_test(true).try_init();
    let endpoints = LocalRing::connect(2);
    let mut handles = Vec::new();
    for endpoint in endpoints {
        handles.push(std::thread::spawn(move || {
            let rank = endpoint.rank();
            let mut decomp = two_rank_decomp(endpoint, Duration::from_secs(30));
            let (lo, hi) = decomp.bounding_box();
            let mut container = LinkedCells::new(lo, hi, CUTOFF, 1).unwrap();
            if rank == 0 {
                // Already across the boundary into rank 1's territory.
                container.insert(mol(1, [10.4, 5.0, 5.0]));
                container.insert(mol(2, [5.0, 5.0, 5.0]));
            }
            decomp
                .exchange_molecules(&mut container, MessageType::LeavingOnly)
                .unwrap();
            container.update();
            let mut owned: Vec<u64> = Vec::new();
            container.for_each_owned(|m| owned.push(m.id));
            owned.sort_unstable();
            (rank, owned)
        }));
    }
    for h in handles {
        let (rank, owned) = h.join().unwrap();
        if rank == 0 {
            assert_eq!(owned, vec![2]);
        } else {
            assert_eq!(owned, vec![1]);
        }
    }
}

#[test]
fn test_halo_copies_appear_on_both_sides() {
    let _ = env_logger::builder().is_test(true).try_init();
    let endpoints = LocalRing::connect(2);
    let mut handles = Vec::new();
    for endpoint in endpoints {
        handles.push(std::thread::spawn(move || {
            let rank = endpoint.rank();
            let mut decomp = two_rank_decomp(endpoint, Duration::from_secs(30));
            let (lo, hi) = decomp.bounding_box();
            let mut container = LinkedCells::new(lo, hi, CUTOFF, 1).unwrap();
            // One molecule per rank, each within a cutoff of the shared
            // face at x = 10.
            if rank == 0 {
                container.insert(mol(1, [9.0, 5.0, 5.0]));
            } else {
                container.insert(mol(2, [11.0, 5.0, 5.0]));
            }
            decomp
                .exchange_molecules(&mut container, MessageType::HaloCopies)
                .unwrap();

            // Owners unchanged, one ghost each.
            let owned = container.num_owned();
            let ghosts = container.collect_region(
                [lo[0] - CUTOFF, lo[1] - CUTOFF, lo[2] - CUTOFF],
                [hi[0] + CUTOFF, hi[1] + CUTOFF, hi[2] + CUTOFF],
                true,
            );
            (rank, owned, ghosts.len())
        }));
    }
    for h in handles {
        let (rank, owned, total) = h.join().unwrap();
        assert_eq!(owned, 1, "rank {} owners", rank);
        // The neighbour's molecule appears as a ghost; periodic images
        // through the wrapped face add another copy of it.
        assert!(total >= 2, "rank {} sees {} molecules", rank, total);
    }
}

#[test]
fn test_periodic_ghost_through_wrapped_face() {
    let _ = env_logger::builder().is_test(true).try_init();
    let endpoints = LocalRing::connect(2);
    let mut handles = Vec::new();
    for endpoint in endpoints {
        handles.push(std::thread::spawn(move || {
            let rank = endpoint.rank();
            let mut decomp = two_rank_decomp(endpoint, Duration::from_secs(30));
            let (lo, hi) = decomp.bounding_box();
            let mut container = LinkedCells::new(lo, hi, CUTOFF, 1).unwrap();
            if rank == 1 {
                // Near the global max face: its image must appear below
                // rank 0's low face at x ~ -0.5.
                container.insert(mol(7, [19.5, 5.0, 5.0]));
            }
            decomp
                .exchange_molecules(&mut container, MessageType::HaloCopies)
                .unwrap();
            let ghosts = container.collect_region(
                [lo[0] - CUTOFF, lo[1], lo[2]],
                [lo[0], hi[1], hi[2]],
                true,
            );
            (rank, ghosts)
        }));
    }
    for h in handles {
        let (rank, ghosts) = h.join().unwrap();
        if rank == 0 {
            assert_eq!(ghosts.len(), 1);
            assert!((ghosts[0].r[0] - (-0.5)).abs() < 1e-12);
        }
    }
}

#[test]
fn test_deadlock_guard_aborts_with_exit_code_457() {
    let _ = env_logger::builder().is_test(true).try_init();
    let timeout = Duration::from_secs(2);
    let endpoints = LocalRing::connect(2);
    let mut handles = Vec::new();
    for endpoint in endpoints {
        handles.push(std::thread::spawn(move || {
            let rank = endpoint.rank();
            let mut endpoint = endpoint;
            if rank == 0 {
                // Rank 0 never delivers its particle sends to rank 1.
                endpoint.set_fault_plan(FaultPlan {
                    drop_particle_sends_to: Some(1),
                });
            }
            let mut decomp = two_rank_decomp(endpoint, timeout);
            let (lo, hi) = decomp.bounding_box();
            let mut container = LinkedCells::new(lo, hi, CUTOFF, 1).unwrap();
            container.insert(mol(
                rank as u64 + 1,
                [lo[0] + 1.0, 0.5 * (lo[1] + hi[1]), 0.5 * (lo[2] + hi[2])],
            ));
            let started = Instant::now();
            let result = decomp.exchange_molecules(&mut container, MessageType::HaloCopies);
            (rank, result, started.elapsed())
        }));
    }

    for h in handles {
        let (rank, result, elapsed) = h.join().unwrap();
        if rank == 1 {
            let err = result.expect_err("rank 1 must hit the deadlock guard");
            assert!(matches!(err, PolymdError::CommunicationDeadlock { .. }));
            assert_eq!(err.exit_code(), 457);
            // Fires shortly after the configured timeout.
            assert!(elapsed >= Duration::from_secs(2));
            assert!(elapsed < Duration::from_secs(10), "guard took {:?}", elapsed);
        }
    }
}
