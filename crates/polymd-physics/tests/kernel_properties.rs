//! Kernel correctness: reference scenarios, Newton's third law, padding
//! safety, traversal pair counts, and scalar/vector agreement.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use polymd_core::component::{
    ChargeSite, Component, ComponentTable, DipoleSite, LjSite, QuadrupoleSite,
};
use polymd_core::domain::Domain;
use polymd_core::math::{self, Quat, Vec3};
use polymd_core::molecule::Molecule;
use polymd_physics::cells::LinkedCells;
use polymd_physics::kernel::pairs::{calculate_cell, MacroSums, Scratch};
use polymd_physics::soa::CellSoA;
use polymd_physics::{PairFlopCounter, ReferenceCellProcessor, VectorizedCellProcessor};

fn lj_table(cutoff: f64) -> Arc<ComponentTable> {
    Arc::new(
        ComponentTable::build(vec![Component::single_lj(0, 1.0, 1.0, 1.0)], cutoff, 1.0).unwrap(),
    )
}

fn molecule(id: u64, comp: u16, r: Vec3, q: Quat, table: &ComponentTable) -> Molecule {
    let mut m = Molecule::new(id, comp, r, [0.0; 3], q, [0.0; 3]);
    m.update_cache(table.component(comp as usize));
    m
}

/// Run one traversal over molecules placed well inside the box (no
/// periodic images involved) and return (forces, torques) by id order.
fn compute_forces(
    table: &Arc<ComponentTable>,
    molecules: Vec<Molecule>,
    box_len: f64,
) -> (Vec<(u64, Vec3, Vec3)>, MacroSums, Domain) {
    let mut container =
        LinkedCells::new([0.0; 3], [box_len; 3], table.cutoff(), 1).unwrap();
    for m in molecules {
        container.insert(m);
    }
    let mut domain = Domain::new([box_len; 3], table.epsilon_rf(), None);
    let mut proc = VectorizedCellProcessor::new(table.clone());
    container.traverse_pairs(&mut proc, &mut domain).unwrap();
    let local = domain.local_reduction();
    domain.apply_global_reduction(&local);

    let mut out = Vec::new();
    container.for_each_owned(|m| out.push((m.id, m.f, m.m)));
    out.sort_by_key(|e| e.0);
    (out, *proc.sums(), domain)
}

#[test]
fn test_two_lj_particles_reference_values() {
    // Two LJ sites one sigma apart: |f| = 24 (2 - 1) = 24 along the
    // separation axis, potential exactly zero.
    let table = lj_table(2.5);
    let mols = vec![
        molecule(1, 0, [4.0, 5.0, 5.0], Quat::identity(), &table),
        molecule(2, 0, [5.0, 5.0, 5.0], Quat::identity(), &table),
    ];
    let (forces, sums, domain) = compute_forces(&table, mols, 10.0);

    // Repulsion pushes particle 1 away from particle 2.
    assert!((forces[0].1[0] - (-24.0)).abs() < 1e-12);
    assert!((forces[1].1[0] - 24.0).abs() < 1e-12);
    assert!(forces[0].1[1].abs() < 1e-12);
    assert!((sums.upot6lj / 6.0).abs() < 1e-12);
    assert!(domain.global_upot().abs() < 1e-12);
}

#[test]
fn test_opposite_charges_reference_values() {
    // +1 and -1 two length units apart, rc = 3: U = -1/2, |f| = 1/4,
    // attractive.
    let plus = Component {
        id: 0,
        lj_sites: vec![],
        charges: vec![ChargeSite {
            offset: [0.0; 3],
            q: 1.0,
        }],
        dipoles: vec![],
        quadrupoles: vec![],
        mass: 1.0,
        inertia: [1.0; 3],
    };
    let mut minus = plus.clone();
    minus.id = 1;
    minus.charges[0].q = -1.0;
    let table = Arc::new(ComponentTable::build(vec![plus, minus], 3.0, 1.0).unwrap());

    let mols = vec![
        molecule(1, 0, [4.0, 5.0, 5.0], Quat::identity(), &table),
        molecule(2, 1, [6.0, 5.0, 5.0], Quat::identity(), &table),
    ];
    let (forces, sums, _) = compute_forces(&table, mols, 12.0);

    assert!((sums.upot_xpoles - (-0.5)).abs() < 1e-12);
    // The positive charge is pulled towards the negative one (+x).
    assert!((forces[0].1[0] - 0.25).abs() < 1e-12);
    assert!((forces[1].1[0] - (-0.25)).abs() < 1e-12);
}

#[test]
fn test_antiparallel_dipoles_reference_values() {
    // Dipoles two apart along z with axes +x and -x, eps_RF -> inf:
    // U = -1/r^3 ... = -0.125, and the reaction-field self term equals
    // mu1 mu2 (e1.e2) / rc^3 in magnitude.
    let dip = |id: usize, axis: Vec3| Component {
        id,
        lj_sites: vec![],
        charges: vec![],
        dipoles: vec![DipoleSite {
            offset: [0.0; 3],
            abs_mu: 1.0,
            axis,
        }],
        quadrupoles: vec![],
        mass: 1.0,
        inertia: [1.0; 3],
    };
    let table = Arc::new(
        ComponentTable::build(
            vec![dip(0, [1.0, 0.0, 0.0]), dip(1, [-1.0, 0.0, 0.0])],
            3.0,
            f64::INFINITY,
        )
        .unwrap(),
    );
    let eps_rf_inv_rc3 = table.eps_rf_inv_rc3();
    assert!((eps_rf_inv_rc3 - 1.0 / 27.0).abs() < 1e-15);

    let mols = vec![
        molecule(1, 0, [6.0, 6.0, 5.0], Quat::identity(), &table),
        molecule(2, 1, [6.0, 6.0, 7.0], Quat::identity(), &table),
    ];
    let (_, sums, _) = compute_forces(&table, mols, 12.0);

    assert!((sums.upot_xpoles - (-0.125)).abs() < 1e-12);
    // my_rf = -sum(rffac e1.e2) with e1.e2 = -1.
    assert!((sums.my_rf - eps_rf_inv_rc3).abs() < 1e-15);
}

#[test]
fn test_newton_third_law_two_particles() {
    let table = lj_table(2.5);
    let mols = vec![
        molecule(1, 0, [4.3, 5.1, 5.2], Quat::identity(), &table),
        molecule(2, 0, [5.4, 4.8, 5.6], Quat::identity(), &table),
    ];
    let (forces, _, _) = compute_forces(&table, mols, 10.0);
    for d in 0..3 {
        assert_eq!(forces[0].1[d], -forces[1].1[d]);
    }
}

#[test]
fn test_newton_third_law_total_force_vanishes() {
    let table = lj_table(2.5);
    let mut rng = StdRng::seed_from_u64(99);
    let mut mols = Vec::new();
    for id in 0..40u64 {
        let r = [
            2.0 + 8.0 * rng.gen::<f64>(),
            2.0 + 8.0 * rng.gen::<f64>(),
            2.0 + 8.0 * rng.gen::<f64>(),
        ];
        mols.push(molecule(id + 1, 0, r, Quat::identity(), &table));
    }
    let (forces, _, _) = compute_forces(&table, mols, 12.0);
    let mut total = [0.0; 3];
    for (_, f, _) in &forces {
        for d in 0..3 {
            total[d] += f[d];
        }
    }
    for d in 0..3 {
        assert!(total[d].abs() < 1e-9, "total force {:?}", total);
    }
}

#[test]
fn test_padding_garbage_changes_nothing() {
    // Finite garbage in the padded tail of every numeric field must not
    // change energies or forces while the site counts stay correct.
    let table = lj_table(2.5);
    let mols = vec![
        molecule(1, 0, [1.0, 1.0, 1.0], Quat::identity(), &table),
        molecule(2, 0, [2.1, 1.0, 1.0], Quat::identity(), &table),
    ];

    let mut clean = CellSoA::default();
    clean.fill(&mols, &table);
    let mut dirty = clean.clone();
    for pad in dirty.ljc_num..dirty.ljc_r.x.len() {
        dirty.ljc_r.x[pad] = 1.0e30;
        dirty.ljc_r.y[pad] = -7.3;
        dirty.ljc_r.z[pad] = 4.2e17;
        dirty.ljc_m_r.x[pad] = -3.0e22;
    }

    let cutoff2 = table.cutoff() * table.cutoff();
    let mut sums_clean = MacroSums::default();
    let mut sums_dirty = MacroSums::default();
    let mut scratch = Scratch::default();
    calculate_cell::<wide::f64x4, true>(
        &mut clean,
        &table,
        cutoff2,
        table.eps_rf_inv_rc3(),
        &mut sums_clean,
        &mut scratch,
    );
    calculate_cell::<wide::f64x4, true>(
        &mut dirty,
        &table,
        cutoff2,
        table.eps_rf_inv_rc3(),
        &mut sums_dirty,
        &mut scratch,
    );

    assert_eq!(sums_clean.upot6lj, sums_dirty.upot6lj);
    assert_eq!(sums_clean.virial, sums_dirty.virial);
    for s in 0..clean.ljc_num {
        assert_eq!(clean.ljc_f.get(s), dirty.ljc_f.get(s));
    }
}

#[test]
fn test_traversal_counts_each_pair_once() {
    let mut rng = StdRng::seed_from_u64(1234);
    let cutoff = 2.5;
    let table = lj_table(cutoff);
    let mut container = LinkedCells::new([0.0; 3], [12.0; 3], cutoff, 1).unwrap();
    let mut positions = Vec::new();
    for id in 0..80u64 {
        let r = [
            12.0 * rng.gen::<f64>(),
            12.0 * rng.gen::<f64>(),
            12.0 * rng.gen::<f64>(),
        ];
        positions.push(r);
        container.insert(molecule(id + 1, 0, r, Quat::identity(), &table));
    }

    // No halo filled: only in-box pairs count.
    let mut expected = 0.0;
    for i in 0..positions.len() {
        for j in (i + 1)..positions.len() {
            if math::norm_sq(math::sub(positions[i], positions[j])) < cutoff * cutoff {
                expected += 1.0;
            }
        }
    }

    let mut counter = PairFlopCounter::new(cutoff);
    let mut domain = Domain::new([12.0; 3], 1.0, None);
    container.traverse_pairs(&mut counter, &mut domain).unwrap();
    assert_eq!(counter.current().lj_pairs, expected);
}

fn mixed_component() -> Component {
    Component {
        id: 0,
        lj_sites: vec![LjSite {
            offset: [0.0, 0.0, 0.0],
            eps: 1.0,
            sigma: 1.0,
            shift6: 0.0,
        }],
        charges: vec![
            ChargeSite {
                offset: [0.0, 0.0, 0.2],
                q: 0.5,
            },
            ChargeSite {
                offset: [0.0, 0.0, -0.2],
                q: -0.5,
            },
        ],
        dipoles: vec![DipoleSite {
            offset: [0.0, 0.1, 0.0],
            abs_mu: 0.8,
            axis: [0.0, 0.0, 1.0],
        }],
        quadrupoles: vec![QuadrupoleSite {
            offset: [0.0; 3],
            abs_q: 0.6,
            axis: [1.0, 0.0, 0.0],
        }],
        mass: 2.0,
        inertia: [1.2, 1.0, 0.8],
    }
}

#[test]
fn test_scalar_oracle_agrees_with_vectorized() {
    let _ = env_logger::builder().is_test(true).try_init();
    let table = Arc::new(ComponentTable::build(vec![mixed_component()], 2.8, 4.5).unwrap());
    let mut rng = StdRng::seed_from_u64(31);
    let mut mols = Vec::new();
    for id in 0..30u64 {
        let r = [
            11.0 * rng.gen::<f64>(),
            11.0 * rng.gen::<f64>(),
            11.0 * rng.gen::<f64>(),
        ];
        let axis = [
            rng.gen::<f64>() - 0.5,
            rng.gen::<f64>() - 0.5,
            rng.gen::<f64>() - 0.5,
        ];
        let n = math::norm(axis).max(1e-6);
        let q = Quat::from_axis_angle(math::scale(axis, 1.0 / n), rng.gen::<f64>() * 6.28);
        mols.push(molecule(id + 1, 0, r, q, &table));
    }

    let run = |mols: Vec<Molecule>, vectorized: bool| {
        let mut container = LinkedCells::new([0.0; 3], [11.0; 3], table.cutoff(), 1).unwrap();
        for m in mols {
            container.insert(m);
        }
        let mut domain = Domain::new([11.0; 3], table.epsilon_rf(), None);
        let sums = if vectorized {
            let mut p = VectorizedCellProcessor::new(table.clone());
            container.traverse_pairs(&mut p, &mut domain).unwrap();
            *p.sums()
        } else {
            let mut p = ReferenceCellProcessor::new(table.clone());
            container.traverse_pairs(&mut p, &mut domain).unwrap();
            *p.sums()
        };
        let mut out = Vec::new();
        container.for_each_owned(|m| out.push((m.id, m.f, m.m)));
        out.sort_by_key(|e| e.0);
        (out, sums)
    };

    let (fv, sv) = run(mols.clone(), true);
    let (fs, ss) = run(mols, false);

    assert!((sv.upot6lj - ss.upot6lj).abs() < 1e-9 * (1.0 + ss.upot6lj.abs()));
    assert!((sv.upot_xpoles - ss.upot_xpoles).abs() < 1e-9 * (1.0 + ss.upot_xpoles.abs()));
    assert!((sv.virial - ss.virial).abs() < 1e-9 * (1.0 + ss.virial.abs()));
    assert!((sv.my_rf - ss.my_rf).abs() < 1e-9 * (1.0 + ss.my_rf.abs()));

    for ((id_v, f_v, m_v), (id_s, f_s, m_s)) in fv.iter().zip(fs.iter()) {
        assert_eq!(id_v, id_s);
        for d in 0..3 {
            assert!(
                (f_v[d] - f_s[d]).abs() < 1e-9 * (1.0 + f_s[d].abs()),
                "force mismatch on molecule {}: {:?} vs {:?}",
                id_v,
                f_v,
                f_s
            );
            assert!(
                (m_v[d] - m_s[d]).abs() < 1e-9 * (1.0 + m_s[d].abs()),
                "torque mismatch on molecule {}: {:?} vs {:?}",
                id_v,
                m_v,
                m_s
            );
        }
    }
}

#[test]
fn test_oriented_pair_torque_consistency() {
    // For an isolated dipole pair the torques plus the force couple must
    // cancel: dL/dt of the pair about the origin is zero.
    let dip = |id: usize, axis: Vec3| Component {
        id,
        lj_sites: vec![],
        charges: vec![],
        dipoles: vec![DipoleSite {
            offset: [0.0; 3],
            abs_mu: 1.0,
            axis,
        }],
        quadrupoles: vec![],
        mass: 1.0,
        inertia: [1.0; 3],
    };
    let table = Arc::new(
        ComponentTable::build(vec![dip(0, [0.6, 0.8, 0.0]), dip(1, [0.0, 0.0, 1.0])], 3.0, 1.0)
            .unwrap(),
    );
    let r1 = [6.0, 6.0, 5.0];
    let r2 = [6.8, 6.5, 6.1];
    let mols = vec![
        molecule(1, 0, r1, Quat::identity(), &table),
        molecule(2, 1, r2, Quat::identity(), &table),
    ];
    let (forces, _, _) = compute_forces(&table, mols, 12.0);

    let mut l_dot = [0.0; 3];
    for (pos, (_, f, trq)) in [r1, r2].iter().zip(forces.iter()) {
        let lever = math::cross(*pos, *f);
        for d in 0..3 {
            l_dot[d] += lever[d] + trq[d];
        }
    }
    for d in 0..3 {
        assert!(l_dot[d].abs() < 1e-10, "angular momentum leak {:?}", l_dot);
    }
}
