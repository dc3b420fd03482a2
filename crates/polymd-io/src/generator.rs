//! Cubic-lattice phase-space generator.
//!
//! Fills the global box with a simple-cubic lattice of one component and
//! draws Maxwell-Boltzmann velocities at a target temperature, with the
//! centre-of-mass momentum removed.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use polymd_core::component::Component;
use polymd_core::errors::{PolymdError, Result};
use polymd_core::math::{Quat, Vec3};
use polymd_core::molecule::MoleculeRecord;

/// Generate `n` molecules of `component` on a simple-cubic lattice.
pub fn generate_cubic_lattice(
    n: usize,
    global_box: Vec3,
    temperature: f64,
    component: &Component,
    seed: u64,
) -> Result<Vec<MoleculeRecord>> {
    if n == 0 {
        return Err(PolymdError::config("cannot generate zero molecules"));
    }
    let per_axis = (n as f64).cbrt().ceil() as usize;
    if per_axis.pow(3) < n {
        return Err(PolymdError::internal("lattice sizing failed"));
    }

    let spacing = [
        global_box[0] / per_axis as f64,
        global_box[1] / per_axis as f64,
        global_box[2] / per_axis as f64,
    ];

    let mut rng = StdRng::seed_from_u64(seed);
    // <v_d^2> = T / m in reduced units.
    let sigma_v = (temperature / component.mass).sqrt();
    let normal = Normal::new(0.0, sigma_v)
        .map_err(|e| PolymdError::config(format!("bad temperature: {}", e)))?;

    let mut records = Vec::with_capacity(n);
    'fill: for z in 0..per_axis {
        for y in 0..per_axis {
            for x in 0..per_axis {
                if records.len() == n {
                    break 'fill;
                }
                let id = records.len() as u64 + 1;
                let r = [
                    (x as f64 + 0.5) * spacing[0],
                    (y as f64 + 0.5) * spacing[1],
                    (z as f64 + 0.5) * spacing[2],
                ];
                let v = [
                    normal.sample(&mut rng),
                    normal.sample(&mut rng),
                    normal.sample(&mut rng),
                ];
                records.push(MoleculeRecord {
                    id,
                    component_id: component.id as u16,
                    r,
                    v,
                    q: Quat::identity(),
                    d: [0.0; 3],
                });
            }
        }
    }

    // Remove the centre-of-mass drift.
    let mut mean_v = [0.0; 3];
    for rec in &records {
        for d in 0..3 {
            mean_v[d] += rec.v[d];
        }
    }
    for d in 0..3 {
        mean_v[d] /= records.len() as f64;
    }
    for rec in &mut records {
        for d in 0..3 {
            rec.v[d] -= mean_v[d];
        }
    }

    Ok(records)
}
