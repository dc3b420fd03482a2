//! Structure-of-arrays buffer for one cell.
//!
//! Layout invariant: every padded array has length `ceil(count, SIMD_WIDTH)`
//! and the padding slots hold exact zeros in every numeric field, so padded
//! lanes neither pass the cutoff mask nor feed NaNs into vector arithmetic.

use polymd_core::component::ComponentTable;
use polymd_core::errors::{PolymdError, Result};
use polymd_core::math::Vec3;
use polymd_core::molecule::Molecule;

/// Lane count the buffers are padded to.
pub const SIMD_WIDTH: usize = 4;

/// Round a site count up to the SIMD width.
#[inline]
pub fn padded(n: usize) -> usize {
    (n + SIMD_WIDTH - 1) / SIMD_WIDTH * SIMD_WIDTH
}

/// Three coordinate arrays of one vector field.
#[derive(Debug, Default, Clone)]
pub struct Field3 {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl Field3 {
    fn reset(&mut self, len: usize) {
        self.x.clear();
        self.x.resize(len, 0.0);
        self.y.clear();
        self.y.resize(len, 0.0);
        self.z.clear();
        self.z.resize(len, 0.0);
    }

    #[inline]
    pub fn set(&mut self, i: usize, v: Vec3) {
        self.x[i] = v[0];
        self.y[i] = v[1];
        self.z[i] = v[2];
    }

    #[inline]
    pub fn get(&self, i: usize) -> Vec3 {
        [self.x[i], self.y[i], self.z[i]]
    }
}

/// SoA buffer for one cell's molecules and sites.
#[derive(Debug, Default, Clone)]
pub struct CellSoA {
    pub mol_num: usize,
    /// Centre-of-mass positions, one per molecule (not padded; consumed
    /// lane-scalar by the mask pass).
    pub mol_pos: Field3,

    /// Per-molecule first-site indices per class; length `mol_num + 1`
    /// so `start[i + 1] - start[i]` is molecule i's site count.
    pub mol_lj_start: Vec<usize>,
    pub mol_charge_start: Vec<usize>,
    pub mol_dipole_start: Vec<usize>,
    pub mol_quad_start: Vec<usize>,

    // Lennard-Jones sites.
    pub ljc_num: usize,
    pub ljc_r: Field3,
    pub ljc_m_r: Field3,
    pub ljc_f: Field3,
    pub ljc_id: Vec<usize>,
    pub ljc_dist_lookup: Vec<f64>,

    // Charge sites.
    pub charges_num: usize,
    pub charges_r: Field3,
    pub charges_m_r: Field3,
    pub charges_f: Field3,
    pub charges_q: Vec<f64>,
    pub charges_dist_lookup: Vec<f64>,

    // Dipole sites.
    pub dipoles_num: usize,
    pub dipoles_r: Field3,
    pub dipoles_m_r: Field3,
    pub dipoles_f: Field3,
    pub dipoles_p: Vec<f64>,
    pub dipoles_e: Field3,
    /// Torque accumulators.
    pub dipoles_trq: Field3,
    pub dipoles_dist_lookup: Vec<f64>,

    // Quadrupole sites.
    pub quads_num: usize,
    pub quads_r: Field3,
    pub quads_m_r: Field3,
    pub quads_f: Field3,
    pub quads_m: Vec<f64>,
    pub quads_e: Field3,
    pub quads_trq: Field3,
    pub quads_dist_lookup: Vec<f64>,
}

impl CellSoA {
    /// Build the buffer from a cell's molecules: copy world-frame
    /// positions, zero the accumulators, assign per-site type ids.
    pub fn fill(&mut self, molecules: &[Molecule], table: &ComponentTable) {
        let mol_num = molecules.len();
        self.mol_num = mol_num;

        let mut n_lj = 0;
        let mut n_charges = 0;
        let mut n_dipoles = 0;
        let mut n_quads = 0;
        self.mol_lj_start.clear();
        self.mol_charge_start.clear();
        self.mol_dipole_start.clear();
        self.mol_quad_start.clear();
        for m in molecules {
            self.mol_lj_start.push(n_lj);
            self.mol_charge_start.push(n_charges);
            self.mol_dipole_start.push(n_dipoles);
            self.mol_quad_start.push(n_quads);
            let comp = table.component(m.component_id as usize);
            n_lj += comp.lj_sites.len();
            n_charges += comp.charges.len();
            n_dipoles += comp.dipoles.len();
            n_quads += comp.quadrupoles.len();
        }
        self.mol_lj_start.push(n_lj);
        self.mol_charge_start.push(n_charges);
        self.mol_dipole_start.push(n_dipoles);
        self.mol_quad_start.push(n_quads);

        self.ljc_num = n_lj;
        self.charges_num = n_charges;
        self.dipoles_num = n_dipoles;
        self.quads_num = n_quads;

        self.mol_pos.reset(mol_num);

        let lj_pad = padded(n_lj);
        self.ljc_r.reset(lj_pad);
        self.ljc_m_r.reset(lj_pad);
        self.ljc_f.reset(lj_pad);
        self.ljc_id.clear();
        self.ljc_id.resize(lj_pad, 0);
        self.ljc_dist_lookup.clear();
        self.ljc_dist_lookup.resize(lj_pad, 0.0);

        let ch_pad = padded(n_charges);
        self.charges_r.reset(ch_pad);
        self.charges_m_r.reset(ch_pad);
        self.charges_f.reset(ch_pad);
        self.charges_q.clear();
        self.charges_q.resize(ch_pad, 0.0);
        self.charges_dist_lookup.clear();
        self.charges_dist_lookup.resize(ch_pad, 0.0);

        let di_pad = padded(n_dipoles);
        self.dipoles_r.reset(di_pad);
        self.dipoles_m_r.reset(di_pad);
        self.dipoles_f.reset(di_pad);
        self.dipoles_p.clear();
        self.dipoles_p.resize(di_pad, 0.0);
        self.dipoles_e.reset(di_pad);
        self.dipoles_trq.reset(di_pad);
        self.dipoles_dist_lookup.clear();
        self.dipoles_dist_lookup.resize(di_pad, 0.0);

        let qu_pad = padded(n_quads);
        self.quads_r.reset(qu_pad);
        self.quads_m_r.reset(qu_pad);
        self.quads_f.reset(qu_pad);
        self.quads_m.clear();
        self.quads_m.resize(qu_pad, 0.0);
        self.quads_e.reset(qu_pad);
        self.quads_trq.reset(qu_pad);
        self.quads_dist_lookup.clear();
        self.quads_dist_lookup.resize(qu_pad, 0.0);

        let mut i_lj = 0;
        let mut i_ch = 0;
        let mut i_di = 0;
        let mut i_qu = 0;
        for (mi, m) in molecules.iter().enumerate() {
            let comp = table.component(m.component_id as usize);
            self.mol_pos.set(mi, m.r);

            for (s, _site) in comp.lj_sites.iter().enumerate() {
                self.ljc_m_r.set(i_lj, m.r);
                self.ljc_r.set(i_lj, m.lj_pos[s]);
                self.ljc_id[i_lj] = table.site_type(m.component_id as usize, s);
                i_lj += 1;
            }
            for (s, site) in comp.charges.iter().enumerate() {
                self.charges_m_r.set(i_ch, m.r);
                self.charges_r.set(i_ch, m.charge_pos[s]);
                self.charges_q[i_ch] = site.q;
                i_ch += 1;
            }
            for (s, site) in comp.dipoles.iter().enumerate() {
                self.dipoles_m_r.set(i_di, m.r);
                self.dipoles_r.set(i_di, m.dipole_pos[s]);
                self.dipoles_p[i_di] = site.abs_mu;
                self.dipoles_e.set(i_di, m.dipole_e[s]);
                i_di += 1;
            }
            for (s, site) in comp.quadrupoles.iter().enumerate() {
                self.quads_m_r.set(i_qu, m.r);
                self.quads_r.set(i_qu, m.quadrupole_pos[s]);
                self.quads_m[i_qu] = site.abs_q;
                self.quads_e.set(i_qu, m.quadrupole_e[s]);
                i_qu += 1;
            }
        }
    }

    /// Scatter accumulated site forces and torques back onto the owning
    /// molecules. Fails on NaN accumulators (a fatal numerical error).
    pub fn scatter(&self, molecules: &mut [Molecule]) -> Result<()> {
        debug_assert_eq!(molecules.len(), self.mol_num);
        for (mi, m) in molecules.iter_mut().enumerate() {
            m.clear_forces();
            for s in self.mol_lj_start[mi]..self.mol_lj_start[mi + 1] {
                let f = self.ljc_f.get(s);
                check_finite(f, "LJ site force")?;
                m.add_site_force(self.ljc_r.get(s), f);
            }
            for s in self.mol_charge_start[mi]..self.mol_charge_start[mi + 1] {
                let f = self.charges_f.get(s);
                check_finite(f, "charge site force")?;
                m.add_site_force(self.charges_r.get(s), f);
            }
            for s in self.mol_dipole_start[mi]..self.mol_dipole_start[mi + 1] {
                let f = self.dipoles_f.get(s);
                let trq = self.dipoles_trq.get(s);
                check_finite(f, "dipole site force")?;
                check_finite(trq, "dipole site torque")?;
                m.add_site_force(self.dipoles_r.get(s), f);
                m.add_torque(trq);
            }
            for s in self.mol_quad_start[mi]..self.mol_quad_start[mi + 1] {
                let f = self.quads_f.get(s);
                let trq = self.quads_trq.get(s);
                check_finite(f, "quadrupole site force")?;
                check_finite(trq, "quadrupole site torque")?;
                m.add_site_force(self.quads_r.get(s), f);
                m.add_torque(trq);
            }
        }
        Ok(())
    }

    /// Per-molecule site counts for one class, via the prefix array.
    #[inline]
    pub fn lj_range(&self, mol: usize) -> std::ops::Range<usize> {
        self.mol_lj_start[mol]..self.mol_lj_start[mol + 1]
    }

    #[inline]
    pub fn charge_range(&self, mol: usize) -> std::ops::Range<usize> {
        self.mol_charge_start[mol]..self.mol_charge_start[mol + 1]
    }

    #[inline]
    pub fn dipole_range(&self, mol: usize) -> std::ops::Range<usize> {
        self.mol_dipole_start[mol]..self.mol_dipole_start[mol + 1]
    }

    #[inline]
    pub fn quad_range(&self, mol: usize) -> std::ops::Range<usize> {
        self.mol_quad_start[mol]..self.mol_quad_start[mol + 1]
    }
}

fn check_finite(v: Vec3, what: &str) -> Result<()> {
    if v.iter().any(|x| !x.is_finite()) {
        return Err(PolymdError::numerical(format!(
            "{} is not finite: {:?}",
            what, v
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymd_core::component::Component;
    use polymd_core::math::Quat;

    fn table() -> ComponentTable {
        ComponentTable::build(vec![Component::single_lj(0, 1.0, 1.0, 1.0)], 2.5, 1.0).unwrap()
    }

    fn molecule(id: u64, r: Vec3, table: &ComponentTable) -> Molecule {
        let mut m = Molecule::new(id, 0, r, [0.0; 3], Quat::identity(), [0.0; 3]);
        m.update_cache(table.component(0));
        m
    }

    #[test]
    fn test_fill_pads_with_zeros() {
        let table = table();
        let mols = vec![
            molecule(1, [1.0, 2.0, 3.0], &table),
            molecule(2, [4.0, 5.0, 6.0], &table),
        ];
        let mut soa = CellSoA::default();
        soa.fill(&mols, &table);

        assert_eq!(soa.mol_num, 2);
        assert_eq!(soa.ljc_num, 2);
        assert_eq!(soa.ljc_r.x.len(), SIMD_WIDTH);
        for pad in soa.ljc_num..SIMD_WIDTH {
            assert_eq!(soa.ljc_r.get(pad), [0.0; 3]);
            assert_eq!(soa.ljc_dist_lookup[pad], 0.0);
        }
        assert_eq!(soa.lj_range(0), 0..1);
        assert_eq!(soa.lj_range(1), 1..2);
    }

    #[test]
    fn test_scatter_accumulates_forces() {
        let table = table();
        let mut mols = vec![molecule(1, [0.0; 3], &table)];
        let mut soa = CellSoA::default();
        soa.fill(&mols, &table);
        soa.ljc_f.set(0, [1.0, -2.0, 0.5]);
        soa.scatter(&mut mols).unwrap();
        assert_eq!(mols[0].f, [1.0, -2.0, 0.5]);
    }

    #[test]
    fn test_scatter_rejects_nan() {
        let table = table();
        let mut mols = vec![molecule(1, [0.0; 3], &table)];
        let mut soa = CellSoA::default();
        soa.fill(&mols, &table);
        soa.ljc_f.x[0] = f64::NAN;
        assert!(soa.scatter(&mut mols).is_err());
    }
}
