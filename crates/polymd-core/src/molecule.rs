//! Rigid multi-site molecules.
//!
//! A molecule carries identity, rigid-body phase-space state, and cached
//! world-frame site data derived from the orientation quaternion. The cache
//! is rebuilt after every motion update; forces and torques accumulate on
//! the molecule during the force phase and are reset before each traversal.

use serde::{Deserialize, Serialize};

use crate::component::Component;
use crate::math::{self, Quat, Vec3};

/// One rigid molecule. Mutation of `r`, `v`, `d` is confined to the
/// integrator and the force-accumulation phase; `q` only changes in the
/// integrator.
#[derive(Debug, Clone)]
pub struct Molecule {
    pub id: u64,
    pub component_id: u16,

    /// Centre of mass position.
    pub r: Vec3,
    /// Velocity.
    pub v: Vec3,
    /// Orientation (unit quaternion).
    pub q: Quat,
    /// Angular momentum (world frame).
    pub d: Vec3,

    /// Total force, accumulated during the force phase.
    pub f: Vec3,
    /// Total torque, accumulated during the force phase.
    pub m: Vec3,

    /// Cached world-frame site positions, one entry per site class.
    pub lj_pos: Vec<Vec3>,
    pub charge_pos: Vec<Vec3>,
    pub dipole_pos: Vec<Vec3>,
    pub quadrupole_pos: Vec<Vec3>,
    /// Cached world-frame orientation axes for oriented sites.
    pub dipole_e: Vec<Vec3>,
    pub quadrupole_e: Vec<Vec3>,
}

impl Molecule {
    pub fn new(id: u64, component_id: u16, r: Vec3, v: Vec3, q: Quat, d: Vec3) -> Self {
        Self {
            id,
            component_id,
            r,
            v,
            q,
            d,
            f: math::ZERO,
            m: math::ZERO,
            lj_pos: Vec::new(),
            charge_pos: Vec::new(),
            dipole_pos: Vec::new(),
            quadrupole_pos: Vec::new(),
            dipole_e: Vec::new(),
            quadrupole_e: Vec::new(),
        }
    }

    /// Rebuild the cached world-frame site positions and axes from the
    /// current position and orientation.
    pub fn update_cache(&mut self, comp: &Component) {
        let q = self.q;
        let r = self.r;
        self.lj_pos.clear();
        self.lj_pos
            .extend(comp.lj_sites.iter().map(|s| math::add(r, q.rotate(s.offset))));
        self.charge_pos.clear();
        self.charge_pos
            .extend(comp.charges.iter().map(|s| math::add(r, q.rotate(s.offset))));
        self.dipole_pos.clear();
        self.dipole_pos
            .extend(comp.dipoles.iter().map(|s| math::add(r, q.rotate(s.offset))));
        self.dipole_e.clear();
        self.dipole_e
            .extend(comp.dipoles.iter().map(|s| q.rotate(s.axis)));
        self.quadrupole_pos.clear();
        self.quadrupole_pos
            .extend(comp.quadrupoles.iter().map(|s| math::add(r, q.rotate(s.offset))));
        self.quadrupole_e.clear();
        self.quadrupole_e
            .extend(comp.quadrupoles.iter().map(|s| q.rotate(s.axis)));
    }

    /// Reset force and torque accumulators.
    pub fn clear_forces(&mut self) {
        self.f = math::ZERO;
        self.m = math::ZERO;
    }

    /// Add a site force: the total force moves the centre of mass, the
    /// lever arm contributes torque.
    pub fn add_site_force(&mut self, site_pos: Vec3, f: Vec3) {
        self.f = math::add(self.f, f);
        self.m = math::add(self.m, math::cross(math::sub(site_pos, self.r), f));
    }

    /// Add a direct torque contribution (oriented sites).
    pub fn add_torque(&mut self, m: Vec3) {
        self.m = math::add(self.m, m);
    }

    /// Body-frame angular velocity from angular momentum and the principal
    /// moments of inertia.
    pub fn angular_velocity_body(&self, comp: &Component) -> Vec3 {
        let d_body = self.q.rotate_inv(self.d);
        [
            d_body[0] / comp.inertia[0],
            d_body[1] / comp.inertia[1],
            d_body[2] / comp.inertia[2],
        ]
    }

    /// Twice the translational kinetic energy: m v^2.
    pub fn ekin_trans2(&self, comp: &Component) -> f64 {
        comp.mass * math::norm_sq(self.v)
    }

    /// Twice the rotational kinetic energy: D . omega.
    pub fn ekin_rot2(&self, comp: &Component) -> f64 {
        let d_body = self.q.rotate_inv(self.d);
        let w = self.angular_velocity_body(comp);
        math::dot(d_body, w)
    }

    /// Thermostat scaling of the translational velocity.
    pub fn scale_v(&mut self, beta: f64) {
        self.v = math::scale(self.v, beta);
    }

    /// Thermostat scaling of the angular momentum.
    pub fn scale_d(&mut self, beta: f64) {
        self.d = math::scale(self.d, beta);
    }
}

/// Wire/storage representation of one molecule: the full phase-space row
/// `id cid x y z vx vy vz q0 q1 q2 q3 Dx Dy Dz`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoleculeRecord {
    pub id: u64,
    pub component_id: u16,
    pub r: Vec3,
    pub v: Vec3,
    pub q: Quat,
    pub d: Vec3,
}

impl MoleculeRecord {
    pub fn from_molecule(m: &Molecule) -> Self {
        Self {
            id: m.id,
            component_id: m.component_id,
            r: m.r,
            v: m.v,
            q: m.q,
            d: m.d,
        }
    }

    /// Same record with the position shifted by a periodic image offset.
    pub fn shifted(&self, shift: Vec3) -> Self {
        let mut rec = self.clone();
        rec.r = math::add(rec.r, shift);
        rec
    }

    pub fn into_molecule(self) -> Molecule {
        Molecule::new(self.id, self.component_id, self.r, self.v, self.q, self.d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, DipoleSite};

    fn dipole_component() -> Component {
        Component {
            id: 0,
            lj_sites: Vec::new(),
            charges: Vec::new(),
            dipoles: vec![DipoleSite {
                offset: [0.0, 0.0, 0.5],
                abs_mu: 1.0,
                axis: [0.0, 0.0, 1.0],
            }],
            quadrupoles: Vec::new(),
            mass: 2.0,
            inertia: [1.0, 1.0, 1.0],
        }
    }

    #[test]
    fn test_cache_follows_rotation() {
        let comp = dipole_component();
        let q = Quat::from_axis_angle([1.0, 0.0, 0.0], std::f64::consts::FRAC_PI_2);
        let mut mol = Molecule::new(1, 0, [1.0, 1.0, 1.0], math::ZERO, q, math::ZERO);
        mol.update_cache(&comp);
        // z-offset rotates onto -y around x.
        let p = mol.dipole_pos[0];
        assert!((p[0] - 1.0).abs() < 1e-10);
        assert!((p[1] - 0.5).abs() < 1e-10);
        assert!((p[2] - 1.0).abs() < 1e-10);
        let e = mol.dipole_e[0];
        assert!((e[1] - (-1.0)).abs() < 1e-10);
    }

    #[test]
    fn test_site_force_produces_torque() {
        let comp = dipole_component();
        let mut mol = Molecule::new(1, 0, math::ZERO, math::ZERO, Quat::identity(), math::ZERO);
        mol.update_cache(&comp);
        mol.add_site_force([0.0, 0.0, 0.5], [1.0, 0.0, 0.0]);
        assert_eq!(mol.f, [1.0, 0.0, 0.0]);
        // (0,0,0.5) x (1,0,0) = (0, 0.5, 0)
        assert!((mol.m[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_record_roundtrip() {
        let mol = Molecule::new(7, 0, [1.0, 2.0, 3.0], [0.1, 0.2, 0.3], Quat::identity(), math::ZERO);
        let rec = MoleculeRecord::from_molecule(&mol);
        let back = rec.into_molecule();
        assert_eq!(back.id, 7);
        assert_eq!(back.r, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_kinetic_energies() {
        let comp = dipole_component();
        let mut mol = Molecule::new(1, 0, math::ZERO, [1.0, 0.0, 0.0], Quat::identity(), [0.0, 2.0, 0.0]);
        assert!((mol.ekin_trans2(&comp) - 2.0).abs() < 1e-12);
        assert!((mol.ekin_rot2(&comp) - 4.0).abs() < 1e-12);
        mol.scale_v(0.5);
        assert!((mol.ekin_trans2(&comp) - 0.5).abs() < 1e-12);
    }
}
