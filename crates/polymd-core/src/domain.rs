//! Global simulation domain: box geometry, macroscopic accumulators, and
//! thermostat scaling factors.
//!
//! The domain is an explicit context object threaded through the step loop;
//! the force kernel writes its local sums here via `set_local_potential`,
//! the decomposition reduces them across ranks, and the thermostat reads
//! the reduced temperatures back out.

use crate::math::Vec3;

/// Number of scalars exchanged in the per-step global reduction.
pub const REDUCTION_WIDTH: usize = 6;

#[derive(Debug, Clone)]
pub struct Domain {
    /// Global box edge lengths; the box spans [0, L) in every axis.
    global_length: Vec3,
    epsilon_rf: f64,

    /// Thermostat target temperature; `None` disables velocity scaling.
    target_temperature: Option<f64>,

    // Local (per-rank) accumulators, refilled every step.
    local_upot: f64,
    local_virial: f64,
    local_num_molecules: f64,
    local_num_rot_dof: f64,
    local_ekin_trans2: f64,
    local_ekin_rot2: f64,

    // Globally reduced values.
    global_upot: f64,
    global_virial: f64,
    global_num_molecules: f64,
    global_num_rot_dof: f64,
    global_ekin_trans2: f64,
    global_ekin_rot2: f64,

    beta_trans: f64,
    beta_rot: f64,
    current_time: f64,
}

impl Domain {
    pub fn new(global_length: Vec3, epsilon_rf: f64, target_temperature: Option<f64>) -> Self {
        Self {
            global_length,
            epsilon_rf,
            target_temperature,
            local_upot: 0.0,
            local_virial: 0.0,
            local_num_molecules: 0.0,
            local_num_rot_dof: 0.0,
            local_ekin_trans2: 0.0,
            local_ekin_rot2: 0.0,
            global_upot: 0.0,
            global_virial: 0.0,
            global_num_molecules: 0.0,
            global_num_rot_dof: 0.0,
            global_ekin_trans2: 0.0,
            global_ekin_rot2: 0.0,
            beta_trans: 1.0,
            beta_rot: 1.0,
            current_time: 0.0,
        }
    }

    pub fn global_length(&self) -> Vec3 {
        self.global_length
    }

    pub fn volume(&self) -> f64 {
        self.global_length[0] * self.global_length[1] * self.global_length[2]
    }

    pub fn epsilon_rf(&self) -> f64 {
        self.epsilon_rf
    }

    pub fn thermostat_enabled(&self) -> bool {
        self.target_temperature.is_some()
    }

    /// Called by the kernel's `end_traversal` with the folded sums
    /// (`U_LJ/6 + U_xpoles + myRF` and `virial + 3 myRF`).
    pub fn set_local_potential(&mut self, upot: f64, virial: f64) {
        self.local_upot = upot;
        self.local_virial = virial;
    }

    /// Called once per step with kinetic sums over owned molecules.
    pub fn set_local_kinetics(
        &mut self,
        num_molecules: usize,
        num_rot_dof: usize,
        ekin_trans2: f64,
        ekin_rot2: f64,
    ) {
        self.local_num_molecules = num_molecules as f64;
        self.local_num_rot_dof = num_rot_dof as f64;
        self.local_ekin_trans2 = ekin_trans2;
        self.local_ekin_rot2 = ekin_rot2;
    }

    /// The per-step reduction payload, summed element-wise across ranks.
    pub fn local_reduction(&self) -> [f64; REDUCTION_WIDTH] {
        [
            self.local_upot,
            self.local_virial,
            self.local_num_molecules,
            self.local_num_rot_dof,
            self.local_ekin_trans2,
            self.local_ekin_rot2,
        ]
    }

    /// Install globally reduced sums and recompute the thermostat factors.
    pub fn apply_global_reduction(&mut self, reduced: &[f64; REDUCTION_WIDTH]) {
        self.global_upot = reduced[0];
        self.global_virial = reduced[1];
        self.global_num_molecules = reduced[2];
        self.global_num_rot_dof = reduced[3];
        self.global_ekin_trans2 = reduced[4];
        self.global_ekin_rot2 = reduced[5];

        self.beta_trans = 1.0;
        self.beta_rot = 1.0;
        if let Some(t_target) = self.target_temperature {
            let t_trans = self.temperature_translational();
            if t_trans > 0.0 {
                self.beta_trans = (t_target / t_trans).sqrt();
            }
            let t_rot = self.temperature_rotational();
            if t_rot > 0.0 {
                self.beta_rot = (t_target / t_rot).sqrt();
            }
        }
    }

    /// Translational temperature in reduced units (k_B = 1).
    pub fn temperature_translational(&self) -> f64 {
        if self.global_num_molecules > 0.0 {
            self.global_ekin_trans2 / (3.0 * self.global_num_molecules)
        } else {
            0.0
        }
    }

    /// Rotational temperature; zero when no rotational DOF exist.
    pub fn temperature_rotational(&self) -> f64 {
        if self.global_num_rot_dof > 0.0 {
            self.global_ekin_rot2 / self.global_num_rot_dof
        } else {
            0.0
        }
    }

    /// Combined instantaneous temperature over all degrees of freedom.
    pub fn temperature(&self) -> f64 {
        let dof = 3.0 * self.global_num_molecules + self.global_num_rot_dof;
        if dof > 0.0 {
            (self.global_ekin_trans2 + self.global_ekin_rot2) / dof
        } else {
            0.0
        }
    }

    pub fn global_upot(&self) -> f64 {
        self.global_upot
    }

    pub fn average_global_upot(&self) -> f64 {
        if self.global_num_molecules > 0.0 {
            self.global_upot / self.global_num_molecules
        } else {
            0.0
        }
    }

    pub fn global_virial(&self) -> f64 {
        self.global_virial
    }

    pub fn global_num_molecules(&self) -> f64 {
        self.global_num_molecules
    }

    pub fn global_kinetic_energy(&self) -> f64 {
        0.5 * (self.global_ekin_trans2 + self.global_ekin_rot2)
    }

    /// Pressure from the virial route: (N T + W/3) / V.
    pub fn global_pressure(&self) -> f64 {
        (self.global_num_molecules * self.temperature() + self.global_virial / 3.0) / self.volume()
    }

    pub fn beta_trans(&self) -> f64 {
        self.beta_trans
    }

    pub fn beta_rot(&self) -> f64 {
        self.beta_rot
    }

    pub fn advance_time(&mut self, dt: f64) {
        self.current_time += dt;
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_and_beta() {
        let mut domain = Domain::new([10.0, 10.0, 10.0], 1.0, Some(2.0));
        domain.set_local_potential(-5.0, 1.5);
        domain.set_local_kinetics(10, 0, 30.0, 0.0); // T_trans = 1.0
        let local = domain.local_reduction();
        domain.apply_global_reduction(&local);
        assert!((domain.temperature_translational() - 1.0).abs() < 1e-12);
        assert!((domain.beta_trans() - 2.0_f64.sqrt()).abs() < 1e-12);
        // No rotational DOF: beta_rot stays 1.
        assert_eq!(domain.beta_rot(), 1.0);
    }

    #[test]
    fn test_pressure_ideal_gas_limit() {
        let mut domain = Domain::new([10.0, 10.0, 10.0], 1.0, None);
        domain.set_local_potential(0.0, 0.0);
        domain.set_local_kinetics(100, 0, 300.0, 0.0); // T = 1
        let local = domain.local_reduction();
        domain.apply_global_reduction(&local);
        assert!((domain.global_pressure() - 100.0 / 1000.0).abs() < 1e-12);
    }
}
