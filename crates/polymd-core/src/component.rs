//! Static per-component site geometry and interaction parameters.
//!
//! A component describes one molecule species: its interaction sites in the
//! body frame plus mass and principal moments of inertia. Components are
//! immutable after initialization; the LJ pair-parameter table is resolved
//! once at startup so the kernel never recomputes mixing rules.

use serde::{Deserialize, Serialize};

use crate::errors::{PolymdError, Result};
use crate::math::Vec3;

/// A Lennard-Jones site: body-frame offset plus well depth and diameter.
/// `shift6` is six times the truncation shift for the site paired with
/// itself; zero means plain truncation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LjSite {
    pub offset: Vec3,
    pub eps: f64,
    pub sigma: f64,
    pub shift6: f64,
}

/// A point charge site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeSite {
    pub offset: Vec3,
    pub q: f64,
}

/// A point dipole site with a body-frame unit axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DipoleSite {
    pub offset: Vec3,
    pub abs_mu: f64,
    pub axis: Vec3,
}

/// A point (linear) quadrupole site with a body-frame unit axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuadrupoleSite {
    pub offset: Vec3,
    pub abs_q: f64,
    pub axis: Vec3,
}

/// One molecule species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: usize,
    pub lj_sites: Vec<LjSite>,
    pub charges: Vec<ChargeSite>,
    pub dipoles: Vec<DipoleSite>,
    pub quadrupoles: Vec<QuadrupoleSite>,
    pub mass: f64,
    /// Principal moments of inertia (body frame).
    pub inertia: Vec3,
}

impl Component {
    /// A single centred LJ site, handy for tests and generated lattices.
    pub fn single_lj(id: usize, eps: f64, sigma: f64, mass: f64) -> Self {
        Self {
            id,
            lj_sites: vec![LjSite {
                offset: [0.0; 3],
                eps,
                sigma,
                shift6: 0.0,
            }],
            charges: Vec::new(),
            dipoles: Vec::new(),
            quadrupoles: Vec::new(),
            mass,
            inertia: [1.0; 3],
        }
    }

    pub fn num_sites(&self) -> usize {
        self.lj_sites.len() + self.charges.len() + self.dipoles.len() + self.quadrupoles.len()
    }

    /// Whether any site carries an orientation (and therefore torque).
    pub fn has_oriented_sites(&self) -> bool {
        !self.dipoles.is_empty() || !self.quadrupoles.is_empty()
    }

    /// Rotational degrees of freedom contributed by one molecule of this
    /// component. Point molecules carry none.
    pub fn rotational_dof(&self) -> usize {
        if self.num_sites() > 1 || self.has_oriented_sites() {
            3
        } else {
            0
        }
    }
}

/// Resolved parameters for one ordered pair of LJ site types:
/// epsilon premultiplied by 24, sigma squared, and six times the shift.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairParams {
    pub eps24: f64,
    pub sig2: f64,
    pub shift6: f64,
}

/// All components plus the flattened pair-parameter table.
///
/// Every LJ site of every component gets a global site-type id; the table
/// is a dense `n x n` matrix over those ids so the kernel looks mixing
/// parameters up by two indices without branching.
#[derive(Debug, Clone)]
pub struct ComponentTable {
    components: Vec<Component>,
    /// First global LJ site-type id of each component.
    site_type_start: Vec<usize>,
    num_site_types: usize,
    pair_params: Vec<PairParams>,
    epsilon_rf: f64,
    /// 2 (eps_RF - 1) / (rc^3 (2 eps_RF + 1)), the reaction-field factor.
    eps_rf_inv_rc3: f64,
    cutoff: f64,
}

impl ComponentTable {
    /// Resolve the pair table for a component set at a given cutoff.
    ///
    /// Cross pairs use Lorentz-Berthelot mixing; the truncation shift for
    /// a mixed pair is recomputed at the cutoff whenever both partners are
    /// shifted sites, so that the potential stays continuous at r_c.
    pub fn build(components: Vec<Component>, cutoff: f64, epsilon_rf: f64) -> Result<Self> {
        if cutoff <= 0.0 {
            return Err(PolymdError::config("cutoff radius must be positive"));
        }
        for c in &components {
            if c.mass <= 0.0 {
                return Err(PolymdError::config(format!(
                    "component {} has non-positive mass",
                    c.id
                )));
            }
        }

        let mut site_type_start = Vec::with_capacity(components.len());
        let mut num_site_types = 0;
        for c in &components {
            site_type_start.push(num_site_types);
            num_site_types += c.lj_sites.len();
        }

        let all_sites: Vec<&LjSite> = components.iter().flat_map(|c| c.lj_sites.iter()).collect();
        let mut pair_params = vec![PairParams::default(); num_site_types * num_site_types];
        let rc2 = cutoff * cutoff;
        for (i, si) in all_sites.iter().enumerate() {
            for (j, sj) in all_sites.iter().enumerate() {
                let eps = (si.eps * sj.eps).sqrt();
                let sigma = 0.5 * (si.sigma + sj.sigma);
                let sig2 = sigma * sigma;
                let eps24 = 24.0 * eps;
                let shift6 = if si.shift6 != 0.0 && sj.shift6 != 0.0 {
                    let lj2 = sig2 / rc2;
                    let lj6 = lj2 * lj2 * lj2;
                    -eps24 * (lj6 * lj6 - lj6)
                } else {
                    0.0
                };
                pair_params[i * num_site_types + j] = PairParams { eps24, sig2, shift6 };
            }
        }

        let rc3 = cutoff * cutoff * cutoff;
        let eps_rf_inv_rc3 = if epsilon_rf.is_infinite() {
            1.0 / rc3
        } else {
            2.0 * (epsilon_rf - 1.0) / (rc3 * (2.0 * epsilon_rf + 1.0))
        };

        log::debug!(
            "component table: {} components, {} LJ site types, eps_RF factor {:.6e}",
            components.len(),
            num_site_types,
            eps_rf_inv_rc3
        );

        Ok(Self {
            components,
            site_type_start,
            num_site_types,
            pair_params,
            epsilon_rf,
            eps_rf_inv_rc3,
            cutoff,
        })
    }

    pub fn component(&self, id: usize) -> &Component {
        &self.components[id]
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Global site-type id of LJ site `site` of component `comp`.
    pub fn site_type(&self, comp: usize, site: usize) -> usize {
        self.site_type_start[comp] + site
    }

    pub fn num_site_types(&self) -> usize {
        self.num_site_types
    }

    #[inline]
    pub fn pair(&self, type_i: usize, type_j: usize) -> PairParams {
        self.pair_params[type_i * self.num_site_types + type_j]
    }

    pub fn epsilon_rf(&self) -> f64 {
        self.epsilon_rf
    }

    pub fn eps_rf_inv_rc3(&self) -> f64 {
        self.eps_rf_inv_rc3
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_component_pair_params() {
        let table =
            ComponentTable::build(vec![Component::single_lj(0, 1.0, 1.0, 1.0)], 2.5, 1.0).unwrap();
        let p = table.pair(0, 0);
        assert_eq!(p.eps24, 24.0);
        assert_eq!(p.sig2, 1.0);
        assert_eq!(p.shift6, 0.0);
    }

    #[test]
    fn test_lorentz_berthelot_mixing() {
        let a = Component::single_lj(0, 1.0, 1.0, 1.0);
        let b = Component::single_lj(1, 4.0, 3.0, 1.0);
        let table = ComponentTable::build(vec![a, b], 5.0, 1.0).unwrap();
        let p = table.pair(table.site_type(0, 0), table.site_type(1, 0));
        assert!((p.eps24 - 24.0 * 2.0).abs() < 1e-12);
        assert!((p.sig2 - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_reaction_field_factor_limit() {
        // eps_RF -> infinity degenerates to 1/rc^3.
        let table = ComponentTable::build(
            vec![Component::single_lj(0, 1.0, 1.0, 1.0)],
            2.0,
            f64::INFINITY,
        )
        .unwrap();
        assert!((table.eps_rf_inv_rc3() - 1.0 / 8.0).abs() < 1e-15);
    }

    #[test]
    fn test_rejects_bad_cutoff() {
        let r = ComponentTable::build(vec![Component::single_lj(0, 1.0, 1.0, 1.0)], 0.0, 1.0);
        assert!(r.is_err());
    }
}
