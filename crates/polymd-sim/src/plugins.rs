//! Post-force plugins.
//!
//! Plugins run after the force phase of every step and may manipulate
//! owned molecules. Dispatch is a tagged variant over the plugin set.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use polymd_core::component::ComponentTable;
use polymd_core::errors::{PolymdError, Result};
use polymd_physics::cells::LinkedCells;

pub enum Plugin {
    Mirror(MirrorPlugin),
}

impl Plugin {
    pub fn after_forces(
        &mut self,
        container: &mut LinkedCells,
        table: &ComponentTable,
        step: u64,
    ) {
        match self {
            Plugin::Mirror(m) => m.after_forces(container, table, step),
        }
    }
}

/// Which side of the mirror plane molecules are kept on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorDirection {
    /// Molecules are reflected back towards lower coordinates.
    TowardLower,
    /// Molecules are reflected back towards higher coordinates.
    TowardHigher,
}

/// The reflection rule governing one mirror instance. Exactly one kind
/// applies per instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MirrorKind {
    /// Specular reflection of the normal velocity component.
    Reflect,
    /// Resample the outgoing velocity from a thermal distribution,
    /// directed back into the domain.
    Diffuse { temperature: f64 },
    /// Reflect with a fixed probability, let the rest pass.
    Probabilistic { ratio: f64 },
    /// Reflection probability ramps linearly between two steps.
    Ramped { start_step: u64, stop_step: u64 },
}

/// A planar mirror at `position` along `axis`.
#[derive(Debug)]
pub struct MirrorPlugin {
    axis: usize,
    position: f64,
    direction: MirrorDirection,
    kind: MirrorKind,
    rng: StdRng,
    reflected: u64,
    passed: u64,
}

impl MirrorPlugin {
    /// The RNG seed is derived from the rank so replicas stay decoupled.
    /// The kind's parameters are validated here so the step loop never
    /// meets a malformed rule.
    pub fn new(
        axis: usize,
        position: f64,
        direction: MirrorDirection,
        kind: MirrorKind,
        rank: usize,
    ) -> Result<Self> {
        match kind {
            MirrorKind::Diffuse { temperature } => {
                if !temperature.is_finite() || temperature <= 0.0 {
                    return Err(PolymdError::config(format!(
                        "mirror temperature must be positive, got {}",
                        temperature
                    )));
                }
            }
            MirrorKind::Probabilistic { ratio } => {
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(PolymdError::config(format!(
                        "mirror reflection ratio must be in [0, 1], got {}",
                        ratio
                    )));
                }
            }
            MirrorKind::Ramped {
                start_step,
                stop_step,
            } => {
                if stop_step <= start_step {
                    return Err(PolymdError::config(format!(
                        "mirror ramp must end after it starts, got {}..{}",
                        start_step, stop_step
                    )));
                }
            }
            MirrorKind::Reflect => {}
        }
        Ok(Self {
            axis,
            position,
            direction,
            kind,
            rng: StdRng::seed_from_u64(8624 + rank as u64),
            reflected: 0,
            passed: 0,
        })
    }

    pub fn counts(&self) -> (u64, u64) {
        (self.reflected, self.passed)
    }

    fn after_forces(&mut self, container: &mut LinkedCells, table: &ComponentTable, step: u64) {
        let axis = self.axis;
        let position = self.position;
        let direction = self.direction;
        let kind = self.kind;
        let rng = &mut self.rng;
        let mut reflected = 0u64;
        let mut passed = 0u64;

        container.for_each_owned_mut(|m| {
            let beyond = match direction {
                MirrorDirection::TowardLower => m.r[axis] > position && m.v[axis] > 0.0,
                MirrorDirection::TowardHigher => m.r[axis] < position && m.v[axis] < 0.0,
            };
            if !beyond {
                return;
            }
            let reflect = match kind {
                MirrorKind::Reflect => true,
                MirrorKind::Diffuse { .. } => true,
                MirrorKind::Probabilistic { ratio } => rng.gen::<f64>() < ratio,
                MirrorKind::Ramped {
                    start_step,
                    stop_step,
                } => {
                    let ratio = if step <= start_step {
                        0.0
                    } else if step >= stop_step {
                        1.0
                    } else {
                        (step - start_step) as f64 / (stop_step - start_step) as f64
                    };
                    rng.gen::<f64>() < ratio
                }
            };
            if !reflect {
                passed += 1;
                return;
            }
            match kind {
                MirrorKind::Diffuse { temperature } => {
                    let comp = table.component(m.component_id as usize);
                    let sigma = (temperature / comp.mass).sqrt();
                    // Temperature and mass are validated positive, so
                    // the distribution is always well-formed.
                    if let Ok(normal) = Normal::new(0.0, sigma) {
                        for d in 0..3 {
                            m.v[d] = normal.sample(rng);
                        }
                        let inward = normal.sample(rng).abs();
                        m.v[axis] = match direction {
                            MirrorDirection::TowardLower => -inward,
                            MirrorDirection::TowardHigher => inward,
                        };
                    }
                }
                _ => {
                    m.v[axis] = -m.v[axis];
                }
            }
            reflected += 1;
        });

        self.reflected += reflected;
        self.passed += passed;
        if reflected + passed > 0 {
            log::debug!(
                "mirror at {}={}: reflected {}, passed {}",
                ["x", "y", "z"][axis],
                position,
                reflected,
                passed
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymd_core::component::{Component, ComponentTable};
    use polymd_core::math::Quat;
    use polymd_core::molecule::Molecule;

    fn setup() -> (LinkedCells, ComponentTable) {
        let table =
            ComponentTable::build(vec![Component::single_lj(0, 1.0, 1.0, 1.0)], 2.5, 1.0).unwrap();
        let container = LinkedCells::new([0.0; 3], [10.0; 3], 2.5, 1).unwrap();
        (container, table)
    }

    /// `n` molecules past y = 8 moving towards the wall.
    fn fill_outgoing(container: &mut LinkedCells, n: u64) {
        for i in 0..n {
            container.insert(Molecule::new(
                i + 1,
                0,
                [5.0, 9.0, 5.0],
                [0.0, 1.0, 0.0],
                Quat::identity(),
                [0.0; 3],
            ));
        }
    }

    fn mirror(kind: MirrorKind) -> MirrorPlugin {
        MirrorPlugin::new(1, 8.0, MirrorDirection::TowardLower, kind, 0).unwrap()
    }

    #[test]
    fn test_reflect_flips_outgoing_velocity() {
        let (mut container, table) = setup();
        container.insert(Molecule::new(
            1,
            0,
            [5.0, 8.5, 5.0],
            [0.0, 1.0, 0.0],
            Quat::identity(),
            [0.0; 3],
        ));
        let mut mirror = mirror(MirrorKind::Reflect);
        mirror.after_forces(&mut container, &table, 1);
        let rec = &container.owned_records()[0];
        assert_eq!(rec.v[1], -1.0);
        assert_eq!(mirror.counts(), (1, 0));
    }

    #[test]
    fn test_incoming_molecules_untouched() {
        let (mut container, table) = setup();
        container.insert(Molecule::new(
            1,
            0,
            [5.0, 8.5, 5.0],
            [0.0, -1.0, 0.0],
            Quat::identity(),
            [0.0; 3],
        ));
        let mut mirror = mirror(MirrorKind::Reflect);
        mirror.after_forces(&mut container, &table, 1);
        let rec = &container.owned_records()[0];
        assert_eq!(rec.v[1], -1.0);
        assert_eq!(mirror.counts(), (0, 0));
    }

    #[test]
    fn test_probabilistic_mirror_splits_traffic() {
        let (mut container, table) = setup();
        fill_outgoing(&mut container, 200);
        let mut mirror = mirror(MirrorKind::Probabilistic { ratio: 0.5 });
        mirror.after_forces(&mut container, &table, 1);
        let (reflected, passed) = mirror.counts();
        assert_eq!(reflected + passed, 200);
        assert!(reflected > 50 && passed > 50);
    }

    #[test]
    fn test_diffuse_resamples_from_thermal_distribution() {
        let (mut container, table) = setup();
        fill_outgoing(&mut container, 100);
        let mut mirror = mirror(MirrorKind::Diffuse { temperature: 2.0 });
        mirror.after_forces(&mut container, &table, 1);
        assert_eq!(mirror.counts(), (100, 0));

        // Every molecule leaves the wall inward; the tangential
        // components follow the thermal distribution (<v^2> = T/m = 2).
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        container.for_each_owned(|m| {
            assert!(m.v[1] < 0.0, "outgoing velocity survived: {:?}", m.v);
            sum += m.v[0];
            sum_sq += m.v[0] * m.v[0];
        });
        let mean = sum / 100.0;
        let var = sum_sq / 100.0 - mean * mean;
        assert!(mean.abs() < 0.5, "tangential mean {}", mean);
        assert!(var > 0.8 && var < 4.0, "tangential variance {}", var);

        // A non-positive wall temperature is rejected up front.
        let err = MirrorPlugin::new(
            1,
            8.0,
            MirrorDirection::TowardLower,
            MirrorKind::Diffuse { temperature: 0.0 },
            0,
        )
        .unwrap_err();
        assert!(matches!(err, polymd_core::errors::PolymdError::Config(_)));
    }

    #[test]
    fn test_ramped_probability_interpolates_between_steps() {
        let kind = MirrorKind::Ramped {
            start_step: 100,
            stop_step: 200,
        };
        let run_at = |step: u64| {
            let (mut container, table) = setup();
            fill_outgoing(&mut container, 200);
            let mut mirror = mirror(kind);
            mirror.after_forces(&mut container, &table, step);
            mirror.counts()
        };

        // Before the ramp nothing reflects, past it everything does.
        assert_eq!(run_at(100), (0, 200));
        assert_eq!(run_at(200), (200, 0));

        // Halfway through the ramp roughly half the traffic bounces.
        let (reflected, passed) = run_at(150);
        assert_eq!(reflected + passed, 200);
        assert!(reflected > 50 && passed > 50, "{} vs {}", reflected, passed);

        // A ramp that never opens is a configuration error.
        assert!(MirrorPlugin::new(
            1,
            8.0,
            MirrorDirection::TowardLower,
            MirrorKind::Ramped {
                start_step: 5,
                stop_step: 5,
            },
            0,
        )
        .is_err());
    }
}
