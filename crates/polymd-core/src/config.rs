//! The resolved simulation configuration consumed by the step loop.
//!
//! Readers (XML, ASCII, CLI) populate this struct; everything downstream
//! treats it as immutable input.

use serde::{Deserialize, Serialize};

use crate::errors::{PolymdError, Result};
use crate::math::Vec3;

/// Minimum supported config version (integer date stamp).
pub const MIN_CONFIG_VERSION: u64 = 20070725;

/// Output writer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriterKind {
    Checkpoint,
    Xyz,
    Result,
    Pov,
    Vis,
}

impl WriterKind {
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "ckp" => Ok(WriterKind::Checkpoint),
            "xyz" => Ok(WriterKind::Xyz),
            "res" => Ok(WriterKind::Result),
            "pov" => Ok(WriterKind::Pov),
            "vis" => Ok(WriterKind::Vis),
            other => Err(PolymdError::config(format!(
                "unknown output writer '{}' (expected one of ckp|xyz|res|pov|vis)",
                other
            ))),
        }
    }
}

/// Halo-exchange staging: one full-shell phase, or one phase per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExchangePattern {
    #[default]
    FullShell,
    ThreeStage,
}

/// Domain-decomposition variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecompKind {
    #[default]
    Grid,
    KdTree,
}

/// Fully resolved run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub timestep_length: f64,
    pub cutoff_radius: f64,
    /// Linked-cells resolution: cells per cutoff (k >= 1).
    pub cells_in_cutoff: usize,
    pub global_box: Vec3,
    pub epsilon_rf: f64,
    /// Thermostat target; `None` runs NVE.
    pub target_temperature: Option<f64>,

    pub num_timesteps: u64,
    pub output_writers: Vec<WriterKind>,
    pub output_frequency: u64,
    pub output_prefix: String,
    /// Keep periodic output files instead of overwriting them.
    pub incremental_output: bool,

    pub num_ranks: usize,
    pub decomp: DecompKind,
    pub exchange_pattern: ExchangePattern,
    /// Overlap halo exchange with innermost-cell computation.
    pub overlap_communication: bool,
    /// Seconds before the exchange deadlock guard aborts the run.
    pub deadlock_timeout_secs: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep_length: 0.001,
            cutoff_radius: 2.5,
            cells_in_cutoff: 1,
            global_box: [10.0, 10.0, 10.0],
            epsilon_rf: 1.0,
            target_temperature: None,
            num_timesteps: 0,
            output_writers: vec![WriterKind::Checkpoint],
            output_frequency: 100,
            output_prefix: "default".to_string(),
            incremental_output: false,
            num_ranks: 1,
            decomp: DecompKind::Grid,
            exchange_pattern: ExchangePattern::FullShell,
            overlap_communication: false,
            deadlock_timeout_secs: 60.0,
        }
    }
}

impl SimulationConfig {
    /// Validate the invariants every reader must establish.
    pub fn validate(&self) -> Result<()> {
        if self.timestep_length <= 0.0 {
            return Err(PolymdError::config("timestep-length must be positive"));
        }
        if self.cutoff_radius <= 0.0 {
            return Err(PolymdError::config("cutoff-radius must be positive"));
        }
        if self.cells_in_cutoff < 1 {
            return Err(PolymdError::config("cells per cutoff must be at least 1"));
        }
        for d in 0..3 {
            if self.global_box[d] < 2.0 * self.cutoff_radius {
                return Err(PolymdError::config(format!(
                    "global box length {} in axis {} is below two cutoff radii",
                    self.global_box[d], d
                )));
            }
        }
        if self.num_ranks == 0 {
            return Err(PolymdError::config("at least one rank is required"));
        }
        if self.output_frequency == 0 {
            return Err(PolymdError::config("output frequency must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_writer_kind_parse() {
        assert_eq!(WriterKind::parse("ckp").unwrap(), WriterKind::Checkpoint);
        assert_eq!(WriterKind::parse("xyz").unwrap(), WriterKind::Xyz);
        assert!(WriterKind::parse("bogus").is_err());
    }

    #[test]
    fn test_small_box_rejected() {
        let cfg = SimulationConfig {
            global_box: [4.0, 10.0, 10.0],
            cutoff_radius: 2.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
