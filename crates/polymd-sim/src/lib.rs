//! # polymd-sim
//!
//! Orchestration of one rank's simulation: leapfrog integration, halo
//! exchange (optionally overlapped with innermost-cell computation), the
//! vectorized pair traversal, global reductions, thermostat scaling,
//! plugins, and output.

pub mod plugins;
pub mod simulation;

pub use plugins::{MirrorDirection, MirrorKind, MirrorPlugin, Plugin};
pub use simulation::Simulation;
