//! # polymd-core
//!
//! Core types, traits, and errors for the polymd molecular-dynamics engine.
//!
//! This crate defines the fundamental abstractions used across all polymd
//! components:
//! - **Math**: `[f64; 3]` vector helpers and unit quaternions
//! - **Components**: static site geometry and the resolved LJ pair table
//! - **Molecules**: rigid-body state plus cached world-frame site data
//! - **Domain**: global macroscopic accumulators and thermostat scaling
//! - **Errors**: unified error handling with `PolymdError`

pub mod component;
pub mod config;
pub mod domain;
pub mod errors;
pub mod math;
pub mod molecule;

pub use component::{ChargeSite, Component, ComponentTable, DipoleSite, LjSite, QuadrupoleSite};
pub use config::{DecompKind, ExchangePattern, SimulationConfig, WriterKind};
pub use domain::Domain;
pub use errors::{PolymdError, Result};
pub use math::{Quat, Vec3};
pub use molecule::{Molecule, MoleculeRecord};
