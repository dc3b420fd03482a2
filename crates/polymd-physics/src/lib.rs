//! # polymd-physics
//!
//! The computational heart of polymd: the linked-cells particle container,
//! structure-of-arrays cell buffers, the vectorized pair-interaction kernel
//! (Lennard-Jones, charges, dipoles, quadrupoles with reaction field), and
//! the leapfrog integrator.
//!
//! The kernel is written once against a small SIMD vocabulary
//! ([`simd::SimdReal`]) and instantiated at scalar width (the test oracle)
//! and at four lanes via `wide::f64x4`.

pub mod cells;
pub mod integrator;
pub mod kernel;
pub mod simd;
pub mod soa;

pub use cells::{Cell, CellKind, LinkedCells};
pub use integrator::Leapfrog;
pub use kernel::flops::PairFlopCounter;
pub use kernel::processor::{PairProcessor, ReferenceCellProcessor, VectorizedCellProcessor};
pub use kernel::CellProcessor;
pub use soa::{CellSoA, SIMD_WIDTH};
