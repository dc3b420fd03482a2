//! # polymd-io
//!
//! Input and output for polymd: the ASCII phase-space format (also the
//! checkpoint schema), the XML run configuration, the output-writer
//! variant set, and a cubic-lattice phase-space generator.

pub mod generator;
pub mod phase_space;
pub mod writers;
pub mod xml_config;

pub use generator::generate_cubic_lattice;
pub use phase_space::{read_phase_space, write_checkpoint, PhaseSpaceData};
pub use writers::{OutputContext, OutputWriter};
pub use xml_config::read_xml_config;

use std::path::Path;

use polymd_core::errors::Result;

/// Load a run input: XML configuration (`.xml`) or the ASCII
/// `MDProjectConfig` format (anything else).
pub fn load_input(path: &Path) -> Result<PhaseSpaceData> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => xml_config::read_xml_config(path),
        _ => phase_space::read_phase_space(path),
    }
}
