//! # polymd-parallel
//!
//! Domain decomposition for polymd: partitioning of the global box among
//! ranks (Cartesian grid or k-d tree), halo-region geometry, the
//! non-blocking neighbour exchange with its deadlock guard, and blocking
//! collectives.
//!
//! Ranks communicate through an explicit transport seam; the in-process
//! [`transport::LocalRing`] runs every rank on its own thread over
//! channels, with no shared-memory visibility between rank states.

pub mod decomp;
pub mod kdtree;
pub mod partner;
pub mod region;
pub mod scheme;
pub mod transport;

pub use decomp::{Decomposition, ParallelDecomp, SequentialDecomp};
pub use kdtree::KdNode;
pub use partner::{CommunicationPartner, MessageType, PartnerState};
pub use region::HaloRegion;
pub use scheme::NeighbourScheme;
pub use transport::{Endpoint, FaultPlan, LocalRing, Packet};
