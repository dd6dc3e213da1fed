//! Node numbering: ownership, node references, element connectivity and the
//! local index space of one process.

pub mod connectivity;
pub mod halo;
pub mod node;
pub mod ownership;

pub use connectivity::ElementConnectivity;
pub use halo::HaloIndex;
pub use node::NodeRef;
pub use ownership::OwnershipMap;
