//! wgmesh-services — registry and tunnel collaborators, and the mesh
//! reconciliation engine that drives them.

pub mod error;
pub mod kernel;
pub mod memory_registry;
pub mod node;
pub mod reconcile;
pub mod registry;
pub mod sqlite_registry;
pub mod tunnel;

pub use error::{MeshError, Phase};
pub use kernel::KernelApplier;
pub use memory_registry::MemoryRegistry;
pub use node::LocalNode;
pub use reconcile::{CycleOutcome, MeshSnapshot, Reconciler, SharedSnapshot};
pub use registry::{Registry, RegistryError};
pub use sqlite_registry::SqliteRegistry;
pub use tunnel::{
    check_link_already_connected, LinkState, TunnelApplier, TunnelConfig, TunnelError,
    TunnelLink, TunnelPeer,
};
