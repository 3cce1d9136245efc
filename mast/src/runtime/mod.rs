pub mod cluster;
pub mod error;
pub mod handle;

pub use cluster::{ClusterLayout, ComponentFactory, LocalCluster};
pub use error::ClusterError;
pub use handle::RoleHandle;
