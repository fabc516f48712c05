pub mod cluster_driver;
pub mod metadata_store;
pub mod object_store;

pub use cluster_driver::{ClusterDriver, ContainerSpec, PodMetrics};
pub use metadata_store::MetadataStore;
pub use object_store::ObjectStore;
