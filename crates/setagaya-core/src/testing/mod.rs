//! In-memory reference implementations of the three external-interface
//! traits. The real backends (Postgres, Kubernetes/Cloud Run, an object
//! store) are out of scope; these keep everything in-process the way a
//! `PlanManager`/`ResultStore` pair would, so the controller library can
//! be exercised standalone and by its own test suite.

pub mod in_memory_cluster;
pub mod in_memory_metadata;
pub mod in_memory_object_store;

pub use in_memory_cluster::InMemoryClusterDriver;
pub use in_memory_metadata::InMemoryMetadataStore;
pub use in_memory_object_store::InMemoryObjectStore;
