pub mod label_store;
pub mod metrics_registry;

pub use label_store::{LabelStore, TwoLevelSet};
pub use metrics_registry::MetricsRegistry;

/// `run_id → {engines that were subscribed to it}`. The metric GC uses
/// this to know exactly which per-engine series to delete for a run
/// without needing the (already-gone) `RunningPlan` bookkeeping.
pub type EngineIndexStore = TwoLevelSet<crate::model::EngineId>;
