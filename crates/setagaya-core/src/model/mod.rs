pub mod engine;
pub mod metric;
pub mod project;
pub mod run;

pub use engine::{csv_shard_range, EngineDataConfig, EngineId, EngineKind, EngineLifecycle, FileRef};
pub use metric::SetagayaMetric;
pub use project::{Collection, ExecutionPlan, Plan, Project};
pub use run::{Run, RunningPlan};
