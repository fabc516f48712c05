use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ControllerError;
use crate::model::{Collection, ExecutionPlan, Plan, Project, Run, RunningPlan};

/// The relational metadata store. Out of scope to implement for real —
/// the controller only ever talks to it through this trait. `StartRun` must
/// allocate a fresh monotonic `run_id` and reject if a run is already open
/// for the collection; that property is what gives the controller
/// at-most-one-active-run-per-collection without serializing triggers
/// itself.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_project(&self, project_id: Uuid) -> Result<Project, ControllerError>;
    async fn get_collection(&self, collection_id: Uuid) -> Result<Collection, ControllerError>;
    async fn get_plan(&self, plan_id: Uuid) -> Result<Plan, ControllerError>;
    async fn get_execution_plan(&self, execution_plan_id: Uuid) -> Result<ExecutionPlan, ControllerError>;
    async fn get_execution_plans(&self, collection_id: Uuid) -> Result<Vec<ExecutionPlan>, ControllerError>;

    /// Allocates a fresh run and rejects with `StateConflict` if one is
    /// already open for `collection_id`.
    async fn start_run(&self, collection_id: Uuid, start_time: DateTime<Utc>) -> Result<i64, ControllerError>;
    async fn new_run(&self, run_id: i64) -> Result<(), ControllerError>;
    async fn stop_run(&self, run_id: i64) -> Result<(), ControllerError>;
    async fn run_finish(&self, run_id: i64, end_time: DateTime<Utc>) -> Result<(), ControllerError>;
    async fn get_run(&self, run_id: i64) -> Result<Run, ControllerError>;
    async fn get_last_run(&self, collection_id: Uuid) -> Result<Option<Run>, ControllerError>;

    async fn has_running_plan(&self, collection_id: Uuid) -> Result<bool, ControllerError>;
    async fn add_running_plan(&self, running_plan: RunningPlan) -> Result<(), ControllerError>;
    async fn remove_running_plan(&self, collection_id: Uuid, plan_id: Uuid) -> Result<(), ControllerError>;
    async fn get_running_plans(&self) -> Result<Vec<RunningPlan>, ControllerError>;

    async fn get_launching_collections_by_context(&self, context: &str) -> Result<Vec<Uuid>, ControllerError>;

    /// Every collection belonging to `project_id`. Not part of the core
    /// metadata operation list, but the ingress auto-purger needs to walk
    /// from a project to its collections' runs to compute `last_used`, and
    /// no other operation provides that mapping.
    async fn get_collections_by_project(&self, project_id: Uuid) -> Result<Vec<Uuid>, ControllerError>;

    /// Records usage (`engines * concurrency` summed across execution
    /// plans) for accounting; always attempted on termination paths even
    /// when earlier steps errored.
    async fn mark_usage_finished(&self, context: &str, vu: u64) -> Result<(), ControllerError>;
}
