use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ControllerError;
use crate::interfaces::MetadataStore;
use crate::model::{Collection, ExecutionPlan, Plan, Project, Run, RunningPlan};

/// In-process `MetadataStore`, keyed the way `PlanManager` keys plans — a
/// `HashMap` per entity type behind a lock, no persistence. Enforces the
/// at-most-one-open-run-per-collection contract the rest of the
/// controller relies on.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    projects: RwLock<HashMap<Uuid, Project>>,
    collections: RwLock<HashMap<Uuid, Collection>>,
    plans: RwLock<HashMap<Uuid, Plan>>,
    execution_plans: RwLock<HashMap<Uuid, ExecutionPlan>>,
    runs: RwLock<HashMap<i64, Run>>,
    open_run_by_collection: RwLock<HashMap<Uuid, i64>>,
    running_plans: RwLock<HashSet<RunningPlan>>,
    launching_collections: RwLock<Vec<Uuid>>,
    usage_log: RwLock<Vec<(String, u64)>>,
    next_run_id: AtomicI64,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_project(&self, project: Project) {
        self.projects.write().await.insert(project.id, project);
    }

    pub async fn insert_collection(&self, collection: Collection) {
        self.collections.write().await.insert(collection.id, collection);
    }

    pub async fn insert_plan(&self, plan: Plan) {
        self.plans.write().await.insert(plan.id, plan);
    }

    pub async fn insert_execution_plan(&self, execution_plan: ExecutionPlan) {
        self.execution_plans
            .write()
            .await
            .insert(execution_plan.id, execution_plan);
    }

    pub async fn mark_launching(&self, collection_id: Uuid) {
        self.launching_collections.write().await.push(collection_id);
    }

    pub async fn usage_log(&self) -> Vec<(String, u64)> {
        self.usage_log.read().await.clone()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_project(&self, project_id: Uuid) -> Result<Project, ControllerError> {
        self.projects
            .read()
            .await
            .get(&project_id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("project {project_id}")))
    }

    async fn get_collection(&self, collection_id: Uuid) -> Result<Collection, ControllerError> {
        self.collections
            .read()
            .await
            .get(&collection_id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("collection {collection_id}")))
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Plan, ControllerError> {
        self.plans
            .read()
            .await
            .get(&plan_id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("plan {plan_id}")))
    }

    async fn get_execution_plan(&self, execution_plan_id: Uuid) -> Result<ExecutionPlan, ControllerError> {
        self.execution_plans
            .read()
            .await
            .get(&execution_plan_id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("execution plan {execution_plan_id}")))
    }

    async fn get_execution_plans(&self, collection_id: Uuid) -> Result<Vec<ExecutionPlan>, ControllerError> {
        Ok(self
            .execution_plans
            .read()
            .await
            .values()
            .filter(|ep| ep.collection_id == collection_id)
            .cloned()
            .collect())
    }

    async fn start_run(&self, collection_id: Uuid, start_time: DateTime<Utc>) -> Result<i64, ControllerError> {
        let mut open = self.open_run_by_collection.write().await;
        if open.contains_key(&collection_id) {
            return Err(ControllerError::StateConflict(format!(
                "collection {collection_id} already has an open run"
            )));
        }
        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let run = Run::new(run_id, collection_id, start_time);
        self.runs.write().await.insert(run_id, run);
        open.insert(collection_id, run_id);
        Ok(run_id)
    }

    async fn new_run(&self, run_id: i64) -> Result<(), ControllerError> {
        if self.runs.read().await.contains_key(&run_id) {
            Ok(())
        } else {
            Err(ControllerError::NotFound(format!("run {run_id}")))
        }
    }

    async fn stop_run(&self, run_id: i64) -> Result<(), ControllerError> {
        let collection_id = self
            .runs
            .read()
            .await
            .get(&run_id)
            .map(|r| r.collection_id)
            .ok_or_else(|| ControllerError::NotFound(format!("run {run_id}")))?;
        self.open_run_by_collection.write().await.remove(&collection_id);
        Ok(())
    }

    async fn run_finish(&self, run_id: i64, end_time: DateTime<Utc>) -> Result<(), ControllerError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| ControllerError::NotFound(format!("run {run_id}")))?;
        let collection_id = run.collection_id;
        run.finish(end_time);
        drop(runs);
        self.open_run_by_collection.write().await.remove(&collection_id);
        Ok(())
    }

    async fn get_run(&self, run_id: i64) -> Result<Run, ControllerError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("run {run_id}")))
    }

    async fn get_last_run(&self, collection_id: Uuid) -> Result<Option<Run>, ControllerError> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.collection_id == collection_id)
            .max_by_key(|r| r.run_id)
            .cloned())
    }

    async fn has_running_plan(&self, collection_id: Uuid) -> Result<bool, ControllerError> {
        Ok(self
            .running_plans
            .read()
            .await
            .iter()
            .any(|rp| rp.collection_id == collection_id))
    }

    async fn add_running_plan(&self, running_plan: RunningPlan) -> Result<(), ControllerError> {
        self.running_plans.write().await.insert(running_plan);
        Ok(())
    }

    async fn remove_running_plan(&self, collection_id: Uuid, plan_id: Uuid) -> Result<(), ControllerError> {
        self.running_plans
            .write()
            .await
            .retain(|rp| !(rp.collection_id == collection_id && rp.plan_id == plan_id));
        Ok(())
    }

    async fn get_running_plans(&self) -> Result<Vec<RunningPlan>, ControllerError> {
        Ok(self.running_plans.read().await.iter().cloned().collect())
    }

    async fn get_launching_collections_by_context(&self, _context: &str) -> Result<Vec<Uuid>, ControllerError> {
        Ok(self.launching_collections.read().await.clone())
    }

    async fn get_collections_by_project(&self, project_id: Uuid) -> Result<Vec<Uuid>, ControllerError> {
        Ok(self
            .collections
            .read()
            .await
            .values()
            .filter(|c| c.project_id == project_id)
            .map(|c| c.id)
            .collect())
    }

    async fn mark_usage_finished(&self, context: &str, vu: u64) -> Result<(), ControllerError> {
        self.usage_log.write().await.push((context.to_string(), vu));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection_id() -> Uuid {
        Uuid::new_v4()
    }

    #[tokio::test]
    async fn start_run_allocates_monotonic_ids() {
        let store = InMemoryMetadataStore::new();
        let c1 = collection_id();
        let c2 = collection_id();
        let r1 = store.start_run(c1, Utc::now()).await.unwrap();
        store.run_finish(r1, Utc::now()).await.unwrap();
        let r2 = store.start_run(c2, Utc::now()).await.unwrap();
        assert!(r2 > r1);
    }

    #[tokio::test]
    async fn start_run_rejects_second_open_run_for_same_collection() {
        let store = InMemoryMetadataStore::new();
        let c = collection_id();
        store.start_run(c, Utc::now()).await.unwrap();
        let err = store.start_run(c, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ControllerError::StateConflict(_)));
    }

    #[tokio::test]
    async fn finishing_a_run_allows_a_new_one_to_start() {
        let store = InMemoryMetadataStore::new();
        let c = collection_id();
        let run_id = store.start_run(c, Utc::now()).await.unwrap();
        store.run_finish(run_id, Utc::now()).await.unwrap();
        let run = store.get_run(run_id).await.unwrap();
        assert!(!run.is_active());
        assert!(store.start_run(c, Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn running_plans_round_trip() {
        let store = InMemoryMetadataStore::new();
        let rp = RunningPlan { collection_id: collection_id(), plan_id: Uuid::new_v4(), run_id: 1 };
        store.add_running_plan(rp.clone()).await.unwrap();
        assert!(store.has_running_plan(rp.collection_id).await.unwrap());
        store.remove_running_plan(rp.collection_id, rp.plan_id).await.unwrap();
        assert!(!store.has_running_plan(rp.collection_id).await.unwrap());
    }
}
