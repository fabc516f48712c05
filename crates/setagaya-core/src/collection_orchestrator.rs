use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::engine_client::EngineClient;
use crate::error::ControllerError;
use crate::interfaces::{ClusterDriver, MetadataStore};
use crate::model::{Collection, EngineDataConfig, FileRef};
use crate::plan_controller::{ConnectedEngines, PlanController, PlanControllerRegistry};
use crate::store::{EngineIndexStore, MetricsRegistry};

/// Drives a whole collection: prepares per-engine data (including CSV
/// sharding), starts a run, fans out to Plan Controllers, and terminates
/// with force/graceful semantics.
///
/// Every `PlanController` created by `trigger` is registered into the
/// shared `PlanControllerRegistry` keyed by `(collection_id, plan_id)` —
/// the same instance (not a fresh one) is later looked up by `term` and by
/// the run-completion sweeper, because only the triggering instance holds
/// the subscribed engines.
pub struct CollectionOrchestrator {
    metadata: Arc<dyn MetadataStore>,
    cluster: Arc<dyn ClusterDriver>,
    connected_engines: Arc<ConnectedEngines>,
    engine_index: Arc<EngineIndexStore>,
    plan_controllers: Arc<PlanControllerRegistry>,
    metrics: Arc<MetricsRegistry>,
    reading_engines: mpsc::Sender<Arc<EngineClient>>,
}

impl CollectionOrchestrator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        cluster: Arc<dyn ClusterDriver>,
        connected_engines: Arc<ConnectedEngines>,
        engine_index: Arc<EngineIndexStore>,
        plan_controllers: Arc<PlanControllerRegistry>,
        metrics: Arc<MetricsRegistry>,
        reading_engines: mpsc::Sender<Arc<EngineClient>>,
    ) -> Self {
        Self {
            metadata,
            cluster,
            connected_engines,
            engine_index,
            plan_controllers,
            metrics,
            reading_engines,
        }
    }

    /// Builds one `FileRef` set per execution plan. When the collection
    /// requests CSV split, plan `i` of `N` gets `(total_splits=N,
    /// current_split=i)` so its engines' agent can slice the shared CSV
    /// into its own shard.
    pub async fn prepare(&self, collection: &Collection) -> Result<HashMap<Uuid, Vec<FileRef>>, ControllerError> {
        let execution_plans = self.metadata.get_execution_plans(collection.id).await?;
        let total_splits = execution_plans.len() as u32;

        let mut prepared = HashMap::new();
        for (index, execution_plan) in execution_plans.iter().enumerate() {
            let plan = self.metadata.get_plan(execution_plan.plan_id).await?;
            let (total, current) = if collection.csv_split {
                (total_splits, index as u32)
            } else {
                (1, 0)
            };
            let refs = plan
                .data_files
                .iter()
                .map(|filename| FileRef {
                    filename: filename.clone(),
                    filepath: filename.clone(),
                    total_splits: total,
                    current_split: current,
                })
                .collect();
            prepared.insert(execution_plan.plan_id, refs);
        }
        Ok(prepared)
    }

    /// Validates every plan has a test file, prepares data, opens a new
    /// run, then fans out to Plan Controllers concurrently. If every plan
    /// errored, force-terminates the collection; otherwise returns the
    /// aggregated error and leaves the partially-running collection intact.
    pub async fn trigger(&self, collection: &Collection) -> Result<i64, ControllerError> {
        let execution_plans = self.metadata.get_execution_plans(collection.id).await?;
        for execution_plan in &execution_plans {
            let plan = self.metadata.get_plan(execution_plan.plan_id).await?;
            if !plan.has_test_file() {
                return Err(ControllerError::Validation(format!(
                    "plan {} has no test file",
                    execution_plan.plan_id
                )));
            }
        }

        let file_refs = self.prepare(collection).await?;
        let run_id = self.metadata.start_run(collection.id, Utc::now()).await?;

        let last_error: Arc<Mutex<Option<ControllerError>>> = Arc::new(Mutex::new(None));
        let mut errored_plans = 0usize;
        let total_plans = execution_plans.len();

        let results = join_all(execution_plans.iter().map(|execution_plan| {
            let refs = file_refs.get(&execution_plan.plan_id).cloned().unwrap_or_default();
            let controller = PlanController::new(execution_plan.clone());
            let cluster = self.cluster.clone();
            let project_id = collection.project_id;
            async move {
                let engine_data: HashMap<String, FileRef> =
                    refs.into_iter().map(|r| (r.filename.clone(), r)).collect();
                let configs: Vec<EngineDataConfig> = (0..execution_plan.engines)
                    .map(|engine_id| EngineDataConfig {
                        engine_data: engine_data.clone(),
                        concurrency: execution_plan.concurrency.to_string(),
                        duration: execution_plan.duration_seconds.to_string(),
                        rampup: execution_plan.rampup_seconds.to_string(),
                        run_id,
                        engine_id,
                    })
                    .collect();
                let trigger_result = controller.trigger(cluster.as_ref(), project_id, &configs).await;
                (Arc::new(controller), trigger_result)
            }
        }))
        .await;

        let mut controllers = Vec::with_capacity(results.len());
        for (controller, result) in results {
            if let Err(err) = result {
                errored_plans += 1;
                *last_error.lock().await = Some(err);
            } else {
                let _ = self
                    .metadata
                    .add_running_plan(crate::model::RunningPlan {
                        collection_id: collection.id,
                        plan_id: controller.plan_id,
                        run_id,
                    })
                    .await;
                if let Err(err) = controller
                    .subscribe(&self.connected_engines, &self.engine_index, &self.reading_engines, run_id)
                    .await
                {
                    *last_error.lock().await = Some(err);
                }
            }
            self.plan_controllers
                .insert((controller.collection_id, controller.plan_id), controller.clone());
            controllers.push(controller);
        }

        if errored_plans == total_plans && total_plans > 0 {
            for controller in &controllers {
                let _ = controller.term(true, &self.connected_engines, &self.metrics).await;
                self.plan_controllers
                    .remove(&(controller.collection_id, controller.plan_id));
            }
            let _ = self.metadata.stop_run(run_id).await;
            let _ = self.metadata.run_finish(run_id, Utc::now()).await;
            return Err(last_error
                .lock()
                .await
                .take()
                .unwrap_or_else(|| ControllerError::Internal("every plan failed to trigger".to_string())));
        }

        if let Some(err) = last_error.lock().await.take() {
            return Err(err);
        }
        Ok(run_id)
    }

    /// Resolves all execution plans, fans out `Plan.term` concurrently
    /// against the *same* `PlanController` instances created by `trigger`
    /// (looked up through `plan_controllers`, not freshly constructed —
    /// a fresh controller has no engines and would be a no-op), then
    /// closes the run. Errors from individual plans are collected; the
    /// last non-nil error is returned — resolved through an explicit
    /// `Mutex<Option<ControllerError>>` rather than an unsynchronized
    /// shared variable.
    pub async fn term(&self, collection: &Collection, run_id: i64, force: bool) -> Result<(), ControllerError> {
        let execution_plans = self.metadata.get_execution_plans(collection.id).await?;
        let last_error: Arc<Mutex<Option<ControllerError>>> = Arc::new(Mutex::new(None));

        join_all(execution_plans.iter().map(|execution_plan| {
            let key = (collection.id, execution_plan.plan_id);
            let controller = self
                .plan_controllers
                .get(&key)
                .map(|entry| entry.value().clone());
            let connected_engines = self.connected_engines.clone();
            let metrics = self.metrics.clone();
            let last_error = last_error.clone();
            let plan_controllers = self.plan_controllers.clone();
            async move {
                let Some(controller) = controller else { return };
                if let Err(err) = controller.term(force, &connected_engines, &metrics).await {
                    *last_error.lock().await = Some(err);
                }
                plan_controllers.remove(&key);
            }
        }))
        .await;

        let _ = self.metadata.stop_run(run_id).await;
        let _ = self.metadata.run_finish(run_id, Utc::now()).await;

        match last_error.lock().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Composes `term(force=true)` with a cluster purge, then attempts
    /// usage accounting regardless of earlier errors — termination paths
    /// always record usage and close the run even when earlier steps
    /// error. Used both for an explicit operator-requested purge of a
    /// running collection and for the deployment auto-purger's teardown of
    /// an idle one — `get_last_run` determines whether there is
    /// an open run to close; an idle collection with no open run still has
    /// its lingering `PlanController` entries (if any survived a partial
    /// failure) torn down directly.
    pub async fn term_and_purge(&self, collection: &Collection, context: &str) -> Result<(), ControllerError> {
        let last_run = self.metadata.get_last_run(collection.id).await.ok().flatten();

        let term_result = if let Some(run) = last_run.as_ref().filter(|r| r.is_active()) {
            self.term(collection, run.run_id, true).await
        } else {
            let execution_plans = self.metadata.get_execution_plans(collection.id).await.unwrap_or_default();
            let mut last_error = None;
            for execution_plan in &execution_plans {
                let key = (collection.id, execution_plan.plan_id);
                if let Some((_, controller)) = self.plan_controllers.remove(&key) {
                    if let Err(err) = controller.term(true, &self.connected_engines, &self.metrics).await {
                        last_error = Some(err);
                    }
                }
            }
            match last_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        };

        let purge_result = self.cluster.purge_collection(collection.id).await;

        let execution_plans = self.metadata.get_execution_plans(collection.id).await.unwrap_or_default();
        let usage: u64 = execution_plans
            .iter()
            .map(|ep| ep.engines as u64 * ep.concurrency as u64)
            .sum();
        let _ = self.metadata.mark_usage_finished(context, usage).await;

        term_result.and(purge_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EngineKind, ExecutionPlan, Plan, Project};
    use crate::testing::{InMemoryClusterDriver, InMemoryMetadataStore};

    fn orchestrator(
        metadata: Arc<InMemoryMetadataStore>,
        cluster: Arc<InMemoryClusterDriver>,
    ) -> CollectionOrchestrator {
        let (tx, _rx) = mpsc::channel(64);
        CollectionOrchestrator::new(
            metadata,
            cluster,
            Arc::new(ConnectedEngines::new()),
            Arc::new(EngineIndexStore::new()),
            Arc::new(PlanControllerRegistry::new()),
            Arc::new(MetricsRegistry::new().unwrap()),
            tx,
        )
    }

    async fn seed_collection_with_plan(
        metadata: &InMemoryMetadataStore,
        test_file: Option<&str>,
        engines: u32,
    ) -> Collection {
        let project = Project { id: Uuid::new_v4(), name: "demo".to_string() };
        let plan = Plan {
            id: Uuid::new_v4(),
            project_id: project.id,
            name: "checkout".to_string(),
            test_file: test_file.map(str::to_string),
            data_files: vec!["users.csv".to_string()],
        };
        let collection = Collection {
            id: Uuid::new_v4(),
            project_id: project.id,
            name: "load-test".to_string(),
            execution_plans: vec![],
            csv_split: false,
        };
        let execution_plan = ExecutionPlan {
            id: Uuid::new_v4(),
            collection_id: collection.id,
            plan_id: plan.id,
            engines,
            concurrency: 10,
            duration_seconds: 60,
            rampup_seconds: 1,
            kind: EngineKind::Jmeter,
        };
        metadata.insert_project(project).await;
        metadata.insert_plan(plan).await;
        metadata.insert_execution_plan(execution_plan).await;
        metadata.insert_collection(collection.clone()).await;
        collection
    }

    #[tokio::test]
    async fn trigger_rejects_collection_with_plan_missing_test_file() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let cluster = Arc::new(InMemoryClusterDriver::new());
        let collection = seed_collection_with_plan(&metadata, None, 1).await;
        let orchestrator = orchestrator(metadata, cluster);
        let err = orchestrator.trigger(&collection).await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[tokio::test]
    async fn prepare_without_csv_split_assigns_no_sharding() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let cluster = Arc::new(InMemoryClusterDriver::new());
        let collection = seed_collection_with_plan(&metadata, Some("checkout.jmx"), 1).await;
        let orchestrator = orchestrator(metadata, cluster);
        let prepared = orchestrator.prepare(&collection).await.unwrap();
        let refs = prepared.values().next().unwrap();
        assert_eq!(refs[0].total_splits, 1);
        assert_eq!(refs[0].current_split, 0);
    }
}
