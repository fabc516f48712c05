use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::engine_client::EngineClient;
use crate::error::ControllerError;
use crate::interfaces::ClusterDriver;
use crate::model::{EngineDataConfig, EngineId, ExecutionPlan};
use crate::store::{EngineIndexStore, MetricsRegistry};
use crate::util::aggregate_errors;

/// `connectedEngines`: the controller-wide map of every subscribed engine,
/// keyed by its identity.
pub type ConnectedEngines = DashMap<EngineId, Arc<EngineClient>>;

/// `(collection_id, plan_id) → the live PlanController driving it`. Shared
/// between the Collection Orchestrator (which creates entries on trigger)
/// and the reconciliation loops (which consult `progress()` and call
/// `term()` on the *same* instance that holds the subscribed engines —
/// a fresh `PlanController` has no engines and would report `progress() ==
/// false` unconditionally.
pub type PlanControllerRegistry = DashMap<(Uuid, Uuid), Arc<PlanController>>;

/// Owns one Execution Plan for one run.
pub struct PlanController {
    pub collection_id: Uuid,
    pub plan_id: Uuid,
    pub execution_plan: ExecutionPlan,
    engines: RwLock<Vec<Arc<EngineClient>>>,
}

impl PlanController {
    pub fn new(execution_plan: ExecutionPlan) -> Self {
        Self {
            collection_id: execution_plan.collection_id,
            plan_id: execution_plan.plan_id,
            execution_plan,
            engines: RwLock::new(Vec::new()),
        }
    }

    /// Generates `N = execution_plan.engines` engine clients, resolves
    /// their URLs via the cluster driver (fails if resolved count != N),
    /// then fans out `trigger` concurrently. Returns the aggregated error
    /// if any engine failed; does not roll back here — that policy belongs
    /// to the Collection Orchestrator.
    pub async fn trigger(
        &self,
        driver: &dyn ClusterDriver,
        project_id: Uuid,
        configs: &[EngineDataConfig],
    ) -> Result<(), ControllerError> {
        let n = self.execution_plan.engines;
        if configs.len() != n as usize {
            return Err(ControllerError::Validation(format!(
                "expected {n} engine data configs, got {}",
                configs.len()
            )));
        }

        // The container image is chosen from the execution plan's engine
        // kind rather than hardcoded or runtime type-switched; today
        // JMeter is the only variant.
        let container_spec = crate::interfaces::cluster_driver::ContainerSpec {
            image: self.execution_plan.kind.container_image().to_string(),
            cpu_millicores: None,
            memory_bytes: None,
        };
        let mut clients = Vec::with_capacity(n as usize);
        for index in 0..n {
            let client = EngineClient::new(EngineId::new(self.collection_id, self.plan_id, index))?;
            client.deploy(driver, project_id, &container_spec).await?;
            clients.push(client);
        }

        let urls = driver
            .fetch_engine_urls_by_plan(self.collection_id, self.plan_id, n)
            .await?;
        if urls.len() != n as usize {
            return Err(ControllerError::Validation(format!(
                "cluster driver resolved {} urls, expected {n}",
                urls.len()
            )));
        }
        for (client, url) in clients.iter().zip(urls.into_iter()) {
            client.set_url(url).await;
        }
        let clients: Vec<Arc<EngineClient>> = clients.into_iter().map(Arc::new).collect();

        let results = join_all(
            clients
                .iter()
                .zip(configs.iter())
                .map(|(client, config)| client.trigger(config)),
        )
        .await;

        *self.engines.write().await = clients;

        let errors: Vec<ControllerError> = results.into_iter().filter_map(Result::err).collect();
        match aggregate_errors(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Subscribes every engine of this plan and registers it into the
    /// process-wide `connectedEngines` map, enqueueing its metric stream
    /// onto `reading_engines` for the Metric Pipeline.
    pub async fn subscribe(
        &self,
        connected_engines: &ConnectedEngines,
        engine_index: &EngineIndexStore,
        reading_engines: &mpsc::Sender<Arc<EngineClient>>,
        run_id: i64,
    ) -> Result<(), ControllerError> {
        let engines = self.engines.read().await.clone();
        let mut errors = Vec::new();
        for engine in engines {
            if let Err(err) = engine.subscribe(run_id).await {
                errors.push(err);
                continue;
            }
            connected_engines.insert(engine.id.clone(), engine.clone());
            engine_index.insert(run_id, engine.id.clone());
            if reading_engines.send(engine).await.is_err() {
                errors.push(ControllerError::Internal(
                    "metric pipeline channel closed".to_string(),
                ));
            }
        }
        match aggregate_errors(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// True iff *any* engine of the plan still reports progress.
    pub async fn progress(&self) -> Result<bool, ControllerError> {
        let engines = self.engines.read().await.clone();
        let results = join_all(engines.iter().map(|e| e.progress())).await;
        for result in results {
            if result? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fans out termination to all connected engines of this plan, removes
    /// them from `connected_engines`, and deletes engine-health
    /// time-series labeled with this plan.
    pub async fn term(
        &self,
        force: bool,
        connected_engines: &ConnectedEngines,
        metrics: &MetricsRegistry,
    ) -> Result<(), ControllerError> {
        let engines = self.engines.read().await.clone();
        let results = join_all(engines.iter().map(|e| e.terminate(force))).await;

        for engine in &engines {
            connected_engines.remove(&engine.id);
            let _ = metrics.cpu_gauge.remove_label_values(&[
                &self.collection_id.to_string(),
                &self.plan_id.to_string(),
                &engine.id.engine_index.to_string(),
            ]);
            let _ = metrics.mem_gauge.remove_label_values(&[
                &self.collection_id.to_string(),
                &self.plan_id.to_string(),
                &engine.id.engine_index.to_string(),
            ]);
        }

        let errors: Vec<ControllerError> = results.into_iter().filter_map(Result::err).collect();
        match aggregate_errors(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EngineKind;
    use crate::testing::InMemoryClusterDriver;

    fn execution_plan(collection_id: Uuid, engines: u32) -> ExecutionPlan {
        ExecutionPlan {
            id: Uuid::new_v4(),
            collection_id,
            plan_id: Uuid::new_v4(),
            engines,
            concurrency: 10,
            duration_seconds: 60,
            rampup_seconds: 1,
            kind: EngineKind::Jmeter,
        }
    }

    #[tokio::test]
    async fn trigger_rejects_mismatched_config_count() {
        let collection_id = Uuid::new_v4();
        let controller = PlanController::new(execution_plan(collection_id, 2));
        let driver = InMemoryClusterDriver::new();
        let err = controller
            .trigger(&driver, Uuid::new_v4(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[tokio::test]
    async fn progress_is_false_with_no_subscribed_engines() {
        let controller = PlanController::new(execution_plan(Uuid::new_v4(), 1));
        assert!(!controller.progress().await.unwrap());
    }
}
