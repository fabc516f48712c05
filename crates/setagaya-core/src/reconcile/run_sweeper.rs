use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::interfaces::MetadataStore;
use crate::model::RunningPlan;
use crate::plan_controller::{ConnectedEngines, PlanControllerRegistry};
use crate::store::MetricsRegistry;

const SWEEP_INTERVAL: Duration = Duration::from_secs(2);
const SWEEP_WORKERS: usize = 3;

/// Run-completion sweeper: fetches every `RunningPlan`, groups by
/// collection (via a per-iteration cache to avoid redundant metadata
/// lookups), and dispatches each onto a bounded pool of `SWEEP_WORKERS`
/// concurrent workers. For each, consults `PlanController::progress()`; if
/// it reports false, terminates gracefully and — if no other plan in the
/// collection remains running — closes the run.
///
/// The bounded work queue is expressed here as a `tokio::sync::Semaphore`
/// bounding concurrent in-flight sweeps, the same interval/select shape
/// used by the other reconciliation loops.
pub async fn run(
    metadata: Arc<dyn MetadataStore>,
    plan_controllers: Arc<PlanControllerRegistry>,
    connected_engines: Arc<ConnectedEngines>,
    metrics: Arc<MetricsRegistry>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&metadata, &plan_controllers, &connected_engines, &metrics).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn sweep_once(
    metadata: &Arc<dyn MetadataStore>,
    plan_controllers: &Arc<PlanControllerRegistry>,
    connected_engines: &Arc<ConnectedEngines>,
    metrics: &Arc<MetricsRegistry>,
) {
    let running_plans = match metadata.get_running_plans().await {
        Ok(plans) => plans,
        Err(err) => {
            tracing::error!(error = %err, "run sweeper: failed to list running plans");
            return;
        }
    };
    if running_plans.is_empty() {
        return;
    }

    // Per-iteration cache: fetch each distinct collection once rather than
    // once per running plan, and drop plans whose collection vanished.
    let collection_ids: HashSet<Uuid> = running_plans.iter().map(|rp| rp.collection_id).collect();
    let mut live_collections: HashSet<Uuid> = HashSet::with_capacity(collection_ids.len());
    for collection_id in collection_ids {
        if metadata.get_collection(collection_id).await.is_ok() {
            live_collections.insert(collection_id);
        } else {
            tracing::debug!(%collection_id, "run sweeper: collection vanished, skipping its plans this cycle");
        }
    }
    let running_plans: Vec<RunningPlan> = running_plans
        .into_iter()
        .filter(|rp| live_collections.contains(&rp.collection_id))
        .collect();

    let semaphore = Arc::new(Semaphore::new(SWEEP_WORKERS));
    let mut handles = Vec::with_capacity(running_plans.len());
    for running_plan in running_plans {
        let semaphore = semaphore.clone();
        let metadata = metadata.clone();
        let plan_controllers = plan_controllers.clone();
        let connected_engines = connected_engines.clone();
        let metrics = metrics.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("sweep semaphore never closed");
            sweep_plan(running_plan, &metadata, &plan_controllers, &connected_engines, &metrics).await;
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

async fn sweep_plan(
    running_plan: RunningPlan,
    metadata: &Arc<dyn MetadataStore>,
    plan_controllers: &Arc<PlanControllerRegistry>,
    connected_engines: &Arc<ConnectedEngines>,
    metrics: &Arc<MetricsRegistry>,
) {
    let key = (running_plan.collection_id, running_plan.plan_id);
    let Some(controller) = plan_controllers.get(&key).map(|entry| entry.value().clone()) else {
        // No live controller for this bookkeeping entry (already terminated
        // through another path) — drop the stale entry.
        let _ = metadata
            .remove_running_plan(running_plan.collection_id, running_plan.plan_id)
            .await;
        return;
    };

    match controller.progress().await {
        Ok(true) => {}
        Ok(false) => {
            if let Err(err) = controller.term(false, connected_engines, metrics).await {
                tracing::error!(error = %err, plan_id = %running_plan.plan_id, "run sweeper: term failed");
            }
            plan_controllers.remove(&key);
            let _ = metadata
                .remove_running_plan(running_plan.collection_id, running_plan.plan_id)
                .await;

            match metadata.has_running_plan(running_plan.collection_id).await {
                Ok(false) => {
                    if let Err(err) = metadata.stop_run(running_plan.run_id).await {
                        tracing::error!(error = %err, run_id = running_plan.run_id, "run sweeper: stop_run failed");
                    }
                    if let Err(err) = metadata.run_finish(running_plan.run_id, Utc::now()).await {
                        tracing::error!(error = %err, run_id = running_plan.run_id, "run sweeper: run_finish failed");
                    }
                }
                Ok(true) => {}
                Err(err) => {
                    tracing::error!(error = %err, "run sweeper: has_running_plan check failed")
                }
            }
        }
        Err(err) => {
            tracing::error!(error = %err, plan_id = %running_plan.plan_id, "run sweeper: progress check failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EngineKind, ExecutionPlan};
    use crate::plan_controller::PlanController;
    use crate::testing::InMemoryMetadataStore;

    async fn seed_finished_plan(metadata: &InMemoryMetadataStore) -> RunningPlan {
        let collection_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let run_id = metadata.start_run(collection_id, Utc::now()).await.unwrap();
        let running_plan = RunningPlan { collection_id, plan_id, run_id };
        metadata.add_running_plan(running_plan.clone()).await.unwrap();
        running_plan
    }

    #[tokio::test]
    async fn sweep_closes_run_when_only_plan_reports_no_progress() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let running_plan = seed_finished_plan(&metadata).await;

        let plan_controllers = Arc::new(PlanControllerRegistry::new());
        let execution_plan = ExecutionPlan {
            id: Uuid::new_v4(),
            collection_id: running_plan.collection_id,
            plan_id: running_plan.plan_id,
            engines: 0,
            concurrency: 1,
            duration_seconds: 1,
            rampup_seconds: 1,
            kind: EngineKind::Jmeter,
        };
        // Zero engines -> `progress()` reports false unconditionally,
        // simulating a plan whose engines have all finished.
        plan_controllers.insert(
            (running_plan.collection_id, running_plan.plan_id),
            Arc::new(PlanController::new(execution_plan)),
        );

        let connected_engines = Arc::new(ConnectedEngines::new());
        let metrics = Arc::new(MetricsRegistry::new().unwrap());

        sweep_once(
            &(metadata.clone() as Arc<dyn MetadataStore>),
            &plan_controllers,
            &connected_engines,
            &metrics,
        )
        .await;

        assert!(metadata.get_running_plans().await.unwrap().is_empty());
        let run = metadata.get_run(running_plan.run_id).await.unwrap();
        assert!(run.end_time.is_some());
        assert!(plan_controllers.get(&(running_plan.collection_id, running_plan.plan_id)).is_none());
    }

    #[tokio::test]
    async fn sweep_skips_plans_whose_collection_has_vanished() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        // A running plan whose collection was never inserted (simulating
        // one deleted out from under the sweeper) must not be processed
        // at all this cycle -- left untouched in running_plans, not
        // removed as if it had been swept.
        let collection_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let run_id = metadata.start_run(collection_id, Utc::now()).await.unwrap();
        let running_plan = RunningPlan { collection_id, plan_id, run_id };
        metadata.add_running_plan(running_plan.clone()).await.unwrap();

        let plan_controllers = Arc::new(PlanControllerRegistry::new());
        let connected_engines = Arc::new(ConnectedEngines::new());
        let metrics = Arc::new(MetricsRegistry::new().unwrap());

        sweep_once(
            &(metadata.clone() as Arc<dyn MetadataStore>),
            &plan_controllers,
            &connected_engines,
            &metrics,
        )
        .await;

        assert_eq!(metadata.get_running_plans().await.unwrap().len(), 1);
        let run = metadata.get_run(run_id).await.unwrap();
        assert!(run.end_time.is_none());
    }

    #[tokio::test]
    async fn sweep_with_no_running_plans_is_a_no_op() {
        let metadata = Arc::new(InMemoryMetadataStore::new()) as Arc<dyn MetadataStore>;
        let plan_controllers = Arc::new(PlanControllerRegistry::new());
        let connected_engines = Arc::new(ConnectedEngines::new());
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        sweep_once(&metadata, &plan_controllers, &connected_engines, &metrics).await;
    }
}
