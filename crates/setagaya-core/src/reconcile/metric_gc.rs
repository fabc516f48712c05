use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::interfaces::MetadataStore;
use crate::model::EngineId;
use crate::store::{EngineIndexStore, LabelStore, MetricsRegistry};

const GC_INTERVAL: Duration = Duration::from_secs(120);

/// Metric garbage collector: iterates every `run_id` known to the
/// LabelStore, looks up its `Run`, and — once `end_time` is set — deletes
/// every registry time-series labeled with that run (reconstructing the
/// exact label combinations from LabelStore/StatusStore/EngineIndexStore),
/// then removes the run's entries from all three stores.
pub async fn run(
    metadata: Arc<dyn MetadataStore>,
    metrics: Arc<MetricsRegistry>,
    label_store: Arc<LabelStore>,
    status_store: Arc<LabelStore>,
    engine_index: Arc<EngineIndexStore>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(GC_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&metadata, &metrics, &label_store, &status_store, &engine_index).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn sweep_once(
    metadata: &Arc<dyn MetadataStore>,
    metrics: &Arc<MetricsRegistry>,
    label_store: &Arc<LabelStore>,
    status_store: &Arc<LabelStore>,
    engine_index: &Arc<EngineIndexStore>,
) {
    for run_id in label_store.run_ids() {
        let run = match metadata.get_run(run_id).await {
            Ok(run) => run,
            Err(err) => {
                tracing::error!(error = %err, run_id, "metric gc: failed to look up run");
                continue;
            }
        };
        if run.is_active() {
            continue;
        }

        let collection_id = run.collection_id.to_string();
        let labels = label_store.values(run_id);
        let statuses = status_store.values(run_id);
        let engines = engine_index.values(run_id);

        let mut by_plan: HashMap<Uuid, Vec<EngineId>> = HashMap::new();
        for engine_id in engines {
            by_plan.entry(engine_id.plan_id).or_default().push(engine_id);
        }

        if by_plan.is_empty() {
            // No per-engine bookkeeping survived (e.g. every plan failed to
            // trigger) — still clear the collection/label-scoped series.
            metrics.delete_run(&collection_id, "", &run_id.to_string(), &[], &labels, &statuses);
        } else {
            for (plan_id, plan_engines) in by_plan {
                let engine_strs: Vec<String> =
                    plan_engines.iter().map(|e| e.engine_index.to_string()).collect();
                metrics.delete_run(
                    &collection_id,
                    &plan_id.to_string(),
                    &run_id.to_string(),
                    &engine_strs,
                    &labels,
                    &statuses,
                );
            }
        }

        label_store.delete(run_id);
        status_store.delete(run_id);
        engine_index.delete(run_id);
        tracing::info!(run_id, "metric gc: cleared time-series for finished run");
    }
}
