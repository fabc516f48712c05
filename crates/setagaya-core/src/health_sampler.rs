use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::error::ControllerError;
use crate::interfaces::{ClusterDriver, MetadataStore};
use crate::store::MetricsRegistry;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Engine-health sampler: every `SAMPLE_INTERVAL`, lists every
/// *launching* collection in the current deployment context, lists its
/// execution plans, and asks the cluster driver for per-pod CPU/memory.
/// If the driver reports `FeatureUnavailable`, the sampler exits
/// permanently rather than retrying; any other error is logged and the
/// loop continues to the next iteration.
pub async fn run(
    metadata: Arc<dyn MetadataStore>,
    cluster: Arc<dyn ClusterDriver>,
    metrics: Arc<MetricsRegistry>,
    context: String,
    cancel: CancellationToken,
) {
    let mut ticker = interval(SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sample_once(&metadata, &cluster, &metrics, &context).await {
                    Ok(()) => {}
                    Err(ControllerError::FeatureUnavailable(reason)) => {
                        tracing::info!(reason, "health sampler: pod metrics unavailable, exiting permanently");
                        return;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "health sampler: iteration failed");
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn sample_once(
    metadata: &Arc<dyn MetadataStore>,
    cluster: &Arc<dyn ClusterDriver>,
    metrics: &Arc<MetricsRegistry>,
    context: &str,
) -> Result<(), ControllerError> {
    let collections = metadata.get_launching_collections_by_context(context).await?;
    for collection_id in collections {
        let execution_plans = metadata.get_execution_plans(collection_id).await?;
        for execution_plan in execution_plans {
            let pod_metrics = cluster.get_pods_metrics(collection_id, execution_plan.plan_id).await?;
            for (engine_index, pod) in pod_metrics {
                metrics
                    .cpu_gauge
                    .with_label_values(&[
                        &collection_id.to_string(),
                        &execution_plan.plan_id.to_string(),
                        &engine_index.to_string(),
                    ])
                    .set(pod.cpu_millicores as f64);
                metrics
                    .mem_gauge
                    .with_label_values(&[
                        &collection_id.to_string(),
                        &execution_plan.plan_id.to_string(),
                        &engine_index.to_string(),
                    ])
                    .set(pod.memory_bytes as f64);
            }
        }
    }
    Ok(())
}
