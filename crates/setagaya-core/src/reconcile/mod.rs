//! Four independent, long-running cooperative reconciliation loops with
//! fixed sleep intervals. Each is a plain `tokio::spawn`'d function racing
//! an interval tick against a shared `CancellationToken`, the same shape
//! as a progress-reporter task polling on an interval, rather than relying
//! on thread-local state.

pub mod deployment_purger;
pub mod ingress_purger;
pub mod metric_gc;
pub mod run_sweeper;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collection_orchestrator::CollectionOrchestrator;
use crate::interfaces::{ClusterDriver, MetadataStore};
use crate::plan_controller::{ConnectedEngines, PlanControllerRegistry};
use crate::store::{EngineIndexStore, LabelStore, MetricsRegistry};

/// Owns the cancellation handle and join handles for all four
/// reconciliation loops, so the Controller Facade can start them once per
/// process and stop them together on graceful shutdown.
pub struct ReconcileLoops {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

#[allow(clippy::too_many_arguments)]
impl ReconcileLoops {
    pub fn spawn(
        metadata: Arc<dyn MetadataStore>,
        cluster: Arc<dyn ClusterDriver>,
        orchestrator: Arc<CollectionOrchestrator>,
        connected_engines: Arc<ConnectedEngines>,
        plan_controllers: Arc<PlanControllerRegistry>,
        metrics: Arc<MetricsRegistry>,
        label_store: Arc<LabelStore>,
        status_store: Arc<LabelStore>,
        engine_index: Arc<EngineIndexStore>,
        context: String,
        gc_duration: Duration,
        ingress_lifespan: Duration,
        ingress_gc_interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();

        let sweeper = tokio::spawn(run_sweeper::run(
            metadata.clone(),
            plan_controllers,
            connected_engines,
            metrics.clone(),
            cancel.clone(),
        ));

        let gc = tokio::spawn(metric_gc::run(
            metadata.clone(),
            metrics,
            label_store,
            status_store,
            engine_index,
            cancel.clone(),
        ));

        let deployment = tokio::spawn(deployment_purger::run(
            metadata.clone(),
            cluster.clone(),
            orchestrator,
            context,
            gc_duration,
            cancel.clone(),
        ));

        let ingress = tokio::spawn(ingress_purger::run(
            metadata,
            cluster,
            ingress_lifespan,
            ingress_gc_interval,
            cancel.clone(),
        ));

        Self { cancel, handles: vec![sweeper, gc, deployment, ingress] }
    }

    /// Cancels every loop and waits for the current iteration of each to
    /// finish (graceful-shutdown hook).
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
