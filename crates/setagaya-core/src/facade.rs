use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::collection_orchestrator::CollectionOrchestrator;
use crate::config::Config;
use crate::engine_client::EngineClient;
use crate::error::ControllerError;
use crate::health_sampler;
use crate::interfaces::{ClusterDriver, MetadataStore, ObjectStore};
use crate::metric_pipeline::{DashboardEvent, MetricPipeline};
use crate::model::Collection;
use crate::plan_controller::{ConnectedEngines, PlanControllerRegistry};
use crate::reconcile::ReconcileLoops;
use crate::store::{EngineIndexStore, LabelStore, MetricsRegistry};

const DASHBOARD_CAPACITY: usize = 1024;
const ENGINE_CHANNEL_CAPACITY: usize = 256;

/// Composes every other component, holds the shared maps
/// (`connectedEngines`, `LabelStore`, `StatusStore`) and the event bus, and
/// starts the background loops exactly once per process.
pub struct ControllerFacade {
    config: Config,
    metadata: Arc<dyn MetadataStore>,
    cluster: Arc<dyn ClusterDriver>,
    object_store: Arc<dyn ObjectStore>,
    connected_engines: Arc<ConnectedEngines>,
    label_store: Arc<LabelStore>,
    status_store: Arc<LabelStore>,
    engine_index: Arc<EngineIndexStore>,
    plan_controllers: Arc<PlanControllerRegistry>,
    metrics: Arc<MetricsRegistry>,
    pipeline: Arc<MetricPipeline>,
    orchestrator: Arc<CollectionOrchestrator>,
    background: Option<Background>,
}

struct Background {
    reconcile: ReconcileLoops,
    health_sampler: tokio::task::JoinHandle<()>,
    cancel: tokio_util::sync::CancellationToken,
}

impl ControllerFacade {
    /// Builds every shared map, the metric pipeline, and the collection
    /// orchestrator, but does not start the background loops — call
    /// `start_background_loops` once per process after construction.
    pub fn new(
        config: Config,
        metadata: Arc<dyn MetadataStore>,
        cluster: Arc<dyn ClusterDriver>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Result<Self, ControllerError> {
        let connected_engines = Arc::new(ConnectedEngines::new());
        let label_store = Arc::new(LabelStore::new());
        let status_store = Arc::new(LabelStore::new());
        let engine_index = Arc::new(EngineIndexStore::new());
        let plan_controllers = Arc::new(PlanControllerRegistry::new());
        let metrics = Arc::new(MetricsRegistry::new()?);
        let pipeline = Arc::new(MetricPipeline::new(
            metrics.clone(),
            label_store.clone(),
            status_store.clone(),
            DASHBOARD_CAPACITY,
        ));

        let (reading_engines_tx, reading_engines_rx) = mpsc::channel::<Arc<EngineClient>>(ENGINE_CHANNEL_CAPACITY);
        tokio::spawn(pipeline.clone().run(reading_engines_rx));

        let orchestrator = Arc::new(CollectionOrchestrator::new(
            metadata.clone(),
            cluster.clone(),
            connected_engines.clone(),
            engine_index.clone(),
            plan_controllers.clone(),
            metrics.clone(),
            reading_engines_tx,
        ));

        Ok(Self {
            config,
            metadata,
            cluster,
            object_store,
            connected_engines,
            label_store,
            status_store,
            engine_index,
            plan_controllers,
            metrics,
            pipeline,
            orchestrator,
            background: None,
        })
    }

    /// Starts the four reconciliation loops (only meaningful under
    /// `DistributedMode`) and the health sampler. Idempotent — calling
    /// this twice is a no-op rather than spawning duplicate loops.
    pub fn start_background_loops(&mut self) {
        if self.background.is_some() {
            return;
        }

        let reconcile = ReconcileLoops::spawn(
            self.metadata.clone(),
            self.cluster.clone(),
            self.orchestrator.clone(),
            self.connected_engines.clone(),
            self.plan_controllers.clone(),
            self.metrics.clone(),
            self.label_store.clone(),
            self.status_store.clone(),
            self.engine_index.clone(),
            self.config.context.clone(),
            self.config.gc_duration(),
            self.config.ingress_lifespan(),
            self.config.ingress_gc_interval(),
        );

        let cancel = tokio_util::sync::CancellationToken::new();
        let health_sampler = tokio::spawn(health_sampler::run(
            self.metadata.clone(),
            self.cluster.clone(),
            self.metrics.clone(),
            self.config.context.clone(),
            cancel.clone(),
        ));

        self.background = Some(Background { reconcile, health_sampler, cancel });
    }

    /// Cancels the health sampler and every reconciliation loop, and waits
    /// for their current iterations to finish (graceful-shutdown hook).
    pub async fn shutdown(&mut self) {
        if let Some(background) = self.background.take() {
            background.cancel.cancel();
            background.reconcile.shutdown().await;
            let _ = background.health_sampler.await;
        }
    }

    pub async fn trigger(&self, collection: &Collection) -> Result<i64, ControllerError> {
        self.orchestrator.trigger(collection).await
    }

    pub async fn term(&self, collection: &Collection, run_id: i64, force: bool) -> Result<(), ControllerError> {
        self.orchestrator.term(collection, run_id, force).await
    }

    pub async fn term_and_purge(&self, collection: &Collection) -> Result<(), ControllerError> {
        self.orchestrator.term_and_purge(collection, &self.config.context).await
    }

    pub fn subscribe_dashboard(&self) -> broadcast::Receiver<DashboardEvent> {
        self.pipeline.subscribe_dashboard()
    }

    /// Renders every registered time-series for the `/metrics` scrape
    /// surface consumed by an external collector.
    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.metrics.gather()
    }

    pub async fn download_file(&self, filepath: &str) -> Result<Vec<u8>, ControllerError> {
        self.object_store.download(filepath).await
    }

    pub async fn collection(&self, collection_id: Uuid) -> Result<Collection, ControllerError> {
        self.metadata.get_collection(collection_id).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
