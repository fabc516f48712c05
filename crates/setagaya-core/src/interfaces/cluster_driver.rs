use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ControllerError;

/// Opaque container spec handed to the driver; the controller never
/// interprets its contents, only carries it.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub cpu_millicores: Option<u64>,
    pub memory_bytes: Option<u64>,
}

/// Per-resource quantities reported for one pod.
#[derive(Debug, Clone, Default)]
pub struct PodMetrics {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
}

/// The pluggable cluster scheduler abstraction. Implementations outside
/// this repo would talk to Kubernetes, Cloud Run, etc; the controller only
/// ever calls through this trait and must tolerate `FeatureUnavailable`
/// for the metrics capability.
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    async fn deploy_engine(
        &self,
        project_id: Uuid,
        collection_id: Uuid,
        plan_id: Uuid,
        engine_index: u32,
        container_spec: &ContainerSpec,
    ) -> Result<(), ControllerError>;

    async fn fetch_engine_urls_by_plan(
        &self,
        collection_id: Uuid,
        plan_id: Uuid,
        owner_engines: u32,
    ) -> Result<Vec<String>, ControllerError>;

    async fn purge_collection(&self, collection_id: Uuid) -> Result<(), ControllerError>;
    async fn purge_project_ingress(&self, project_id: Uuid) -> Result<(), ControllerError>;

    /// Collection id → launch time, for every collection the driver still
    /// has deployed resources for. Consumed by the deployment auto-purger.
    async fn get_deployed_collections(&self) -> Result<HashMap<Uuid, DateTime<Utc>>, ControllerError>;

    async fn get_deployed_services(&self) -> Result<Vec<Uuid>, ControllerError>;
    async fn get_engines_by_project(&self, project_id: Uuid) -> Result<Vec<Uuid>, ControllerError>;

    /// Per-engine pod metrics for a plan. Must return
    /// `Err(ControllerError::FeatureUnavailable(_))` on drivers that can't
    /// provide pod metrics — the health sampler exits permanently on that
    /// variant rather than retrying.
    async fn get_pods_metrics(
        &self,
        collection_id: Uuid,
        plan_id: Uuid,
    ) -> Result<HashMap<u32, PodMetrics>, ControllerError>;

    async fn service_reachable(&self, url: &str) -> Result<bool, ControllerError>;

    /// Most recent pod-creation timestamp among a project's deployed
    /// engines; feeds the ingress auto-purger's `last_used` computation.
    async fn most_recent_pod_creation(&self, project_id: Uuid) -> Result<Option<DateTime<Utc>>, ControllerError>;
}
