use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ControllerError;
use crate::interfaces::cluster_driver::{ClusterDriver, ContainerSpec, PodMetrics};

#[derive(Default, Clone)]
struct DeployedPlan {
    engine_count: u32,
    urls: Vec<String>,
}

/// In-process `ClusterDriver`. Tracks "deployed" state in memory instead of
/// talking to Kubernetes/Cloud Run; `reports_metrics_unavailable` lets
/// tests exercise the health-sampler permanent-exit path.
pub struct InMemoryClusterDriver {
    deployed: RwLock<HashMap<(Uuid, Uuid), DeployedPlan>>,
    launch_times: RwLock<HashMap<Uuid, DateTime<Utc>>>,
    purged_collections: RwLock<Vec<Uuid>>,
    purged_ingress: RwLock<Vec<Uuid>>,
    reports_metrics_unavailable: bool,
    reachable: RwLock<HashMap<String, bool>>,
}

impl Default for InMemoryClusterDriver {
    fn default() -> Self {
        Self {
            deployed: RwLock::new(HashMap::new()),
            launch_times: RwLock::new(HashMap::new()),
            purged_collections: RwLock::new(Vec::new()),
            purged_ingress: RwLock::new(Vec::new()),
            reports_metrics_unavailable: false,
            reachable: RwLock::new(HashMap::new()),
        }
    }
}

impl InMemoryClusterDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics_unavailable() -> Self {
        Self { reports_metrics_unavailable: true, ..Self::default() }
    }

    pub async fn purged_collections(&self) -> Vec<Uuid> {
        self.purged_collections.read().await.clone()
    }

    pub async fn purged_ingress_projects(&self) -> Vec<Uuid> {
        self.purged_ingress.read().await.clone()
    }

    pub async fn set_launch_time(&self, collection_id: Uuid, launch_time: DateTime<Utc>) {
        self.launch_times.write().await.insert(collection_id, launch_time);
    }
}

#[async_trait]
impl ClusterDriver for InMemoryClusterDriver {
    async fn deploy_engine(
        &self,
        _project_id: Uuid,
        collection_id: Uuid,
        plan_id: Uuid,
        engine_index: u32,
        _container_spec: &ContainerSpec,
    ) -> Result<(), ControllerError> {
        let mut deployed = self.deployed.write().await;
        let entry = deployed.entry((collection_id, plan_id)).or_default();
        entry.engine_count = entry.engine_count.max(engine_index + 1);
        entry
            .urls
            .resize(entry.engine_count as usize, String::new());
        entry.urls[engine_index as usize] =
            format!("http://engine-{collection_id}-{plan_id}-{engine_index}.local");
        self.launch_times
            .write()
            .await
            .entry(collection_id)
            .or_insert_with(Utc::now);
        Ok(())
    }

    async fn fetch_engine_urls_by_plan(
        &self,
        collection_id: Uuid,
        plan_id: Uuid,
        _owner_engines: u32,
    ) -> Result<Vec<String>, ControllerError> {
        Ok(self
            .deployed
            .read()
            .await
            .get(&(collection_id, plan_id))
            .map(|p| p.urls.clone())
            .unwrap_or_default())
    }

    async fn purge_collection(&self, collection_id: Uuid) -> Result<(), ControllerError> {
        self.deployed
            .write()
            .await
            .retain(|(cid, _), _| *cid != collection_id);
        self.launch_times.write().await.remove(&collection_id);
        self.purged_collections.write().await.push(collection_id);
        Ok(())
    }

    async fn purge_project_ingress(&self, project_id: Uuid) -> Result<(), ControllerError> {
        self.purged_ingress.write().await.push(project_id);
        Ok(())
    }

    async fn get_deployed_collections(&self) -> Result<HashMap<Uuid, DateTime<Utc>>, ControllerError> {
        Ok(self.launch_times.read().await.clone())
    }

    async fn get_deployed_services(&self) -> Result<Vec<Uuid>, ControllerError> {
        Ok(self.launch_times.read().await.keys().cloned().collect())
    }

    async fn get_engines_by_project(&self, _project_id: Uuid) -> Result<Vec<Uuid>, ControllerError> {
        Ok(Vec::new())
    }

    async fn get_pods_metrics(
        &self,
        collection_id: Uuid,
        plan_id: Uuid,
    ) -> Result<HashMap<u32, PodMetrics>, ControllerError> {
        if self.reports_metrics_unavailable {
            return Err(ControllerError::FeatureUnavailable("pod metrics".to_string()));
        }
        let deployed = self.deployed.read().await;
        let plan = deployed.get(&(collection_id, plan_id));
        Ok(plan
            .map(|p| {
                (0..p.engine_count)
                    .map(|i| (i, PodMetrics { cpu_millicores: 100, memory_bytes: 1024 * 1024 }))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn service_reachable(&self, url: &str) -> Result<bool, ControllerError> {
        Ok(*self.reachable.read().await.get(url).unwrap_or(&true))
    }

    async fn most_recent_pod_creation(&self, project_id: Uuid) -> Result<Option<DateTime<Utc>>, ControllerError> {
        Ok(self.launch_times.read().await.get(&project_id).cloned())
    }
}
