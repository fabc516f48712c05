use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::interfaces::{ClusterDriver, MetadataStore};

/// Ingress auto-purger: `last_used` for a project is the later of its
/// most recent pod-creation timestamp and its most recent run's
/// end-time-or-now-if-still-running, across every collection in the
/// project. `None` inputs drop out of the max (a project with no pods and
/// no runs has no meaningful `last_used` and is left alone).
pub fn last_used(most_recent_pod_creation: Option<DateTime<Utc>>, run_ends: &[Option<DateTime<Utc>>], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let run_last_used = run_ends.iter().map(|end| end.unwrap_or(now)).max();
    match (most_recent_pod_creation, run_last_used) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

pub fn is_expired(last_used: DateTime<Utc>, now: DateTime<Utc>, lifespan: Duration) -> bool {
    let lifespan = chrono::Duration::from_std(lifespan).unwrap_or(chrono::Duration::zero());
    now.signed_duration_since(last_used) > lifespan
}

/// Iterates every deployed ingress-serving project (`get_deployed_services`
/// — the only project-scoped listing the driver offers) and purges its
/// ingress once idle past `lifespan`.
pub async fn run(
    metadata: Arc<dyn MetadataStore>,
    cluster: Arc<dyn ClusterDriver>,
    lifespan: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&metadata, &cluster, lifespan).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn sweep_once(metadata: &Arc<dyn MetadataStore>, cluster: &Arc<dyn ClusterDriver>, lifespan: Duration) {
    let projects = match cluster.get_deployed_services().await {
        Ok(projects) => projects,
        Err(err) => {
            tracing::error!(error = %err, "ingress purger: failed to list deployed services");
            return;
        }
    };

    let now = Utc::now();
    for project_id in projects {
        if let Err(err) = purge_if_idle(metadata, cluster, project_id, lifespan, now).await {
            tracing::error!(error = %err, %project_id, "ingress purger: failed to evaluate project");
        }
    }
}

async fn purge_if_idle(
    metadata: &Arc<dyn MetadataStore>,
    cluster: &Arc<dyn ClusterDriver>,
    project_id: Uuid,
    lifespan: Duration,
    now: DateTime<Utc>,
) -> Result<(), crate::error::ControllerError> {
    let pod_creation = cluster.most_recent_pod_creation(project_id).await?;
    let collections = metadata.get_collections_by_project(project_id).await?;

    let mut run_ends = Vec::with_capacity(collections.len());
    for collection_id in collections {
        if let Some(run) = metadata.get_last_run(collection_id).await? {
            run_ends.push(run.end_time);
        }
    }

    let Some(last_used_at) = last_used(pod_creation, &run_ends, now) else {
        return Ok(());
    };

    if is_expired(last_used_at, now, lifespan) {
        tracing::info!(%project_id, "ingress purger: purging idle project ingress");
        cluster.purge_project_ingress(project_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_used_prefers_the_later_of_pods_and_runs() {
        let now = Utc::now();
        let pod = now - chrono::Duration::minutes(10);
        let run_end = now - chrono::Duration::minutes(2);
        assert_eq!(last_used(Some(pod), &[Some(run_end)], now), Some(run_end));
    }

    #[test]
    fn still_running_plan_counts_as_used_right_now() {
        let now = Utc::now();
        let pod = now - chrono::Duration::minutes(60);
        assert_eq!(last_used(Some(pod), &[None], now), Some(now));
    }

    #[test]
    fn no_signals_at_all_yields_none() {
        let now = Utc::now();
        assert_eq!(last_used(None, &[], now), None);
    }

    #[test]
    fn expired_past_lifespan() {
        let now = Utc::now();
        let used = now - chrono::Duration::minutes(90);
        assert!(is_expired(used, now, Duration::from_secs(60 * 60)));
        assert!(!is_expired(now, now, Duration::from_secs(60 * 60)));
    }
}
