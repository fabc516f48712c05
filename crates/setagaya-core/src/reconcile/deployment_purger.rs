use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::collection_orchestrator::CollectionOrchestrator;
use crate::interfaces::ClusterDriver;
use crate::interfaces::MetadataStore;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Deployment auto-purger: a collection is stale iff the configured
/// grace period has elapsed since *both* its launch time and its last
/// run's `end_time`; a collection that has never run is stale purely on
/// launch time.
pub fn is_stale(
    launch_time: DateTime<Utc>,
    last_run_end_time: Option<DateTime<Utc>>,
    has_run: bool,
    now: DateTime<Utc>,
    gc_duration: Duration,
) -> bool {
    let elapsed_since_launch = now.signed_duration_since(launch_time);
    let gc = chrono::Duration::from_std(gc_duration).unwrap_or(chrono::Duration::zero());
    if elapsed_since_launch < gc {
        return false;
    }
    if !has_run {
        return true;
    }
    match last_run_end_time {
        Some(end_time) => now.signed_duration_since(end_time) >= gc,
        // A run is currently open: never stale regardless of launch age.
        None => false,
    }
}

/// Lists every deployed collection known to the cluster driver with its
/// launch time, and fully tears down (`term_and_purge`) any that are
/// stale per `is_stale`.
pub async fn run(
    metadata: Arc<dyn MetadataStore>,
    cluster: Arc<dyn ClusterDriver>,
    orchestrator: Arc<CollectionOrchestrator>,
    context: String,
    gc_duration: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(PURGE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&metadata, &cluster, &orchestrator, &context, gc_duration).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn sweep_once(
    metadata: &Arc<dyn MetadataStore>,
    cluster: &Arc<dyn ClusterDriver>,
    orchestrator: &Arc<CollectionOrchestrator>,
    context: &str,
    gc_duration: Duration,
) {
    let deployed = match cluster.get_deployed_collections().await {
        Ok(deployed) => deployed,
        Err(err) => {
            tracing::error!(error = %err, "deployment purger: failed to list deployed collections");
            return;
        }
    };

    let now = Utc::now();
    for (collection_id, launch_time) in deployed {
        let last_run = match metadata.get_last_run(collection_id).await {
            Ok(run) => run,
            Err(err) => {
                tracing::error!(error = %err, %collection_id, "deployment purger: failed to look up last run");
                continue;
            }
        };
        let has_run = last_run.is_some();
        let stale = is_stale(launch_time, last_run.and_then(|r| r.end_time), has_run, now, gc_duration);
        if !stale {
            continue;
        }

        let collection = match metadata.get_collection(collection_id).await {
            Ok(collection) => collection,
            Err(err) => {
                tracing::error!(error = %err, %collection_id, "deployment purger: failed to look up collection");
                continue;
            }
        };
        tracing::info!(%collection_id, "deployment purger: tearing down idle collection");
        if let Err(err) = orchestrator.term_and_purge(&collection, context).await {
            tracing::error!(error = %err, %collection_id, "deployment purger: term_and_purge failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mins(n: i64) -> chrono::Duration {
        chrono::Duration::minutes(n)
    }

    // Launched at T, last run end_time T+5m, GCDuration=30m: at T+36m the
    // collection is stale.
    #[test]
    fn stale_after_grace_period_past_both_launch_and_run_end() {
        let launch = Utc::now();
        let run_end = launch + mins(5);
        let now = launch + mins(36);
        assert!(is_stale(launch, Some(run_end), true, now, Duration::from_secs(30 * 60)));
    }

    #[test]
    fn not_stale_before_grace_period_elapses() {
        let launch = Utc::now();
        let run_end = launch + mins(5);
        let now = launch + mins(20);
        assert!(!is_stale(launch, Some(run_end), true, now, Duration::from_secs(30 * 60)));
    }

    #[test]
    fn never_run_collection_is_stale_on_launch_time_alone() {
        let launch = Utc::now();
        let now = launch + mins(31);
        assert!(is_stale(launch, None, false, now, Duration::from_secs(30 * 60)));
    }

    #[test]
    fn currently_running_collection_is_never_stale() {
        let launch = Utc::now() - mins(500);
        let now = Utc::now();
        assert!(!is_stale(launch, None, true, now, Duration::from_secs(30 * 60)));
    }
}
