use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::engine_client::EngineClient;
use crate::model::SetagayaMetric;
use crate::store::{LabelStore, MetricsRegistry};

/// `{collection, plan, raw_line}` published for live dashboards.
/// Best-effort: dropped if no subscriber is ready.
#[derive(Debug, Clone)]
pub struct DashboardEvent {
    pub collection_id: Uuid,
    pub plan_id: Uuid,
    pub raw_line: String,
}

/// Converts raw metric lines from all engines into registry updates and a
/// dashboard fan-out bus. One drain task per engine stream; many run in
/// parallel, but each engine has exactly one consumer.
///
/// Grounded on an `mpsc` channel drain feeding a single aggregator,
/// generalized here from one engine's local aggregator to many engines
/// multiplexed into the shared registry, LabelStore, and StatusStore.
pub struct MetricPipeline {
    metrics: Arc<MetricsRegistry>,
    label_store: Arc<LabelStore>,
    status_store: Arc<LabelStore>,
    dashboard_tx: broadcast::Sender<DashboardEvent>,
}

impl MetricPipeline {
    /// `dashboard_capacity` bounds the fan-out channel; a slow dashboard
    /// consumer drops the oldest events rather than applying backpressure
    /// to the pipeline.
    pub fn new(
        metrics: Arc<MetricsRegistry>,
        label_store: Arc<LabelStore>,
        status_store: Arc<LabelStore>,
        dashboard_capacity: usize,
    ) -> Self {
        let (dashboard_tx, _) = broadcast::channel(dashboard_capacity);
        Self { metrics, label_store, status_store, dashboard_tx }
    }

    pub fn subscribe_dashboard(&self) -> broadcast::Receiver<DashboardEvent> {
        self.dashboard_tx.subscribe()
    }

    /// Drains `reading_engines`, spawning one drain task per received
    /// engine. Runs until the channel closes (process shutdown).
    pub async fn run(self: Arc<Self>, mut reading_engines: mpsc::Receiver<Arc<EngineClient>>) {
        while let Some(engine) = reading_engines.recv().await {
            let pipeline = self.clone();
            tokio::spawn(async move {
                pipeline.drain_engine(engine).await;
            });
        }
    }

    async fn drain_engine(&self, engine: Arc<EngineClient>) {
        let mut rx = match engine.read_metrics().await {
            Ok(rx) => rx,
            Err(err) => {
                tracing::error!(error = %err, engine = ?engine.id, "failed to open engine metric stream");
                return;
            }
        };
        while let Some(metric) = rx.recv().await {
            self.record(metric);
        }
    }

    fn record(&self, metric: SetagayaMetric) {
        self.metrics.record(&metric);
        self.label_store.insert(metric.run_id, metric.label.clone());
        self.status_store.insert(metric.run_id, metric.status.clone());
        let _ = self.dashboard_tx.send(DashboardEvent {
            collection_id: metric.collection_id,
            plan_id: metric.plan_id,
            raw_line: metric.raw_line,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EngineId;

    fn sample_metric(run_id: i64) -> SetagayaMetric {
        let collection_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        SetagayaMetric {
            threads: 5.0,
            latency_ms: 42.0,
            label: "GET /checkout".to_string(),
            status: "200".to_string(),
            raw_line: "raw".to_string(),
            collection_id,
            plan_id,
            engine_id: EngineId::new(collection_id, plan_id, 0),
            run_id,
        }
    }

    fn pipeline() -> MetricPipeline {
        MetricPipeline::new(
            Arc::new(MetricsRegistry::new().unwrap()),
            Arc::new(LabelStore::new()),
            Arc::new(LabelStore::new()),
            16,
        )
    }

    #[test]
    fn recording_a_metric_updates_registry_and_stores() {
        let pipeline = pipeline();
        let metric = sample_metric(7);
        pipeline.record(metric.clone());

        assert_eq!(pipeline.label_store.values(7), vec!["GET /checkout".to_string()]);
        assert_eq!(pipeline.status_store.values(7), vec!["200".to_string()]);

        let families = pipeline.metrics.gather();
        let status_family = families.iter().find(|f| f.get_name() == "status_counter").unwrap();
        assert_eq!(status_family.get_metric()[0].get_counter().get_value(), 1.0);
    }

    #[test]
    fn recording_publishes_a_dashboard_event_when_subscribed() {
        let pipeline = pipeline();
        let mut rx = pipeline.subscribe_dashboard();
        let metric = sample_metric(1);
        let collection_id = metric.collection_id;
        pipeline.record(metric);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.collection_id, collection_id);
    }

    #[test]
    fn recording_with_no_dashboard_subscriber_does_not_panic() {
        let pipeline = pipeline();
        pipeline.record(sample_metric(2));
    }
}
