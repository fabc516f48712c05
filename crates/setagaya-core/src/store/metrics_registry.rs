use prometheus::{CounterVec, GaugeVec, HistogramVec, Opts, Registry};

use crate::error::ControllerError;
use crate::model::SetagayaMetric;

/// Wraps a `prometheus::Registry` with the request-metric and engine-health
/// series and the deletion operations the metric GC needs. Grounded on the
/// `State { registry: prometheus::Registry }` shape used for pull-scraped
/// operator metrics elsewhere in the ecosystem.
///
/// `*_latency_summary` are implemented as `HistogramVec`: the upstream
/// system's summaries are quantile estimators, and the Rust `prometheus`
/// crate's closest equivalent with cheap, lock-free observation is a
/// histogram with default buckets.
pub struct MetricsRegistry {
    registry: Registry,
    pub status_counter: CounterVec,
    pub collection_latency_summary: HistogramVec,
    pub plan_latency_summary: HistogramVec,
    pub label_latency_summary: HistogramVec,
    pub threads_gauge: GaugeVec,
    pub cpu_gauge: GaugeVec,
    pub mem_gauge: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let status_counter = CounterVec::new(
            Opts::new("status_counter", "request count by outcome"),
            &["collection", "plan", "run", "engine", "label", "status"],
        )
        .map_err(|e| ControllerError::Internal(e.to_string()))?;

        let collection_latency_summary = HistogramVec::new(
            prometheus::HistogramOpts::new("collection_latency_summary", "latency by collection"),
            &["collection", "run"],
        )
        .map_err(|e| ControllerError::Internal(e.to_string()))?;

        let plan_latency_summary = HistogramVec::new(
            prometheus::HistogramOpts::new("plan_latency_summary", "latency by plan"),
            &["collection", "plan", "run"],
        )
        .map_err(|e| ControllerError::Internal(e.to_string()))?;

        let label_latency_summary = HistogramVec::new(
            prometheus::HistogramOpts::new("label_latency_summary", "latency by request label"),
            &["collection", "label", "run"],
        )
        .map_err(|e| ControllerError::Internal(e.to_string()))?;

        let threads_gauge = GaugeVec::new(
            Opts::new("threads_gauge", "active virtual users reported by an engine"),
            &["collection", "plan", "run", "engine"],
        )
        .map_err(|e| ControllerError::Internal(e.to_string()))?;

        let cpu_gauge = GaugeVec::new(
            Opts::new("cpu_gauge", "engine pod CPU usage in millicores"),
            &["collection", "plan", "engine"],
        )
        .map_err(|e| ControllerError::Internal(e.to_string()))?;

        let mem_gauge = GaugeVec::new(
            Opts::new("mem_gauge", "engine pod memory usage in bytes"),
            &["collection", "plan", "engine"],
        )
        .map_err(|e| ControllerError::Internal(e.to_string()))?;

        registry
            .register(Box::new(status_counter.clone()))
            .map_err(|e| ControllerError::Internal(e.to_string()))?;
        registry
            .register(Box::new(collection_latency_summary.clone()))
            .map_err(|e| ControllerError::Internal(e.to_string()))?;
        registry
            .register(Box::new(plan_latency_summary.clone()))
            .map_err(|e| ControllerError::Internal(e.to_string()))?;
        registry
            .register(Box::new(label_latency_summary.clone()))
            .map_err(|e| ControllerError::Internal(e.to_string()))?;
        registry
            .register(Box::new(threads_gauge.clone()))
            .map_err(|e| ControllerError::Internal(e.to_string()))?;
        registry
            .register(Box::new(cpu_gauge.clone()))
            .map_err(|e| ControllerError::Internal(e.to_string()))?;
        registry
            .register(Box::new(mem_gauge.clone()))
            .map_err(|e| ControllerError::Internal(e.to_string()))?;

        Ok(Self {
            registry,
            status_counter,
            collection_latency_summary,
            plan_latency_summary,
            label_latency_summary,
            threads_gauge,
            cpu_gauge,
            mem_gauge,
        })
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Records one parsed metric against the registry. LabelStore/
    /// StatusStore bookkeeping and the dashboard publish are the caller's
    /// responsibility — they don't touch the registry.
    pub fn record(&self, metric: &SetagayaMetric) {
        let collection = metric.collection_id.to_string();
        let plan = metric.plan_id.to_string();
        let run = metric.run_id.to_string();
        let engine = metric.engine_id.engine_index.to_string();

        self.status_counter
            .with_label_values(&[&collection, &plan, &run, &engine, &metric.label, &metric.status])
            .inc();
        self.collection_latency_summary
            .with_label_values(&[&collection, &run])
            .observe(metric.latency_ms);
        self.plan_latency_summary
            .with_label_values(&[&collection, &plan, &run])
            .observe(metric.latency_ms);
        self.label_latency_summary
            .with_label_values(&[&collection, &metric.label, &run])
            .observe(metric.latency_ms);
        self.threads_gauge
            .with_label_values(&[&collection, &plan, &run, &engine])
            .set(metric.threads);
    }

    /// Deletes every time-series labeled with `run_id`, reconstructing the
    /// exact label combinations from the engines/labels/statuses the
    /// caller enumerated via LabelStore/StatusStore.
    pub fn delete_run(
        &self,
        collection_id: &str,
        plan_id: &str,
        run_id: &str,
        engines: &[String],
        labels: &[String],
        statuses: &[String],
    ) {
        for engine in engines {
            let _ = self
                .threads_gauge
                .remove_label_values(&[collection_id, plan_id, run_id, engine]);
        }
        let _ = self
            .plan_latency_summary
            .remove_label_values(&[collection_id, plan_id, run_id]);
        let _ = self
            .collection_latency_summary
            .remove_label_values(&[collection_id, run_id]);
        for label in labels {
            let _ = self
                .label_latency_summary
                .remove_label_values(&[collection_id, label, run_id]);
        }
        for label in labels {
            for status in statuses {
                for engine in engines {
                    let _ = self.status_counter.remove_label_values(&[
                        collection_id,
                        plan_id,
                        run_id,
                        engine,
                        label,
                        status,
                    ]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EngineId;
    use uuid::Uuid;

    fn sample_metric(collection_id: uuid::Uuid, plan_id: uuid::Uuid, run_id: i64) -> SetagayaMetric {
        SetagayaMetric {
            threads: 10.0,
            latency_ms: 123.0,
            label: "GET /checkout".to_string(),
            status: "200".to_string(),
            raw_line: "raw".to_string(),
            collection_id,
            plan_id,
            engine_id: EngineId::new(collection_id, plan_id, 0),
            run_id,
        }
    }

    #[test]
    fn record_increments_status_counter() {
        let registry = MetricsRegistry::new().unwrap();
        let collection_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let metric = sample_metric(collection_id, plan_id, 1);
        registry.record(&metric);
        let families = registry.gather();
        let status_family = families.iter().find(|f| f.get_name() == "status_counter").unwrap();
        assert_eq!(status_family.get_metric()[0].get_counter().get_value(), 1.0);
    }

    #[test]
    fn delete_run_removes_registered_series() {
        let registry = MetricsRegistry::new().unwrap();
        let collection_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let metric = sample_metric(collection_id, plan_id, 42);
        registry.record(&metric);

        registry.delete_run(
            &collection_id.to_string(),
            &plan_id.to_string(),
            "42",
            &["0".to_string()],
            &["GET /checkout".to_string()],
            &["200".to_string()],
        );

        let families = registry.gather();
        let status_family = families.iter().find(|f| f.get_name() == "status_counter").unwrap();
        assert!(status_family.get_metric().is_empty());
    }
}
