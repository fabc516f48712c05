use uuid::Uuid;

use crate::model::engine::EngineId;

/// One parsed JTL line, attributed with the identity of the engine and run
/// it came from. Units: latency milliseconds, threads a floating-point
/// count (the agent reports a running average, not an integer).
#[derive(Debug, Clone, PartialEq)]
pub struct SetagayaMetric {
    pub threads: f64,
    pub latency_ms: f64,
    pub label: String,
    pub status: String,
    pub raw_line: String,
    pub collection_id: Uuid,
    pub plan_id: Uuid,
    pub engine_id: EngineId,
    pub run_id: i64,
}

/// Parses one `|`-separated JTL stream line: at least 12 fields,
/// `[2]=label, [3]=status, [9]=threads, [10]=latency`.
///
/// Returns `None` if the line has fewer than 12 fields (dropped with a
/// warning by the caller) or if the latency field doesn't parse. A
/// malformed threads field defaults to `0.0` rather than dropping the line.
pub fn parse_jtl_line(
    line: &str,
    collection_id: Uuid,
    plan_id: Uuid,
    engine_id: EngineId,
    run_id: i64,
) -> Option<SetagayaMetric> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 12 {
        return None;
    }
    let label = fields[2].to_string();
    let status = fields[3].to_string();
    let threads = fields[9].trim().parse::<f64>().unwrap_or(0.0);
    let latency_ms = fields[10].trim().parse::<f64>().ok()?;

    Some(SetagayaMetric {
        threads,
        latency_ms,
        label,
        status,
        raw_line: line.to_string(),
        collection_id,
        plan_id,
        engine_id,
        run_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_id() -> EngineId {
        EngineId {
            collection_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            engine_index: 0,
        }
    }

    fn line_with(fields: &[&str]) -> String {
        fields.join("|")
    }

    #[test]
    fn parses_well_formed_line() {
        let fields = vec!["a", "b", "GET /checkout", "200", "e", "f", "g", "h", "i", "12", "345.6", "l"];
        let line = line_with(&fields);
        let collection_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let run_id = 1;
        let eid = engine_id();
        let metric = parse_jtl_line(&line, collection_id, plan_id, eid.clone(), run_id).unwrap();
        assert_eq!(metric.label, "GET /checkout");
        assert_eq!(metric.status, "200");
        assert_eq!(metric.threads, 12.0);
        assert_eq!(metric.latency_ms, 345.6);
        assert_eq!(metric.run_id, run_id);
    }

    #[test]
    fn drops_line_with_fewer_than_twelve_fields() {
        let line = line_with(&["a", "b", "c"]);
        assert!(parse_jtl_line(&line, Uuid::new_v4(), Uuid::new_v4(), engine_id(), 1).is_none());
    }

    #[test]
    fn malformed_threads_defaults_to_zero() {
        let fields = vec!["a", "b", "label", "200", "e", "f", "g", "h", "i", "NaN-ish", "10.0", "l"];
        let line = line_with(&fields);
        let metric = parse_jtl_line(&line, Uuid::new_v4(), Uuid::new_v4(), engine_id(), 1).unwrap();
        assert_eq!(metric.threads, 0.0);
    }

    #[test]
    fn malformed_latency_drops_the_line() {
        let fields = vec!["a", "b", "label", "200", "e", "f", "g", "h", "i", "5", "not-a-number", "l"];
        let line = line_with(&fields);
        assert!(parse_jtl_line(&line, Uuid::new_v4(), Uuid::new_v4(), engine_id(), 1).is_none());
    }
}
