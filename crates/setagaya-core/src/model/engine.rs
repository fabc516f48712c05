use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one worker engine: `(collection_id, plan_id, engine_index)`
/// with `engine_index ∈ [0, engines_required)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineId {
    pub collection_id: Uuid,
    pub plan_id: Uuid,
    pub engine_index: u32,
}

impl EngineId {
    pub fn new(collection_id: Uuid, plan_id: Uuid, engine_index: u32) -> Self {
        Self { collection_id, plan_id, engine_index }
    }
}

/// Engine lifecycle as an explicit state machine. The Plan Controller drives
/// transitions; `cancel handle`/`stream handle` on the owning `EngineClient`
/// must be populated only once the state reaches `Subscribed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineLifecycle {
    Created,
    Deployed,
    Triggered,
    Subscribed,
    Terminated,
}

impl EngineLifecycle {
    /// Valid forward transitions; out-of-order transitions are a bug in the
    /// caller, not something this type tries to paper over.
    pub fn can_transition_to(self, next: EngineLifecycle) -> bool {
        use EngineLifecycle::*;
        matches!(
            (self, next),
            (Created, Deployed)
                | (Deployed, Triggered)
                | (Triggered, Subscribed)
                | (Subscribed, Terminated)
                // a triggered engine may be torn down directly (force purge)
                // without ever completing subscription.
                | (Triggered, Terminated)
                | (Deployed, Terminated)
                | (Created, Terminated)
        )
    }
}

impl std::fmt::Display for EngineLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineLifecycle::Created => "created",
            EngineLifecycle::Deployed => "deployed",
            EngineLifecycle::Triggered => "triggered",
            EngineLifecycle::Subscribed => "subscribed",
            EngineLifecycle::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Engine driver abstraction: a sum type of engine kinds rather than
/// runtime type switching. JMeter is the only variant today; adding a
/// second kind is additive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Jmeter,
}

impl EngineKind {
    /// The container image the Plan Controller deploys for this engine
    /// kind. Not runtime type-switched: a second kind just adds a match
    /// arm here.
    pub fn container_image(self) -> &'static str {
        match self {
            EngineKind::Jmeter => "setagaya/jmeter-engine:latest",
        }
    }
}

impl Default for EngineKind {
    fn default() -> Self {
        EngineKind::Jmeter
    }
}

/// One data-file reference inside an `EngineDataConfig`, tagged with CSV
/// split coordinates when sharding is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "Filepath")]
    pub filepath: String,
    #[serde(rename = "TotalSplits")]
    pub total_splits: u32,
    #[serde(rename = "CurrentSplit")]
    pub current_split: u32,
}

/// Wire format posted to `POST /start` on the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDataConfig {
    #[serde(rename = "EngineData")]
    pub engine_data: std::collections::HashMap<String, FileRef>,
    #[serde(rename = "Concurrency")]
    pub concurrency: String,
    #[serde(rename = "Duration")]
    pub duration: String,
    #[serde(rename = "Rampup")]
    pub rampup: String,
    #[serde(rename = "RunID")]
    pub run_id: i64,
    #[serde(rename = "EngineID")]
    pub engine_id: u32,
}

/// CSV sharding contract: row `k` belongs to exactly one plan's shard.
/// `total_splits > rows` is special-cased so plan 0 gets everything and the
/// rest get nothing, rather than every plan computing an empty half-open
/// range that still overlaps at the boundary.
pub fn csv_shard_range(rows: usize, total_splits: u32, current_split: u32) -> (usize, usize) {
    if total_splits as usize > rows {
        return if current_split == 0 { (0, rows) } else { (0, 0) };
    }
    let per_split = rows / total_splits as usize;
    let start = per_split * current_split as usize;
    let end = rows.min(start + per_split);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jmeter_is_the_default_engine_kind() {
        assert_eq!(EngineKind::default(), EngineKind::Jmeter);
        assert_eq!(EngineKind::Jmeter.container_image(), "setagaya/jmeter-engine:latest");
    }

    #[test]
    fn lifecycle_happy_path_transitions_are_allowed() {
        use EngineLifecycle::*;
        assert!(Created.can_transition_to(Deployed));
        assert!(Deployed.can_transition_to(Triggered));
        assert!(Triggered.can_transition_to(Subscribed));
        assert!(Subscribed.can_transition_to(Terminated));
    }

    #[test]
    fn lifecycle_rejects_skipping_states() {
        use EngineLifecycle::*;
        assert!(!Created.can_transition_to(Subscribed));
        assert!(!Created.can_transition_to(Triggered));
    }

    #[test]
    fn lifecycle_allows_early_termination() {
        use EngineLifecycle::*;
        assert!(Created.can_transition_to(Terminated));
        assert!(Triggered.can_transition_to(Terminated));
    }

    #[test]
    fn engine_data_config_roundtrips_with_pascal_case_wire_names() {
        let mut engine_data = std::collections::HashMap::new();
        engine_data.insert(
            "data.csv".to_string(),
            FileRef {
                filename: "data.csv".to_string(),
                filepath: "/tmp/data.csv".to_string(),
                total_splits: 3,
                current_split: 1,
            },
        );
        let config = EngineDataConfig {
            engine_data,
            concurrency: "10".to_string(),
            duration: "60".to_string(),
            rampup: "5".to_string(),
            run_id: 42,
            engine_id: 0,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"RunID\":42"));
        assert!(json.contains("\"TotalSplits\":3"));
        let back: EngineDataConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, 42);
    }

    // 3 plans, 10 rows: shards must be disjoint and cover every row.
    #[test]
    fn three_plans_shard_ten_rows_disjointly() {
        assert_eq!(csv_shard_range(10, 3, 0), (0, 3));
        assert_eq!(csv_shard_range(10, 3, 1), (3, 6));
        assert_eq!(csv_shard_range(10, 3, 2), (6, 9));
    }

    #[test]
    fn csv_split_more_splits_than_rows_gives_everything_to_plan_zero() {
        assert_eq!(csv_shard_range(2, 5, 0), (0, 2));
        assert_eq!(csv_shard_range(2, 5, 1), (0, 0));
        assert_eq!(csv_shard_range(2, 5, 4), (0, 0));
    }

    #[test]
    fn csv_split_exact_division_covers_every_row_exactly_once() {
        let rows = 12;
        let total_splits = 4;
        let mut covered = vec![false; rows];
        for split in 0..total_splits {
            let (start, end) = csv_shard_range(rows, total_splits, split);
            for row in covered.iter_mut().take(end).skip(start) {
                assert!(!*row, "row covered by more than one shard");
                *row = true;
            }
        }
        assert!(covered.into_iter().all(|c| c));
    }
}
