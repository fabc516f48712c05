use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::EngineKind;

/// Ownership container: holds plans and the data files they reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
}

/// A named test specification. Exactly one test-plan file, zero or more
/// data files (CSV among them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub test_file: Option<String>,
    pub data_files: Vec<String>,
}

impl Plan {
    pub fn has_test_file(&self) -> bool {
        self.test_file.is_some()
    }
}

/// A `(plan, engine-count, concurrency, duration, ramp-up)` tuple bound to a
/// collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub plan_id: Uuid,
    pub engines: u32,
    pub concurrency: u32,
    pub duration_seconds: u64,
    pub rampup_seconds: u64,
    #[serde(default)]
    pub kind: EngineKind,
}

/// A group of execution plans. At most one active run at any time; all
/// member plans must have a test file before trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub execution_plans: Vec<Uuid>,
    pub csv_split: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(test_file: Option<&str>) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "checkout".to_string(),
            test_file: test_file.map(str::to_string),
            data_files: vec![],
        }
    }

    #[test]
    fn plan_without_test_file_reports_missing() {
        assert!(!plan(None).has_test_file());
    }

    #[test]
    fn plan_with_test_file_reports_present() {
        assert!(plan(Some("checkout.jmx")).has_test_file());
    }

    #[test]
    fn collection_roundtrips_through_json() {
        let c = Collection {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "load-test".to_string(),
            execution_plans: vec![Uuid::new_v4()],
            csv_split: true,
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: Collection = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "load-test");
        assert!(back.csv_split);
    }
}
