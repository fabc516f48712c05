use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Created on trigger, closed on natural completion or forced termination.
/// `end_time` absent implies the run is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: i64,
    pub collection_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(run_id: i64, collection_id: Uuid, start_time: DateTime<Utc>) -> Self {
        Self {
            run_id,
            collection_id,
            start_time,
            end_time: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn finish(&mut self, end_time: DateTime<Utc>) {
        self.end_time = Some(end_time);
    }
}

/// A `(collection_id, plan_id)` record written at trigger, deleted when the
/// plan completes. The sweeper iterates these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunningPlan {
    pub collection_id: Uuid,
    pub plan_id: Uuid,
    pub run_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_is_active() {
        let run = Run::new(1, Uuid::new_v4(), Utc::now());
        assert!(run.is_active());
    }

    #[test]
    fn finished_run_is_inactive() {
        let mut run = Run::new(1, Uuid::new_v4(), Utc::now());
        run.finish(Utc::now());
        assert!(!run.is_active());
        assert!(run.end_time.is_some());
    }

    #[test]
    fn running_plan_equality_is_by_value() {
        let collection_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let a = RunningPlan { collection_id, plan_id, run_id: 1 };
        let b = RunningPlan { collection_id, plan_id, run_id: 1 };
        assert_eq!(a, b);
    }
}
