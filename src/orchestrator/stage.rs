//! Query lifecycle stages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Received → Retrieving → Reranking → Citing → Generating → Completed,
/// with Failed reachable from any non-terminal stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Received,
    Retrieving,
    Reranking,
    Citing,
    Generating,
    Completed,
    Failed,
}

impl QueryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStage::Received => "received",
            QueryStage::Retrieving => "retrieving",
            QueryStage::Reranking => "reranking",
            QueryStage::Citing => "citing",
            QueryStage::Generating => "generating",
            QueryStage::Completed => "completed",
            QueryStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryStage::Completed | QueryStage::Failed)
    }

    fn next(&self) -> Option<QueryStage> {
        match self {
            QueryStage::Received => Some(QueryStage::Retrieving),
            QueryStage::Retrieving => Some(QueryStage::Reranking),
            QueryStage::Reranking => Some(QueryStage::Citing),
            QueryStage::Citing => Some(QueryStage::Generating),
            QueryStage::Generating => Some(QueryStage::Completed),
            QueryStage::Completed | QueryStage::Failed => None,
        }
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: QueryStage,
    pub to: QueryStage,
    /// Time since the query was received
    pub elapsed_ms: u64,
}

/// Drives one query through its stages, recording every transition
#[derive(Debug)]
pub(crate) struct StageTracker {
    query_id: Uuid,
    started: Instant,
    current: QueryStage,
    transitions: Vec<StageTransition>,
}

impl StageTracker {
    pub(crate) fn new(query_id: Uuid) -> Self {
        Self {
            query_id,
            started: Instant::now(),
            current: QueryStage::Received,
            transitions: Vec::new(),
        }
    }

    pub(crate) fn current(&self) -> QueryStage {
        self.current
    }

    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    /// Move to the next stage in the pipeline
    pub(crate) fn advance(&mut self) {
        if let Some(next) = self.current.next() {
            self.record(next);
        }
    }

    /// Fail from the current stage; returns the stage that failed
    pub(crate) fn fail(&mut self) -> QueryStage {
        let failed_in = self.current;
        if !failed_in.is_terminal() {
            self.record(QueryStage::Failed);
        }
        failed_in
    }

    pub(crate) fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }

    fn record(&mut self, to: QueryStage) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        info!(
            target: "grounded::query",
            query_id = %self.query_id,
            from = %self.current,
            to = %to,
            elapsed_ms,
            "Query stage transition"
        );
        self.transitions.push(StageTransition {
            from: self.current,
            to,
            elapsed_ms,
        });
        self.current = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut tracker = StageTracker::new(Uuid::new_v4());
        for _ in 0..5 {
            tracker.advance();
        }
        assert_eq!(tracker.current(), QueryStage::Completed);

        // Terminal stages do not move
        tracker.advance();
        assert_eq!(tracker.fail(), QueryStage::Completed);

        let stages: Vec<QueryStage> = tracker.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            stages,
            vec![
                QueryStage::Retrieving,
                QueryStage::Reranking,
                QueryStage::Citing,
                QueryStage::Generating,
                QueryStage::Completed,
            ]
        );
    }

    #[test]
    fn test_failure_records_origin() {
        let mut tracker = StageTracker::new(Uuid::new_v4());
        tracker.advance();
        assert_eq!(tracker.fail(), QueryStage::Retrieving);

        let last = tracker.transitions().last().unwrap();
        assert_eq!(last.from, QueryStage::Retrieving);
        assert_eq!(last.to, QueryStage::Failed);
    }
}
