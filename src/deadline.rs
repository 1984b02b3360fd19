//! Absolute per-query deadlines

use std::time::{Duration, Instant};

/// Point in time by which a query must complete.
///
/// Stages derive their own budgets from it with [`Deadline::budget`], so a
/// stage timeout never outlives the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    pub fn after(duration: Duration) -> Self {
        Self::at(Instant::now() + duration)
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Time left, zero once expired
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Stage budget: the smaller of `limit` and the time left
    pub fn budget(&self, limit: Duration) -> Duration {
        limit.min(self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_capped_by_remaining() {
        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(deadline.budget(Duration::from_secs(10)) <= Duration::from_millis(50));
        assert_eq!(deadline.budget(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_expired_deadline() {
        let deadline = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
