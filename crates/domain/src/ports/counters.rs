use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter operation failed: {0}")]
    Operation(String),
}

/// Fast-path counters for live dashboards. Every mutation is an atomic
/// increment at the store, never read-modify-write.
pub trait CounterStore: Send + Sync {
    fn increment(&self, key: &str) -> BoxFuture<'_, Result<i64, CounterError>>;
    fn increment_member(
        &self,
        set_key: &str,
        member: &str,
        delta: f64,
    ) -> BoxFuture<'_, Result<f64, CounterError>>;
    fn cardinality(&self, set_key: &str) -> BoxFuture<'_, Result<u64, CounterError>>;
    fn range_by_score_desc(
        &self,
        set_key: &str,
        offset: usize,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<(String, f64)>, CounterError>>;
}
