use crate::DomainResult;
use crate::rollup::{Period, ScopePeriodRollup};

use super::BoxFuture;

/// Durable store of `(scope, period, bucket)` aggregates. At most one record
/// may exist per key tuple; `create` must fail with `DomainError::Conflict`
/// when the bucket already exists so callers can retry as an update.
pub trait RollupRepository: Send + Sync {
    fn get(
        &self,
        scope_id: &str,
        period: Period,
        bucket_start_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<ScopePeriodRollup>>>;
    fn create(&self, rollup: &ScopePeriodRollup) -> BoxFuture<'_, DomainResult<()>>;
    fn update(&self, rollup: &ScopePeriodRollup) -> BoxFuture<'_, DomainResult<()>>;
    fn list_range(
        &self,
        scope_id: &str,
        period: Period,
        start_ms: i64,
        end_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Vec<ScopePeriodRollup>>>;
    fn prune_before(
        &self,
        period: Period,
        cutoff_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>>;
}
