use crate::DomainResult;
use crate::rollup::Period;
use crate::scoring::UserPeriodRecord;

use super::BoxFuture;

/// Per-user periodic aggregates. `upsert` is an atomic write under the
/// `(user, period, bucket)` key; `top_by_overall` relies on the store's
/// secondary index on `overall_score` descending.
pub trait UserRecordRepository: Send + Sync {
    fn get(
        &self,
        user_id: &str,
        period: Period,
        bucket_start_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<UserPeriodRecord>>>;
    fn upsert(&self, record: &UserPeriodRecord) -> BoxFuture<'_, DomainResult<()>>;
    fn top_by_overall(
        &self,
        scope_id: &str,
        period: Period,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<UserPeriodRecord>>>;
    fn prune_before(
        &self,
        period: Period,
        cutoff_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>>;
}
