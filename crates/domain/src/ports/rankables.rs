use crate::DomainResult;
use crate::ranking::RankableEntity;

use super::BoxFuture;

/// Rankable content store; `top_by_hot_score` relies on the store's
/// secondary index on `hot_score` descending.
pub trait RankableRepository: Send + Sync {
    fn get(&self, entity_id: &str) -> BoxFuture<'_, DomainResult<Option<RankableEntity>>>;
    fn put(&self, entity: &RankableEntity) -> BoxFuture<'_, DomainResult<()>>;
    fn top_by_hot_score(
        &self,
        scope_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<RankableEntity>>>;
}
