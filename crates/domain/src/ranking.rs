use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::BoxFuture;
use crate::ports::rankables::RankableRepository;
use crate::util::now_ms;

pub const REPLY_WEIGHT: f64 = 0.5;
pub const DECAY_DIVISOR_SECONDS: f64 = 45_000.0;
/// Fresh entities are scored as if one hour old.
pub const INITIAL_AGE_SECONDS: i64 = 3_600;

/// Decaying popularity score: engagement magnitude on a log scale plus a
/// linear recency term. The additive age term means newer content with
/// equal engagement always outranks older content.
pub fn hot_score(like_count: u64, reply_count: u64, age_seconds: i64) -> f64 {
    let weighted = like_count as f64 + REPLY_WEIGHT * reply_count as f64;
    // max(|w|, 1) before log10 keeps zero and sub-unit magnitudes finite
    let order = weighted.abs().max(1.0).log10();
    let sign = if weighted > 0.0 {
        1.0
    } else if weighted < 0.0 {
        -1.0
    } else {
        0.0
    };
    sign * order + age_seconds.max(0) as f64 / DECAY_DIVISOR_SECONDS
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RankableKind {
    Post,
    Comment,
}

impl RankableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankableKind::Post => "post",
            RankableKind::Comment => "comment",
        }
    }
}

impl FromStr for RankableKind {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "post" => Ok(RankableKind::Post),
            "comment" => Ok(RankableKind::Comment),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngagementBlock {
    pub likes: BTreeSet<String>,
    pub replies: Vec<String>,
    pub shares: u64,
    pub saves: u64,
    pub views: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RankableEntity {
    pub entity_id: String,
    pub scope_id: String,
    pub kind: RankableKind,
    pub created_at_ms: i64,
    pub engagement: EngagementBlock,
    pub hot_score: f64,
}

impl RankableEntity {
    pub fn new(entity_id: &str, scope_id: &str, kind: RankableKind, created_at_ms: i64) -> Self {
        let mut entity = Self {
            entity_id: entity_id.to_string(),
            scope_id: scope_id.to_string(),
            kind,
            created_at_ms,
            engagement: EngagementBlock::default(),
            hot_score: 0.0,
        };
        entity.hot_score = hot_score(0, 0, INITIAL_AGE_SECONDS);
        entity
    }

    pub fn age_seconds(&self, now_ms: i64) -> i64 {
        (now_ms - self.created_at_ms).max(0) / 1_000
    }

    /// The recency term depends on wall-clock age, so the stored value is
    /// only ever a snapshot from the last mutation.
    pub fn recompute_hot_score(&mut self, now_ms: i64) -> f64 {
        self.hot_score = hot_score(
            self.engagement.likes.len() as u64,
            self.engagement.replies.len() as u64,
            self.age_seconds(now_ms),
        );
        self.hot_score
    }
}

#[derive(Clone)]
pub struct RankingService {
    rankables: Arc<dyn RankableRepository>,
}

impl RankingService {
    pub fn new(rankables: Arc<dyn RankableRepository>) -> Self {
        Self { rankables }
    }

    pub async fn register(
        &self,
        entity_id: &str,
        scope_id: &str,
        kind: RankableKind,
    ) -> DomainResult<RankableEntity> {
        let entity = RankableEntity::new(entity_id, scope_id, kind, now_ms());
        self.rankables.put(&entity).await?;
        Ok(entity)
    }

    pub async fn like(&self, entity_id: &str, user_id: &str) -> DomainResult<f64> {
        self.mutate(entity_id, |entity| {
            entity.engagement.likes.insert(user_id.to_string());
        })
        .await
    }

    pub async fn unlike(&self, entity_id: &str, user_id: &str) -> DomainResult<f64> {
        self.mutate(entity_id, |entity| {
            entity.engagement.likes.remove(user_id);
        })
        .await
    }

    pub async fn add_reply(&self, entity_id: &str, reply_id: &str) -> DomainResult<f64> {
        self.mutate(entity_id, |entity| {
            if !entity.engagement.replies.iter().any(|id| id == reply_id) {
                entity.engagement.replies.push(reply_id.to_string());
            }
        })
        .await
    }

    pub async fn top(&self, scope_id: &str, limit: usize) -> DomainResult<Vec<RankableEntity>> {
        self.rankables.top_by_hot_score(scope_id, limit).await
    }

    /// Apply an engagement mutation and recompute synchronously; racing
    /// writers resolve as last-write-wins on the stored score.
    async fn mutate<F>(&self, entity_id: &str, apply: F) -> DomainResult<f64>
    where
        F: FnOnce(&mut RankableEntity),
    {
        let mut entity = self
            .rankables
            .get(entity_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        apply(&mut entity);
        let score = entity.recompute_hot_score(now_ms());
        self.rankables.put(&entity).await?;
        Ok(score)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRankableRepository {
    inner: Arc<Mutex<HashMap<String, RankableEntity>>>,
}

impl InMemoryRankableRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RankableRepository for InMemoryRankableRepository {
    fn get(&self, entity_id: &str) -> BoxFuture<'_, DomainResult<Option<RankableEntity>>> {
        let inner = self.inner.clone();
        let entity_id = entity_id.to_string();
        Box::pin(async move {
            Ok(inner.lock().expect("rankable repo lock").get(&entity_id).cloned())
        })
    }

    fn put(&self, entity: &RankableEntity) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let entity = entity.clone();
        Box::pin(async move {
            inner
                .lock()
                .expect("rankable repo lock")
                .insert(entity.entity_id.clone(), entity);
            Ok(())
        })
    }

    fn top_by_hot_score(
        &self,
        scope_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<RankableEntity>>> {
        let inner = self.inner.clone();
        let scope_id = scope_id.to_string();
        Box::pin(async move {
            let guard = inner.lock().expect("rankable repo lock");
            let mut entities: Vec<RankableEntity> = guard
                .values()
                .filter(|entity| entity.scope_id == scope_id)
                .cloned()
                .collect();
            entities.sort_by(|a, b| {
                b.hot_score
                    .partial_cmp(&a.hot_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.entity_id.cmp(&b.entity_id))
            });
            entities.truncate(limit);
            Ok(entities)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn zero_engagement_scores_only_the_age_term() {
        let score = hot_score(0, 0, 45_000);
        assert!((score - 1.0).abs() < EPS);
    }

    #[test]
    fn replies_weigh_half_a_like() {
        let with_likes = hot_score(10, 0, 0);
        let with_replies = hot_score(0, 20, 0);
        assert!((with_likes - with_replies).abs() < EPS);
    }

    #[test]
    fn score_grows_strictly_with_age_for_fixed_engagement() {
        let earlier = hot_score(25, 4, 1_000);
        let later = hot_score(25, 4, 1_001);
        assert!(later > earlier);
    }

    #[test]
    fn fresh_entities_are_scored_one_hour_old() {
        let entity = RankableEntity::new("p1", "college-a", RankableKind::Post, 0);
        assert!((entity.hot_score - hot_score(0, 0, INITIAL_AGE_SECONDS)).abs() < EPS);
    }

    #[tokio::test]
    async fn like_and_unlike_move_the_score() {
        let repo = Arc::new(InMemoryRankableRepository::new());
        let service = RankingService::new(repo.clone());
        service.register("p1", "college-a", RankableKind::Post).await.unwrap();

        let mut liked = 0.0;
        for i in 0..20 {
            liked = service.like("p1", &format!("u{i}")).await.unwrap();
        }
        let unliked = service.unlike("p1", "u0").await.unwrap();
        assert!(unliked < liked);

        let stored = repo.get("p1").await.unwrap().unwrap();
        assert_eq!(stored.engagement.likes.len(), 19);
    }

    #[tokio::test]
    async fn duplicate_likes_and_replies_are_ignored() {
        let repo = Arc::new(InMemoryRankableRepository::new());
        let service = RankingService::new(repo.clone());
        service.register("p1", "college-a", RankableKind::Post).await.unwrap();
        service.like("p1", "u1").await.unwrap();
        service.like("p1", "u1").await.unwrap();
        service.add_reply("p1", "c1").await.unwrap();
        service.add_reply("p1", "c1").await.unwrap();

        let stored = repo.get("p1").await.unwrap().unwrap();
        assert_eq!(stored.engagement.likes.len(), 1);
        assert_eq!(stored.engagement.replies.len(), 1);
    }

    #[tokio::test]
    async fn missing_entity_is_not_found() {
        let service = RankingService::new(Arc::new(InMemoryRankableRepository::new()));
        let err = service.like("ghost", "u1").await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }

    #[tokio::test]
    async fn top_orders_by_score_descending() {
        let repo = Arc::new(InMemoryRankableRepository::new());
        let service = RankingService::new(repo.clone());
        let now = now_ms();
        for (id, likes) in [("p1", 2u64), ("p2", 50), ("p3", 10)] {
            let mut entity = RankableEntity::new(id, "college-a", RankableKind::Post, now);
            for i in 0..likes {
                entity.engagement.likes.insert(format!("u{i}"));
            }
            entity.recompute_hot_score(now);
            repo.put(&entity).await.unwrap();
        }
        let top = service.top("college-a", 2).await.unwrap();
        let ids: Vec<&str> = top.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p3"]);
    }
}
