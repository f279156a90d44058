use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::events::{DomainEvent, EventType};
use crate::ports::BoxFuture;
use crate::ports::counters::{CounterError, CounterStore};
use crate::rollup::Period;

pub fn events_total_key() -> String {
    "events:total".to_string()
}

pub fn events_by_type_key(event_type: EventType) -> String {
    format!("events:type:{}", event_type.as_str())
}

pub fn events_hour_key(occurred_at_ms: i64) -> String {
    format!("events:hour:{}", Period::Hourly.bucket_start_ms(occurred_at_ms))
}

pub fn active_users_key(scope_id: &str) -> String {
    format!("scope:{scope_id}:active_users")
}

pub fn popular_content_key(scope_id: &str) -> String {
    format!("scope:{scope_id}:popular_content")
}

/// Weight of an event when ranking content by raw engagement. Zero means
/// the event does not engage a piece of content.
pub fn engagement_weight(event_type: EventType) -> u64 {
    match event_type {
        EventType::ContentViewed => 1,
        EventType::LikeGiven => 2,
        EventType::CommentCreated | EventType::Save => 3,
        EventType::Share => 4,
        _ => 0,
    }
}

pub fn content_engagement_delta(event: &DomainEvent) -> Option<(&str, u64)> {
    let weight = engagement_weight(event.event_type);
    if weight == 0 {
        return None;
    }
    event.content_id.as_deref().map(|content_id| (content_id, weight))
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryCounterStore {
    counters: Arc<Mutex<HashMap<String, i64>>>,
    sets: Arc<Mutex<HashMap<String, BTreeMap<String, f64>>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, key: &str) -> i64 {
        self.counters
            .lock()
            .expect("counter store lock")
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn member_score(&self, set_key: &str, member: &str) -> Option<f64> {
        self.sets
            .lock()
            .expect("counter store lock")
            .get(set_key)
            .and_then(|set| set.get(member).copied())
    }
}

impl CounterStore for InMemoryCounterStore {
    fn increment(&self, key: &str) -> BoxFuture<'_, Result<i64, CounterError>> {
        let counters = self.counters.clone();
        let key = key.to_string();
        Box::pin(async move {
            let mut guard = counters.lock().expect("counter store lock");
            let value = guard.entry(key).or_insert(0);
            *value += 1;
            Ok(*value)
        })
    }

    fn increment_member(
        &self,
        set_key: &str,
        member: &str,
        delta: f64,
    ) -> BoxFuture<'_, Result<f64, CounterError>> {
        let sets = self.sets.clone();
        let set_key = set_key.to_string();
        let member = member.to_string();
        Box::pin(async move {
            let mut guard = sets.lock().expect("counter store lock");
            let score = guard.entry(set_key).or_default().entry(member).or_insert(0.0);
            *score += delta;
            Ok(*score)
        })
    }

    fn cardinality(&self, set_key: &str) -> BoxFuture<'_, Result<u64, CounterError>> {
        let sets = self.sets.clone();
        let set_key = set_key.to_string();
        Box::pin(async move {
            let guard = sets.lock().expect("counter store lock");
            Ok(guard.get(&set_key).map(|set| set.len() as u64).unwrap_or(0))
        })
    }

    fn range_by_score_desc(
        &self,
        set_key: &str,
        offset: usize,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<(String, f64)>, CounterError>> {
        let sets = self.sets.clone();
        let set_key = set_key.to_string();
        Box::pin(async move {
            let guard = sets.lock().expect("counter store lock");
            let Some(set) = guard.get(&set_key) else {
                return Ok(Vec::new());
            };
            let mut members: Vec<(String, f64)> =
                set.iter().map(|(member, score)| (member.clone(), *score)).collect();
            members.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            Ok(members.into_iter().skip(offset).take(count).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    #[tokio::test]
    async fn increments_are_cumulative() {
        let store = InMemoryCounterStore::new();
        store.increment("events:total").await.unwrap();
        let value = store.increment("events:total").await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(store.value("events:total"), 2);
    }

    #[tokio::test]
    async fn range_orders_by_score_then_member() {
        let store = InMemoryCounterStore::new();
        store.increment_member("popular", "b", 3.0).await.unwrap();
        store.increment_member("popular", "a", 3.0).await.unwrap();
        store.increment_member("popular", "c", 9.0).await.unwrap();
        let top = store.range_by_score_desc("popular", 0, 2).await.unwrap();
        assert_eq!(top, vec![("c".to_string(), 9.0), ("a".to_string(), 3.0)]);
    }

    #[test]
    fn non_engaging_events_have_zero_weight() {
        assert_eq!(engagement_weight(EventType::Login), 0);
        assert!(engagement_weight(EventType::Share) > engagement_weight(EventType::ContentViewed));
    }
}
