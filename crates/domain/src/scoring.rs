use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::events::{DomainEvent, EventType};
use crate::ports::BoxFuture;
use crate::ports::users::UserRecordRepository;
use crate::rollup::Period;

/// Churn risk reported when a record has no history to compare against.
pub const NEUTRAL_CHURN_RISK: f64 = 50.0;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityCounters {
    pub sessions: u64,
    pub posts_created: u64,
    pub comments_created: u64,
    pub answers_provided: u64,
    pub likes_given: u64,
    pub likes_received: u64,
    pub comments_received: u64,
    pub shares: u64,
    pub saves: u64,
    pub content_views: u64,
    pub ai_interactions: u64,
    pub followers_gained: u64,
    pub follows_given: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UserScores {
    pub engagement: f64,
    pub contribution: f64,
    pub influence: f64,
    pub quality: f64,
    pub overall: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetentionState {
    pub streak: u32,
    pub retained: bool,
    pub churn_risk: f64,
    pub loyalty_score: f64,
}

impl Default for RetentionState {
    fn default() -> Self {
        Self {
            streak: 0,
            retained: false,
            churn_risk: NEUTRAL_CHURN_RISK,
            loyalty_score: 0.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserPeriodRecord {
    pub user_id: String,
    pub scope_id: String,
    pub period: Period,
    pub bucket_start_ms: i64,
    pub activity: ActivityCounters,
    /// Follower total carried forward at finalization: previous total plus
    /// followers gained this period.
    pub followers: u64,
    pub scores: UserScores,
    pub retention: RetentionState,
    pub finalized: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl UserPeriodRecord {
    pub fn new(
        user_id: &str,
        scope_id: &str,
        period: Period,
        bucket_start_ms: i64,
        now_ms: i64,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            scope_id: scope_id.to_string(),
            period,
            bucket_start_ms,
            activity: ActivityCounters::default(),
            followers: 0,
            scores: UserScores::default(),
            retention: RetentionState::default(),
            finalized: false,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Fold an event where this user is the acting identity.
    pub fn apply_actor_event(&mut self, event: &DomainEvent) {
        match event.event_type {
            EventType::Login => self.activity.sessions += 1,
            EventType::PostCreated => self.activity.posts_created += 1,
            EventType::CommentCreated => self.activity.comments_created += 1,
            EventType::AnswerProvided => self.activity.answers_provided += 1,
            EventType::LikeGiven => self.activity.likes_given += 1,
            EventType::Share => self.activity.shares += 1,
            EventType::Save => self.activity.saves += 1,
            EventType::ContentViewed => self.activity.content_views += 1,
            EventType::AiInteraction => self.activity.ai_interactions += 1,
            EventType::Follow => self.activity.follows_given += 1,
            EventType::Logout | EventType::LikeRemoved | EventType::ProfileUpdated => {}
        }
    }

    /// Fold an event where this user is on the receiving end.
    pub fn apply_target_event(&mut self, event: &DomainEvent) {
        match event.event_type {
            EventType::LikeGiven => self.activity.likes_received += 1,
            EventType::CommentCreated => self.activity.comments_received += 1,
            EventType::Follow => self.activity.followers_gained += 1,
            _ => {}
        }
    }
}

/// Derive the five behavioral scores from raw counters. Clamped to [0,100];
/// no rounding here, that belongs to the presentation boundary.
pub fn compute_scores(activity: &ActivityCounters, followers: u64) -> UserScores {
    let sessions = activity.sessions as f64;
    let posts = activity.posts_created as f64;
    let comments = activity.comments_created as f64;
    let answers = activity.answers_provided as f64;
    let likes_given = activity.likes_given as f64;
    let likes_received = activity.likes_received as f64;
    let comments_received = activity.comments_received as f64;
    let posts_divisor = activity.posts_created.max(1) as f64;

    let engagement = (sessions * 5.0 + posts * 10.0 + likes_given * 2.0).min(100.0);
    let contribution = (posts * 15.0 + comments * 5.0 + answers * 10.0).min(100.0);
    let influence = (followers as f64 * 0.3
        + (likes_received + comments_received) / posts_divisor * 0.7)
        .min(100.0);
    let quality = (likes_received / posts_divisor * 100.0).min(100.0);
    let overall = 0.25 * engagement + 0.30 * contribution + 0.25 * influence + 0.20 * quality;

    UserScores {
        engagement,
        contribution,
        influence,
        quality,
        overall,
    }
}

/// Pure finalization: this record's counters plus the immediately preceding
/// period's finalized record. Deterministic and idempotent.
pub fn finalize(
    record: &UserPeriodRecord,
    previous: Option<&UserPeriodRecord>,
) -> UserPeriodRecord {
    let mut out = record.clone();
    let followers = previous.map(|p| p.followers).unwrap_or(0) + record.activity.followers_gained;
    out.followers = followers;
    out.scores = compute_scores(&record.activity, followers);

    match previous {
        None => {
            out.retention.streak = 1;
            out.retention.retained = true;
            out.retention.churn_risk = NEUTRAL_CHURN_RISK;
        }
        Some(previous) => {
            let retained = record.activity.sessions > 0;
            out.retention.retained = retained;
            out.retention.streak = if retained {
                previous.retention.streak.saturating_add(1)
            } else {
                1
            };
            let drop = previous.activity.sessions as f64 - record.activity.sessions as f64;
            out.retention.churn_risk = (drop * 10.0).clamp(0.0, 100.0);
        }
    }
    out.retention.loyalty_score =
        (out.retention.streak as f64 * 5.0 + out.scores.overall * 0.5).min(100.0);
    out.finalized = true;
    out
}

#[derive(Clone, Default)]
pub struct InMemoryUserRecordRepository {
    inner: Arc<Mutex<HashMap<(String, Period, i64), UserPeriodRecord>>>,
}

impl InMemoryUserRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserRecordRepository for InMemoryUserRecordRepository {
    fn get(
        &self,
        user_id: &str,
        period: Period,
        bucket_start_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<UserPeriodRecord>>> {
        let inner = self.inner.clone();
        let key = (user_id.to_string(), period, bucket_start_ms);
        Box::pin(async move {
            Ok(inner.lock().expect("user repo lock").get(&key).cloned())
        })
    }

    fn upsert(&self, record: &UserPeriodRecord) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let record = record.clone();
        Box::pin(async move {
            let key = (record.user_id.clone(), record.period, record.bucket_start_ms);
            inner.lock().expect("user repo lock").insert(key, record);
            Ok(())
        })
    }

    fn top_by_overall(
        &self,
        scope_id: &str,
        period: Period,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<UserPeriodRecord>>> {
        let inner = self.inner.clone();
        let scope_id = scope_id.to_string();
        Box::pin(async move {
            let guard = inner.lock().expect("user repo lock");
            let mut records: Vec<UserPeriodRecord> = guard
                .values()
                .filter(|record| {
                    record.scope_id == scope_id
                        && record.period == period
                        && record.bucket_start_ms >= start_ms
                        && record.bucket_start_ms <= end_ms
                })
                .cloned()
                .collect();
            records.sort_by(|a, b| {
                b.scores
                    .overall
                    .partial_cmp(&a.scores.overall)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.user_id.cmp(&b.user_id))
            });
            records.truncate(limit);
            Ok(records)
        })
    }

    fn prune_before(
        &self,
        period: Period,
        cutoff_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().expect("user repo lock");
            let before = guard.len();
            guard.retain(|(_, key_period, bucket), _| {
                *key_period != period || *bucket >= cutoff_ms
            });
            Ok(before - guard.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::DAY_MS;

    fn record_with(sessions: u64, posts: u64, likes_given: u64) -> UserPeriodRecord {
        let mut record = UserPeriodRecord::new("u1", "college-a", Period::Daily, 0, 0);
        record.activity.sessions = sessions;
        record.activity.posts_created = posts;
        record.activity.likes_given = likes_given;
        record
    }

    #[test]
    fn concrete_scenario_scores_match() {
        // 3 logins, 2 posts, 5 likes given
        let record = record_with(3, 2, 5);
        let finalized = finalize(&record, None);
        assert_eq!(finalized.scores.engagement, 45.0);
        assert_eq!(finalized.scores.contribution, 30.0);
        assert_eq!(finalized.scores.influence, 0.0);
        assert_eq!(finalized.scores.quality, 0.0);
        assert_eq!(
            finalized.scores.overall,
            0.25 * 45.0 + 0.30 * 30.0
        );
    }

    #[test]
    fn scores_are_bounded_for_extreme_counters() {
        let mut record = record_with(10_000, 10_000, 10_000);
        record.activity.comments_created = 10_000;
        record.activity.answers_provided = 10_000;
        record.activity.likes_received = 1_000_000;
        record.activity.comments_received = 1_000_000;
        let finalized = finalize(&record, None);
        for score in [
            finalized.scores.engagement,
            finalized.scores.contribution,
            finalized.scores.influence,
            finalized.scores.quality,
            finalized.scores.overall,
        ] {
            assert!((0.0..=100.0).contains(&score), "score {score} out of bounds");
        }
    }

    #[test]
    fn streak_grows_then_resets_after_an_idle_day() {
        let mut previous: Option<UserPeriodRecord> = None;
        let mut streaks = Vec::new();
        for day in 0..6 {
            let mut record = record_with(if day < 5 { 1 } else { 0 }, 0, 0);
            record.bucket_start_ms = day * DAY_MS;
            let finalized = finalize(&record, previous.as_ref());
            streaks.push(finalized.retention.streak);
            previous = Some(finalized);
        }
        assert_eq!(streaks, vec![1, 2, 3, 4, 5, 1]);
    }

    #[test]
    fn churn_risk_tracks_session_drop() {
        let previous = finalize(&record_with(8, 0, 0), None);
        let current = finalize(&record_with(2, 0, 0), Some(&previous));
        assert_eq!(current.retention.churn_risk, 60.0);

        let growing = finalize(&record_with(12, 0, 0), Some(&previous));
        assert_eq!(growing.retention.churn_risk, 0.0);

        let collapsed = finalize(&record_with(0, 0, 0), Some(&finalize(&record_with(50, 0, 0), None)));
        assert_eq!(collapsed.retention.churn_risk, 100.0);
    }

    #[test]
    fn first_record_has_neutral_churn() {
        let finalized = finalize(&record_with(1, 0, 0), None);
        assert_eq!(finalized.retention.churn_risk, NEUTRAL_CHURN_RISK);
        assert!(finalized.retention.retained);
    }

    #[test]
    fn finalize_is_idempotent() {
        let previous = finalize(&record_with(4, 1, 2), None);
        let record = record_with(2, 3, 1);
        let once = finalize(&record, Some(&previous));
        let twice = finalize(&once, Some(&previous));
        assert_eq!(once, twice);
    }

    #[test]
    fn followers_accumulate_across_periods() {
        let mut first = record_with(1, 0, 0);
        first.activity.followers_gained = 3;
        let first = finalize(&first, None);
        assert_eq!(first.followers, 3);

        let mut second = record_with(1, 0, 0);
        second.activity.followers_gained = 2;
        let second = finalize(&second, Some(&first));
        assert_eq!(second.followers, 5);
    }
}
