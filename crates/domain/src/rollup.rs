use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime};

use crate::DomainResult;
use crate::counters::content_engagement_delta;
use crate::error::DomainError;
use crate::event_log::cmp_entry_ids;
use crate::events::{DomainEvent, EventType, METADATA_DEPARTMENT, METADATA_FEATURE};
use crate::ports::BoxFuture;
use crate::ports::rollups::RollupRepository;

pub const HOUR_MS: i64 = 3_600_000;
pub const DAY_MS: i64 = 86_400_000;

/// Relative swing against the previous bucket that flags an anomaly.
pub const ANOMALY_SWING_THRESHOLD: f64 = 0.5;
const TRENDING_LIMIT: usize = 5;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Realtime,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Period {
    /// Granularities maintained by the batch aggregator. Realtime views are
    /// served by the counter store, not by rollup records.
    pub const AGGREGATED: [Period; 5] = [
        Period::Hourly,
        Period::Daily,
        Period::Weekly,
        Period::Monthly,
        Period::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Realtime => "realtime",
            Period::Hourly => "hourly",
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::Yearly => "yearly",
        }
    }

    pub fn bucket_start_ms(&self, ts_ms: i64) -> i64 {
        let ts = ts_ms.max(0);
        match self {
            Period::Realtime | Period::Hourly => ts - ts.rem_euclid(HOUR_MS),
            Period::Daily => ts - ts.rem_euclid(DAY_MS),
            Period::Weekly => {
                // epoch day zero was a Thursday
                let days = ts.div_euclid(DAY_MS);
                let from_monday = (days + 3).rem_euclid(7);
                (days - from_monday) * DAY_MS
            }
            Period::Monthly | Period::Yearly => calendar_bucket_start(*self, ts),
        }
    }

    pub fn prev_bucket_start_ms(&self, bucket_start_ms: i64) -> i64 {
        self.bucket_start_ms(bucket_start_ms.saturating_sub(1))
    }
}

impl FromStr for Period {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "realtime" => Ok(Period::Realtime),
            "hourly" => Ok(Period::Hourly),
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            "yearly" => Ok(Period::Yearly),
            _ => Err(()),
        }
    }
}

fn calendar_bucket_start(period: Period, ts_ms: i64) -> i64 {
    let day_floor = ts_ms - ts_ms.rem_euclid(DAY_MS);
    let Ok(dt) = OffsetDateTime::from_unix_timestamp_nanos(ts_ms as i128 * 1_000_000) else {
        return day_floor;
    };
    let date = dt.date();
    let start = match period {
        Period::Yearly => Date::from_calendar_date(date.year(), Month::January, 1),
        _ => date.replace_day(1),
    };
    match start {
        Ok(day) => day.midnight().assume_utc().unix_timestamp() * 1_000,
        Err(_) => day_floor,
    }
}

/// Per-category breakdown with an explicit, extensible key set. Kept as a
/// plain map so folds stay commutative.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CategoryCounts(BTreeMap<String, u64>);

impl CategoryCounts {
    pub fn add(&mut self, category: &str, delta: u64) {
        *self.0.entry(category.to_string()).or_default() += delta;
    }

    pub fn get(&self, category: &str) -> u64 {
        self.0.get(category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(key, value)| (key.as_str(), *value))
    }

    pub fn top(&self, limit: usize) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> =
            self.0.iter().map(|(key, value)| (key.clone(), *value)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(limit);
        entries
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UserCounters {
    pub logins: u64,
    pub logouts: u64,
    pub profile_updates: u64,
    pub active_user_ids: BTreeSet<String>,
}

impl UserCounters {
    pub fn active_users(&self) -> u64 {
        self.active_user_ids.len() as u64
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ContentCounters {
    pub posts_created: u64,
    pub comments_created: u64,
    pub views: u64,
    pub by_type: CategoryCounts,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngagementCounters {
    pub likes_given: u64,
    pub likes_removed: u64,
    pub shares: u64,
    pub saves: u64,
    pub follows: u64,
    pub by_content: CategoryCounts,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AiCounters {
    pub interactions: u64,
    pub by_feature: CategoryCounts,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AcademicCounters {
    pub answers_provided: u64,
    pub by_department: CategoryCounts,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceCounters {
    pub events_total: u64,
    pub by_hour_of_day: CategoryCounts,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrendingItem {
    pub content_id: String,
    pub engagement: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    pub metric: String,
    pub previous: f64,
    pub current: f64,
    pub change_ratio: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub metric: String,
    pub next_value: f64,
}

/// Derived from the counters of this bucket (and its predecessor), never a
/// source of truth on its own.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RollupInsights {
    pub trending: Vec<TrendingItem>,
    pub anomalies: Vec<Anomaly>,
    pub predictions: Vec<Prediction>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScopePeriodRollup {
    pub scope_id: String,
    pub period: Period,
    pub bucket_start_ms: i64,
    pub users: UserCounters,
    pub content: ContentCounters,
    pub engagement: EngagementCounters,
    pub ai: AiCounters,
    pub academic: AcademicCounters,
    pub performance: PerformanceCounters,
    pub insights: RollupInsights,
    /// Highest log entry id folded into this record; replays at or below it
    /// are skipped.
    pub last_entry_id: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl ScopePeriodRollup {
    pub fn new(scope_id: &str, period: Period, bucket_start_ms: i64, now_ms: i64) -> Self {
        Self {
            scope_id: scope_id.to_string(),
            period,
            bucket_start_ms,
            users: UserCounters::default(),
            content: ContentCounters::default(),
            engagement: EngagementCounters::default(),
            ai: AiCounters::default(),
            academic: AcademicCounters::default(),
            performance: PerformanceCounters::default(),
            insights: RollupInsights::default(),
            last_entry_id: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Fold one event into the counters. Commutative: any arrival order for
    /// a fixed event set yields the same counters.
    pub fn apply_event(&mut self, event: &DomainEvent) {
        if let Some(actor) = event.actor_user_id.as_deref() {
            self.users.active_user_ids.insert(actor.to_string());
        }
        match event.event_type {
            EventType::Login => self.users.logins += 1,
            EventType::Logout => self.users.logouts += 1,
            EventType::ProfileUpdated => self.users.profile_updates += 1,
            EventType::PostCreated => {
                self.content.posts_created += 1;
                let content_type = event.content_type.as_deref().unwrap_or("post");
                self.content.by_type.add(content_type, 1);
            }
            EventType::CommentCreated => {
                self.content.comments_created += 1;
                self.content.by_type.add("comment", 1);
            }
            EventType::ContentViewed => self.content.views += 1,
            EventType::LikeGiven => self.engagement.likes_given += 1,
            EventType::LikeRemoved => self.engagement.likes_removed += 1,
            EventType::Share => self.engagement.shares += 1,
            EventType::Save => self.engagement.saves += 1,
            EventType::Follow => self.engagement.follows += 1,
            EventType::AiInteraction => {
                self.ai.interactions += 1;
                let feature = event.metadata_str(METADATA_FEATURE).unwrap_or("general");
                self.ai.by_feature.add(feature, 1);
            }
            EventType::AnswerProvided => {
                self.academic.answers_provided += 1;
                let department = event.metadata_str(METADATA_DEPARTMENT).unwrap_or("general");
                self.academic.by_department.add(department, 1);
            }
        }
        if let Some((content_id, weight)) = content_engagement_delta(event) {
            self.engagement.by_content.add(content_id, weight);
        }
        self.performance.events_total += 1;
        let hour_of_day = event.occurred_at_ms.rem_euclid(DAY_MS) / HOUR_MS;
        self.performance.by_hour_of_day.add(&format!("{hour_of_day:02}"), 1);
    }

    /// Guarded fold used on the consume path: entries at or below the
    /// recorded offset were already applied and are skipped. Returns whether
    /// the event was applied.
    pub fn apply_entry(&mut self, entry_id: &str, event: &DomainEvent) -> bool {
        if let Some(last) = self.last_entry_id.as_deref() {
            if cmp_entry_ids(entry_id, last) != Ordering::Greater {
                return false;
            }
        }
        self.apply_event(event);
        self.last_entry_id = Some(entry_id.to_string());
        true
    }

    pub fn recompute_insights(&mut self, previous: Option<&ScopePeriodRollup>) {
        let mut insights = RollupInsights::default();
        insights.trending = self
            .engagement
            .by_content
            .top(TRENDING_LIMIT)
            .into_iter()
            .map(|(content_id, engagement)| TrendingItem {
                content_id,
                engagement,
            })
            .collect();

        if let Some(previous) = previous {
            let pairs = [
                (
                    "users.active",
                    previous.users.active_users() as f64,
                    self.users.active_users() as f64,
                ),
                (
                    "engagement.total",
                    previous.engagement.by_content.total() as f64,
                    self.engagement.by_content.total() as f64,
                ),
            ];
            for (metric, prev_value, current) in pairs {
                if prev_value > 0.0 {
                    let change_ratio = (current - prev_value) / prev_value;
                    if change_ratio.abs() > ANOMALY_SWING_THRESHOLD {
                        insights.anomalies.push(Anomaly {
                            metric: metric.to_string(),
                            previous: prev_value,
                            current,
                            change_ratio,
                        });
                    }
                }
                insights.predictions.push(Prediction {
                    metric: metric.to_string(),
                    next_value: (current + (current - prev_value)).max(0.0),
                });
            }
        }

        self.insights = insights;
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRollupRepository {
    inner: Arc<Mutex<HashMap<(String, Period, i64), ScopePeriodRollup>>>,
}

impl InMemoryRollupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RollupRepository for InMemoryRollupRepository {
    fn get(
        &self,
        scope_id: &str,
        period: Period,
        bucket_start_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<ScopePeriodRollup>>> {
        let inner = self.inner.clone();
        let key = (scope_id.to_string(), period, bucket_start_ms);
        Box::pin(async move {
            Ok(inner.lock().expect("rollup repo lock").get(&key).cloned())
        })
    }

    fn create(&self, rollup: &ScopePeriodRollup) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let rollup = rollup.clone();
        Box::pin(async move {
            let key = (rollup.scope_id.clone(), rollup.period, rollup.bucket_start_ms);
            let mut guard = inner.lock().expect("rollup repo lock");
            if guard.contains_key(&key) {
                return Err(DomainError::Conflict);
            }
            guard.insert(key, rollup);
            Ok(())
        })
    }

    fn update(&self, rollup: &ScopePeriodRollup) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let rollup = rollup.clone();
        Box::pin(async move {
            let key = (rollup.scope_id.clone(), rollup.period, rollup.bucket_start_ms);
            let mut guard = inner.lock().expect("rollup repo lock");
            match guard.get_mut(&key) {
                Some(existing) => {
                    *existing = rollup;
                    Ok(())
                }
                None => Err(DomainError::NotFound),
            }
        })
    }

    fn list_range(
        &self,
        scope_id: &str,
        period: Period,
        start_ms: i64,
        end_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Vec<ScopePeriodRollup>>> {
        let inner = self.inner.clone();
        let scope_id = scope_id.to_string();
        Box::pin(async move {
            let guard = inner.lock().expect("rollup repo lock");
            let mut rollups: Vec<ScopePeriodRollup> = guard
                .values()
                .filter(|rollup| {
                    rollup.scope_id == scope_id
                        && rollup.period == period
                        && rollup.bucket_start_ms >= start_ms
                        && rollup.bucket_start_ms <= end_ms
                })
                .cloned()
                .collect();
            rollups.sort_by_key(|rollup| rollup.bucket_start_ms);
            Ok(rollups)
        })
    }

    fn prune_before(
        &self,
        period: Period,
        cutoff_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().expect("rollup repo lock");
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
    use crate::events::{EventInput, validate_event_input};

    // 2024-01-01T10:30:00Z; 2024-01-01 was a Monday.
    const MONDAY_1030: i64 = 1_704_105_000_000;

    fn event(event_type: &str, actor: Option<&str>, content: Option<&str>) -> DomainEvent {
        let mut input = EventInput {
            event_type: event_type.to_string(),
            scope_id: "college-a".to_string(),
            ..EventInput::default()
        };
        input.actor_user_id = actor.map(str::to_string);
        input.content_id = content.map(str::to_string);
        let mut event = validate_event_input(input).unwrap();
        event.occurred_at_ms = MONDAY_1030;
        event
    }

    #[test]
    fn hourly_bucket_truncates_to_the_hour() {
        let bucket = Period::Hourly.bucket_start_ms(MONDAY_1030);
        assert_eq!(bucket, MONDAY_1030 - 30 * 60_000);
    }

    #[test]
    fn daily_and_weekly_buckets_agree_on_a_monday() {
        let daily = Period::Daily.bucket_start_ms(MONDAY_1030);
        let weekly = Period::Weekly.bucket_start_ms(MONDAY_1030);
        assert_eq!(daily, weekly);
        assert_eq!(daily % DAY_MS, 0);
    }

    #[test]
    fn monthly_and_yearly_buckets_share_january_first() {
        let monthly = Period::Monthly.bucket_start_ms(MONDAY_1030);
        let yearly = Period::Yearly.bucket_start_ms(MONDAY_1030);
        assert_eq!(monthly, yearly);
        // 2024-01-01T00:00:00Z
        assert_eq!(monthly, 1_704_067_200_000);
    }

    #[test]
    fn prev_bucket_steps_back_one_granule() {
        let daily = Period::Daily.bucket_start_ms(MONDAY_1030);
        assert_eq!(Period::Daily.prev_bucket_start_ms(daily), daily - DAY_MS);
        let monthly = Period::Monthly.bucket_start_ms(MONDAY_1030);
        // previous month is December 2023
        assert_eq!(
            Period::Monthly.prev_bucket_start_ms(monthly),
            1_701_388_800_000
        );
    }

    #[test]
    fn fold_is_commutative_for_a_fixed_event_set() {
        let events = vec![
            event("login", Some("u1"), None),
            event("post_created", Some("u1"), Some("p1")),
            event("like_given", Some("u2"), Some("p1")),
            event("comment_created", Some("u3"), Some("p1")),
            event("ai_interaction", Some("u1"), None),
        ];
        let mut forward = ScopePeriodRollup::new("college-a", Period::Daily, 0, 0);
        let mut reverse = ScopePeriodRollup::new("college-a", Period::Daily, 0, 0);
        for e in &events {
            forward.apply_event(e);
        }
        for e in events.iter().rev() {
            reverse.apply_event(e);
        }
        assert_eq!(forward.users, reverse.users);
        assert_eq!(forward.content, reverse.content);
        assert_eq!(forward.engagement, reverse.engagement);
        assert_eq!(forward.performance, reverse.performance);
    }

    #[test]
    fn offset_guard_skips_already_applied_entries() {
        let mut rollup = ScopePeriodRollup::new("college-a", Period::Daily, 0, 0);
        let e = event("login", Some("u1"), None);
        assert!(rollup.apply_entry("100-0", &e));
        assert!(!rollup.apply_entry("100-0", &e));
        assert!(!rollup.apply_entry("99-5", &e));
        assert!(rollup.apply_entry("100-1", &e));
        assert_eq!(rollup.users.logins, 2);
    }

    #[test]
    fn trending_is_capped_and_ordered() {
        let mut rollup = ScopePeriodRollup::new("college-a", Period::Daily, 0, 0);
        for i in 0..8 {
            let content = format!("p{i}");
            for _ in 0..=i {
                rollup.apply_event(&event("like_given", Some("u1"), Some(&content)));
            }
        }
        rollup.recompute_insights(None);
        assert_eq!(rollup.insights.trending.len(), 5);
        assert_eq!(rollup.insights.trending[0].content_id, "p7");
        assert!(rollup.insights.anomalies.is_empty());
    }

    #[test]
    fn anomaly_fires_above_fifty_percent_swing() {
        let mut previous = ScopePeriodRollup::new("college-a", Period::Daily, 0, 0);
        for i in 0..10 {
            previous.apply_event(&event("login", Some(&format!("u{i}")), None));
        }
        let mut current = ScopePeriodRollup::new("college-a", Period::Daily, DAY_MS, 0);
        current.apply_event(&event("login", Some("u1"), None));

        current.recompute_insights(Some(&previous));
        let anomaly = current
            .insights
            .anomalies
            .iter()
            .find(|a| a.metric == "users.active")
            .expect("active-user anomaly");
        assert!(anomaly.change_ratio < -ANOMALY_SWING_THRESHOLD);
    }

    #[test]
    fn small_swings_are_not_anomalies() {
        let mut previous = ScopePeriodRollup::new("college-a", Period::Daily, 0, 0);
        for i in 0..10 {
            previous.apply_event(&event("login", Some(&format!("u{i}")), None));
        }
        let mut current = ScopePeriodRollup::new("college-a", Period::Daily, DAY_MS, 0);
        for i in 0..9 {
            current.apply_event(&event("login", Some(&format!("u{i}")), None));
        }
        current.recompute_insights(Some(&previous));
        assert!(current.insights.anomalies.is_empty());
        assert_eq!(current.insights.predictions.len(), 2);
    }
}
