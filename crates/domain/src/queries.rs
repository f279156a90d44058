use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::counters::{active_users_key, popular_content_key};
use crate::error::DomainError;
use crate::ports::counters::CounterStore;
use crate::ports::rollups::RollupRepository;
use crate::ports::users::UserRecordRepository;
use crate::rollup::{DAY_MS, Period, ScopePeriodRollup};
use crate::scoring::UserScores;
use crate::util::now_ms;

pub const LEADERBOARD_LOOKBACK_DAYS: i64 = 30;
pub const PROJECTION_HORIZON_MONTHS: usize = 6;
const MIN_PROJECTION_SAMPLES: usize = 3;
const LOW_CONFIDENCE: f64 = 0.2;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimePoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub overall_score: f64,
    pub scores: UserScores,
    pub streak: u32,
}

/// Constant-ratio growth fit over monthly samples. `sufficient` is false
/// when history is too thin to extrapolate; callers get a low-confidence
/// result instead of an error.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GrowthProjection {
    pub scope_id: String,
    pub monthly_rate: f64,
    pub confidence: f64,
    pub samples: usize,
    pub sufficient: bool,
    pub projected: Vec<TimePoint>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScopeComparison {
    pub scope_id: String,
    pub total: f64,
    pub points: usize,
}

enum MetricSelector {
    UsersActive,
    UsersLogins,
    UsersLogouts,
    UsersProfileUpdates,
    ContentPosts,
    ContentComments,
    ContentViews,
    ContentByType(String),
    EngagementLikes,
    EngagementLikesRemoved,
    EngagementShares,
    EngagementSaves,
    EngagementFollows,
    EngagementTotal,
    EngagementByContent(String),
    AiInteractions,
    AiByFeature(String),
    AcademicAnswers,
    AcademicByDepartment(String),
    PerformanceEvents,
    PerformanceByHour(String),
}

impl MetricSelector {
    fn parse(path: &str) -> DomainResult<Self> {
        let mut parts = path.splitn(3, '.');
        let section = parts.next().unwrap_or_default();
        let field = parts.next().unwrap_or_default();
        let category = parts.next();

        let unknown = || DomainError::Validation(format!("unknown metric '{path}'"));
        match (section, field, category) {
            ("users", "active", None) => Ok(Self::UsersActive),
            ("users", "logins", None) => Ok(Self::UsersLogins),
            ("users", "logouts", None) => Ok(Self::UsersLogouts),
            ("users", "profile_updates", None) => Ok(Self::UsersProfileUpdates),
            ("content", "posts", None) => Ok(Self::ContentPosts),
            ("content", "comments", None) => Ok(Self::ContentComments),
            ("content", "views", None) => Ok(Self::ContentViews),
            ("content", "by_type", Some(key)) => Ok(Self::ContentByType(key.to_string())),
            ("engagement", "likes", None) => Ok(Self::EngagementLikes),
            ("engagement", "likes_removed", None) => Ok(Self::EngagementLikesRemoved),
            ("engagement", "shares", None) => Ok(Self::EngagementShares),
            ("engagement", "saves", None) => Ok(Self::EngagementSaves),
            ("engagement", "follows", None) => Ok(Self::EngagementFollows),
            ("engagement", "total", None) => Ok(Self::EngagementTotal),
            ("engagement", "by_content", Some(key)) => {
                Ok(Self::EngagementByContent(key.to_string()))
            }
            ("ai", "interactions", None) => Ok(Self::AiInteractions),
            ("ai", "by_feature", Some(key)) => Ok(Self::AiByFeature(key.to_string())),
            ("academic", "answers", None) => Ok(Self::AcademicAnswers),
            ("academic", "by_department", Some(key)) => {
                Ok(Self::AcademicByDepartment(key.to_string()))
            }
            ("performance", "events", None) => Ok(Self::PerformanceEvents),
            ("performance", "by_hour", Some(key)) => Ok(Self::PerformanceByHour(key.to_string())),
            _ => Err(unknown()),
        }
    }

    fn value(&self, rollup: &ScopePeriodRollup) -> f64 {
        match self {
            Self::UsersActive => rollup.users.active_users() as f64,
            Self::UsersLogins => rollup.users.logins as f64,
            Self::UsersLogouts => rollup.users.logouts as f64,
            Self::UsersProfileUpdates => rollup.users.profile_updates as f64,
            Self::ContentPosts => rollup.content.posts_created as f64,
            Self::ContentComments => rollup.content.comments_created as f64,
            Self::ContentViews => rollup.content.views as f64,
            Self::ContentByType(key) => rollup.content.by_type.get(key) as f64,
            Self::EngagementLikes => rollup.engagement.likes_given as f64,
            Self::EngagementLikesRemoved => rollup.engagement.likes_removed as f64,
            Self::EngagementShares => rollup.engagement.shares as f64,
            Self::EngagementSaves => rollup.engagement.saves as f64,
            Self::EngagementFollows => rollup.engagement.follows as f64,
            Self::EngagementTotal => rollup.engagement.by_content.total() as f64,
            Self::EngagementByContent(key) => rollup.engagement.by_content.get(key) as f64,
            Self::AiInteractions => rollup.ai.interactions as f64,
            Self::AiByFeature(key) => rollup.ai.by_feature.get(key) as f64,
            Self::AcademicAnswers => rollup.academic.answers_provided as f64,
            Self::AcademicByDepartment(key) => rollup.academic.by_department.get(key) as f64,
            Self::PerformanceEvents => rollup.performance.events_total as f64,
            Self::PerformanceByHour(key) => rollup.performance.by_hour_of_day.get(key) as f64,
        }
    }
}

/// Sub-millisecond reads straight off the counter store, for "right now"
/// dashboard tiles. These counters are ephemeral and reconstructible; the
/// rollup records stay the source of truth for anything historical.
#[derive(Clone)]
pub struct LiveDashboard {
    counters: Arc<dyn CounterStore>,
}

impl LiveDashboard {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self { counters }
    }

    pub async fn active_users(&self, scope_id: &str) -> DomainResult<u64> {
        self.counters
            .cardinality(&active_users_key(scope_id))
            .await
            .map_err(|err| DomainError::Unavailable(err.to_string()))
    }

    pub async fn popular_content(
        &self,
        scope_id: &str,
        limit: usize,
    ) -> DomainResult<Vec<(String, f64)>> {
        self.counters
            .range_by_score_desc(&popular_content_key(scope_id), 0, limit)
            .await
            .map_err(|err| DomainError::Unavailable(err.to_string()))
    }
}

#[derive(Clone)]
pub struct AnalyticsQueryService {
    rollups: Arc<dyn RollupRepository>,
    users: Arc<dyn UserRecordRepository>,
}

impl AnalyticsQueryService {
    pub fn new(rollups: Arc<dyn RollupRepository>, users: Arc<dyn UserRecordRepository>) -> Self {
        Self { rollups, users }
    }

    /// Ascending `{timestamp, value}` series for a dotted metric path. An
    /// empty range is an empty series, not an error.
    pub async fn time_series(
        &self,
        scope_id: &str,
        metric: &str,
        start_ms: i64,
        end_ms: i64,
        period: Period,
    ) -> DomainResult<Vec<TimePoint>> {
        let selector = MetricSelector::parse(metric)?;
        let rollups = self
            .rollups
            .list_range(scope_id, period, start_ms, end_ms)
            .await?;
        Ok(rollups
            .iter()
            .map(|rollup| TimePoint {
                timestamp_ms: rollup.bucket_start_ms,
                value: selector.value(rollup),
            })
            .collect())
    }

    pub async fn leaderboard(
        &self,
        scope_id: &str,
        period: Period,
        limit: usize,
    ) -> DomainResult<Vec<LeaderboardEntry>> {
        self.leaderboard_as_of(scope_id, period, limit, now_ms()).await
    }

    /// Top records by overall score inside the 30-day lookback window; ties
    /// broken by the lexicographically smaller user id.
    pub async fn leaderboard_as_of(
        &self,
        scope_id: &str,
        period: Period,
        limit: usize,
        as_of_ms: i64,
    ) -> DomainResult<Vec<LeaderboardEntry>> {
        let start = as_of_ms - LEADERBOARD_LOOKBACK_DAYS * DAY_MS;
        let mut records = self
            .users
            .top_by_overall(scope_id, period, start, as_of_ms, limit)
            .await?;
        records.sort_by(|a, b| {
            b.scores
                .overall
                .partial_cmp(&a.scores.overall)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(records
            .into_iter()
            .enumerate()
            .map(|(index, record)| LeaderboardEntry {
                rank: index + 1,
                user_id: record.user_id.clone(),
                overall_score: record.scores.overall,
                scores: record.scores.clone(),
                streak: record.retention.streak,
            })
            .collect())
    }

    /// Constant-ratio growth from the first and last monthly active-user
    /// samples: `rate = (last/first)^(1/periods) - 1`, projected six months
    /// forward. Fewer than three samples yields a low-confidence result.
    pub async fn growth_projection(&self, scope_id: &str) -> DomainResult<GrowthProjection> {
        let rollups = self
            .rollups
            .list_range(scope_id, Period::Monthly, 0, now_ms())
            .await?;
        let samples: Vec<(i64, f64)> = rollups
            .iter()
            .map(|rollup| (rollup.bucket_start_ms, rollup.users.active_users() as f64))
            .collect();

        let insufficient = GrowthProjection {
            scope_id: scope_id.to_string(),
            monthly_rate: 0.0,
            confidence: LOW_CONFIDENCE,
            samples: samples.len(),
            sufficient: false,
            projected: Vec::new(),
        };
        if samples.len() < MIN_PROJECTION_SAMPLES {
            return Ok(insufficient);
        }
        let (first_bucket, first) = samples[0];
        let (last_bucket, last) = samples[samples.len() - 1];
        if first <= 0.0 || last <= 0.0 || last_bucket <= first_bucket {
            return Ok(insufficient);
        }

        let periods = (samples.len() - 1) as f64;
        let monthly_rate = (last / first).powf(1.0 / periods) - 1.0;

        let mut projected = Vec::with_capacity(PROJECTION_HORIZON_MONTHS);
        let mut bucket = last_bucket;
        let mut value = last;
        for _ in 0..PROJECTION_HORIZON_MONTHS {
            bucket = Period::Monthly.bucket_start_ms(bucket + 32 * DAY_MS);
            value *= 1.0 + monthly_rate;
            projected.push(TimePoint {
                timestamp_ms: bucket,
                value,
            });
        }

        Ok(GrowthProjection {
            scope_id: scope_id.to_string(),
            monthly_rate,
            confidence: (0.3 + 0.1 * samples.len() as f64).min(0.9),
            samples: samples.len(),
            sufficient: true,
            projected,
        })
    }

    /// Same metric totalled across several scopes over one window.
    pub async fn compare_scopes(
        &self,
        scope_ids: &[String],
        metric: &str,
        period: Period,
        start_ms: i64,
        end_ms: i64,
    ) -> DomainResult<Vec<ScopeComparison>> {
        let mut comparisons = Vec::with_capacity(scope_ids.len());
        for scope_id in scope_ids {
            let series = self
                .time_series(scope_id, metric, start_ms, end_ms, period)
                .await?;
            comparisons.push(ScopeComparison {
                scope_id: scope_id.clone(),
                total: series.iter().map(|point| point.value).sum(),
                points: series.len(),
            });
        }
        Ok(comparisons)
    }
}
