use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::DomainResult;
use crate::error::DomainError;
use crate::events::{DomainEvent, decode_log_fields};
use crate::ports::event_log::{EventLog, LogEntry};
use crate::ports::notify::{
    Notifier, Recommendation, RecommendationKind, RecommendationPriority,
};
use crate::ports::rollups::RollupRepository;
use crate::ports::users::UserRecordRepository;
use crate::rollup::{Period, ScopePeriodRollup};
use crate::scoring::{self, UserPeriodRecord};
use crate::util::now_ms;

#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    /// Churn risk above which a re-engagement recommendation is emitted.
    pub churn_alert_threshold: f64,
    /// Attempts per bucket write before giving up on a create/update race.
    pub max_upsert_attempts: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            churn_alert_threshold: 70.0,
            max_upsert_attempts: 3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed: usize,
    pub skipped: usize,
}

/// Single logical consumer of the event log. Folds events into scope
/// rollups for every aggregated period, finalizes touched users' daily
/// scores, and acks entries only after every write committed. A failed
/// write aborts the whole batch un-acked; the offset guard inside each
/// rollup makes the redelivery harmless.
#[derive(Clone)]
pub struct RollupAggregator {
    log: Arc<dyn EventLog>,
    rollups: Arc<dyn RollupRepository>,
    users: Arc<dyn UserRecordRepository>,
    notifier: Arc<dyn Notifier>,
    config: AggregatorConfig,
}

impl RollupAggregator {
    pub fn new(
        log: Arc<dyn EventLog>,
        rollups: Arc<dyn RollupRepository>,
        users: Arc<dyn UserRecordRepository>,
        notifier: Arc<dyn Notifier>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            log,
            rollups,
            users,
            notifier,
            config,
        }
    }

    pub async fn run_batch(&self, max_entries: usize) -> DomainResult<BatchOutcome> {
        let entries = self
            .log
            .read_from(None, max_entries)
            .await
            .map_err(|err| DomainError::Unavailable(err.to_string()))?;
        if entries.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let (events, skipped) = decode_entries(&entries);

        let mut recommendations = Vec::new();
        self.fold_groups(&events, &mut recommendations).await?;

        let touched = touched_daily_users(&events);
        for (bucket, user_id) in &touched {
            if let Some(recommendation) = self.finalize_user(user_id, *bucket).await? {
                recommendations.push(recommendation);
            }
        }

        for recommendation in &recommendations {
            if let Err(err) = self.notifier.notify(recommendation).await {
                warn!(error = %err, kind = recommendation.kind.as_str(), "recommendation delivery failed");
            }
        }

        for entry in &entries {
            self.log
                .ack(&entry.entry_id)
                .await
                .map_err(|err| DomainError::Unavailable(err.to_string()))?;
        }

        debug!(processed = events.len(), skipped, "batch aggregated");
        Ok(BatchOutcome {
            processed: events.len(),
            skipped,
        })
    }

    /// Disaster-recovery path: replay the whole retained log, without
    /// acking, into a cleared record store. Rebuilds rollups and user
    /// records (counters and scores). Returns the number of replayed
    /// events.
    pub async fn rebuild_from_log(&self, chunk_size: usize) -> DomainResult<usize> {
        let mut after: Option<String> = None;
        let mut total = 0usize;
        let mut touched: BTreeSet<(i64, String)> = BTreeSet::new();
        let mut discarded = Vec::new();

        loop {
            let entries = self
                .log
                .read_from(after.as_deref(), chunk_size)
                .await
                .map_err(|err| DomainError::Unavailable(err.to_string()))?;
            let Some(last) = entries.last() else {
                break;
            };
            after = Some(last.entry_id.clone());

            let (events, _) = decode_entries(&entries);
            self.fold_groups(&events, &mut discarded).await?;
            for (_, event) in &events {
                self.refold_user_counters(event).await?;
            }
            touched.extend(touched_daily_users(&events));
            total += events.len();
        }

        // recommendations gathered during replay describe stale history
        discarded.clear();

        for (bucket, user_id) in &touched {
            self.finalize_user_silent(user_id, *bucket).await?;
        }
        Ok(total)
    }

    async fn fold_groups(
        &self,
        events: &[(String, DomainEvent)],
        recommendations: &mut Vec<Recommendation>,
    ) -> DomainResult<()> {
        let mut groups: BTreeMap<(String, Period, i64), Vec<usize>> = BTreeMap::new();
        for (index, (_, event)) in events.iter().enumerate() {
            for period in Period::AGGREGATED {
                let bucket = period.bucket_start_ms(event.occurred_at_ms);
                groups
                    .entry((event.scope_id.clone(), period, bucket))
                    .or_default()
                    .push(index);
            }
        }

        for ((scope_id, period, bucket), indexes) in &groups {
            let items: Vec<(&str, &DomainEvent)> = indexes
                .iter()
                .map(|&index| (events[index].0.as_str(), &events[index].1))
                .collect();
            self.fold_bucket(scope_id, *period, *bucket, &items, recommendations)
                .await?;
        }
        Ok(())
    }

    async fn fold_bucket(
        &self,
        scope_id: &str,
        period: Period,
        bucket_start_ms: i64,
        items: &[(&str, &DomainEvent)],
        recommendations: &mut Vec<Recommendation>,
    ) -> DomainResult<()> {
        let previous = self
            .rollups
            .get(scope_id, period, period.prev_bucket_start_ms(bucket_start_ms))
            .await?;

        for _ in 0..self.config.max_upsert_attempts {
            let existing = self.rollups.get(scope_id, period, bucket_start_ms).await?;
            let creating = existing.is_none();
            let mut rollup = existing.unwrap_or_else(|| {
                ScopePeriodRollup::new(scope_id, period, bucket_start_ms, now_ms())
            });

            for (entry_id, event) in items {
                rollup.apply_entry(entry_id, event);
            }
            rollup.recompute_insights(previous.as_ref());
            rollup.updated_at_ms = now_ms();

            let result = if creating {
                self.rollups.create(&rollup).await
            } else {
                self.rollups.update(&rollup).await
            };
            match result {
                Ok(()) => {
                    // anomaly alerts are raised once, on the daily granule
                    if period == Period::Daily {
                        for anomaly in &rollup.insights.anomalies {
                            recommendations.push(Recommendation {
                                kind: RecommendationKind::EngagementAnomaly,
                                priority: RecommendationPriority::Medium,
                                message: format!(
                                    "{} swung {:+.0}% against the previous {} bucket",
                                    anomaly.metric,
                                    anomaly.change_ratio * 100.0,
                                    period.as_str()
                                ),
                                action: "review_engagement_dashboard".to_string(),
                                scope_id: scope_id.to_string(),
                                user_id: None,
                            });
                        }
                    }
                    return Ok(());
                }
                // another consumer created the bucket first; retry as update
                Err(DomainError::Conflict) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(DomainError::Conflict)
    }

    async fn finalize_user(
        &self,
        user_id: &str,
        bucket_start_ms: i64,
    ) -> DomainResult<Option<Recommendation>> {
        let Some(finalized) = self.finalize_user_silent(user_id, bucket_start_ms).await? else {
            return Ok(None);
        };
        if finalized.retention.churn_risk > self.config.churn_alert_threshold {
            return Ok(Some(Recommendation {
                kind: RecommendationKind::ChurnRisk,
                priority: RecommendationPriority::High,
                message: format!(
                    "churn risk {:.0} for user {user_id}",
                    finalized.retention.churn_risk
                ),
                action: "send_re_engagement_nudge".to_string(),
                scope_id: finalized.scope_id.clone(),
                user_id: Some(user_id.to_string()),
            }));
        }
        Ok(None)
    }

    async fn finalize_user_silent(
        &self,
        user_id: &str,
        bucket_start_ms: i64,
    ) -> DomainResult<Option<UserPeriodRecord>> {
        let Some(record) = self.users.get(user_id, Period::Daily, bucket_start_ms).await? else {
            return Ok(None);
        };
        let previous = self
            .users
            .get(
                user_id,
                Period::Daily,
                Period::Daily.prev_bucket_start_ms(bucket_start_ms),
            )
            .await?;
        let mut finalized = scoring::finalize(&record, previous.as_ref());
        finalized.updated_at_ms = now_ms();
        self.users.upsert(&finalized).await?;
        Ok(Some(finalized))
    }

    /// Rebuild-only: the gateway normally owns user counters, but a replay
    /// into a cleared store has to reconstruct them from the log.
    async fn refold_user_counters(&self, event: &DomainEvent) -> DomainResult<()> {
        let bucket = Period::Daily.bucket_start_ms(event.occurred_at_ms);
        if let Some(actor) = event.actor_user_id.as_deref() {
            let mut record = self
                .users
                .get(actor, Period::Daily, bucket)
                .await?
                .unwrap_or_else(|| {
                    UserPeriodRecord::new(actor, &event.scope_id, Period::Daily, bucket, now_ms())
                });
            record.apply_actor_event(event);
            self.users.upsert(&record).await?;
        }
        if let Some(target) = event.target_user_id() {
            let mut record = self
                .users
                .get(target, Period::Daily, bucket)
                .await?
                .unwrap_or_else(|| {
                    UserPeriodRecord::new(target, &event.scope_id, Period::Daily, bucket, now_ms())
                });
            record.apply_target_event(event);
            self.users.upsert(&record).await?;
        }
        Ok(())
    }
}

fn decode_entries(entries: &[LogEntry]) -> (Vec<(String, DomainEvent)>, usize) {
    let mut events = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;
    for entry in entries {
        match decode_log_fields(&entry.fields) {
            Some(event) => events.push((entry.entry_id.clone(), event)),
            None => {
                skipped += 1;
                warn!(entry_id = %entry.entry_id, "undecodable log entry skipped");
            }
        }
    }
    (events, skipped)
}

fn touched_daily_users(events: &[(String, DomainEvent)]) -> BTreeSet<(i64, String)> {
    let mut touched = BTreeSet::new();
    for (_, event) in events {
        let bucket = Period::Daily.bucket_start_ms(event.occurred_at_ms);
        if let Some(actor) = event.actor_user_id.as_deref() {
            touched.insert((bucket, actor.to_string()));
        }
        if let Some(target) = event.target_user_id() {
            touched.insert((bucket, target.to_string()));
        }
    }
    touched
}
