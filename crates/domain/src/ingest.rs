use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::DomainResult;
use crate::counters::{
    active_users_key, content_engagement_delta, events_by_type_key, events_hour_key,
    events_total_key, popular_content_key,
};
use crate::error::DomainError;
use crate::events::{DomainEvent, EventInput, encode_log_fields, validate_event_input};
use crate::ports::counters::CounterStore;
use crate::ports::event_log::EventLog;
use crate::ports::users::UserRecordRepository;
use crate::rollup::Period;
use crate::scoring::UserPeriodRecord;
use crate::util::{backoff_ms, now_ms};

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub append_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            append_max_attempts: 3,
            backoff_base_ms: 50,
            backoff_max_ms: 1_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestReceipt {
    pub accepted: bool,
    pub event_id: String,
}

#[derive(Clone)]
pub struct IngestService {
    counters: Arc<dyn CounterStore>,
    log: Arc<dyn EventLog>,
    users: Arc<dyn UserRecordRepository>,
    config: IngestConfig,
}

impl IngestService {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        log: Arc<dyn EventLog>,
        users: Arc<dyn UserRecordRepository>,
        config: IngestConfig,
    ) -> Self {
        Self {
            counters,
            log,
            users,
            config,
        }
    }

    /// Accept one domain event: best-effort fast counters, durable append
    /// (must succeed), then the actor's current-day counters so synchronous
    /// "my stats" reads reflect the action.
    pub async fn ingest(&self, input: EventInput) -> DomainResult<IngestReceipt> {
        let event = validate_event_input(input)?;

        self.bump_fast_counters(&event).await;

        let fields = encode_log_fields(&event)?;
        self.append_with_retry(&fields).await?;

        if event.actor_user_id.is_some() {
            if let Err(err) = self.fold_user_counters(&event).await {
                // the event is already durable; the aggregator and the
                // rebuild path will reconcile the user record
                warn!(error = %err, event_id = %event.event_id, "user counter fold failed");
            }
        }

        Ok(IngestReceipt {
            accepted: true,
            event_id: event.event_id,
        })
    }

    /// Fast-path counters only feed live dashboards; losing or duplicating
    /// them on a caller retry is tolerated.
    async fn bump_fast_counters(&self, event: &DomainEvent) {
        let mut failures = 0u32;
        if self.counters.increment(&events_total_key()).await.is_err() {
            failures += 1;
        }
        if self
            .counters
            .increment(&events_by_type_key(event.event_type))
            .await
            .is_err()
        {
            failures += 1;
        }
        if self
            .counters
            .increment(&events_hour_key(event.occurred_at_ms))
            .await
            .is_err()
        {
            failures += 1;
        }
        if let Some(actor) = event.actor_user_id.as_deref() {
            if self
                .counters
                .increment_member(&active_users_key(&event.scope_id), actor, 1.0)
                .await
                .is_err()
            {
                failures += 1;
            }
        }
        if let Some((content_id, weight)) = content_engagement_delta(event) {
            if self
                .counters
                .increment_member(&popular_content_key(&event.scope_id), content_id, weight as f64)
                .await
                .is_err()
            {
                failures += 1;
            }
        }
        if failures > 0 {
            warn!(failures, event_id = %event.event_id, "fast counter writes failed");
        }
    }

    async fn append_with_retry(&self, fields: &[(String, String)]) -> DomainResult<String> {
        let mut last_error = String::new();
        for attempt in 1..=self.config.append_max_attempts {
            match self.log.append(fields).await {
                Ok(entry_id) => return Ok(entry_id),
                Err(err) => {
                    last_error = err.to_string();
                    if attempt < self.config.append_max_attempts {
                        let delay = backoff_ms(
                            self.config.backoff_base_ms,
                            attempt,
                            self.config.backoff_max_ms,
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }
        Err(DomainError::Unavailable(format!(
            "event log append failed after {} attempts: {last_error}",
            self.config.append_max_attempts
        )))
    }

    async fn fold_user_counters(&self, event: &DomainEvent) -> DomainResult<()> {
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
            record.updated_at_ms = now_ms();
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
            record.updated_at_ms = now_ms();
            self.users.upsert(&record).await?;
        }
        Ok(())
    }
}
