use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pulse_domain::aggregator::{AggregatorConfig, RollupAggregator};
use pulse_domain::counters::InMemoryCounterStore;
use pulse_domain::error::DomainError;
use pulse_domain::event_log::InMemoryEventLog;
use pulse_domain::events::{
    DomainEvent, EventInput, encode_log_fields, validate_event_input,
};
use pulse_domain::ingest::{IngestConfig, IngestService};
use pulse_domain::ports::BoxFuture;
use pulse_domain::ports::event_log::{EventLog, EventLogError, LogEntry};
use pulse_domain::ports::notify::{InMemoryNotifier, RecommendationKind};
use pulse_domain::ports::rollups::RollupRepository;
use pulse_domain::ports::users::UserRecordRepository;
use pulse_domain::queries::AnalyticsQueryService;
use pulse_domain::rollup::{
    DAY_MS, InMemoryRollupRepository, Period, ScopePeriodRollup,
};
use pulse_domain::scoring::{self, InMemoryUserRecordRepository, UserPeriodRecord};
use pulse_domain::util::now_ms;

const SCOPE: &str = "college-a";

struct Stack {
    ingest: IngestService,
    aggregator: RollupAggregator,
    queries: AnalyticsQueryService,
    log: Arc<InMemoryEventLog>,
    rollups: Arc<InMemoryRollupRepository>,
    users: Arc<InMemoryUserRecordRepository>,
    notifier: Arc<InMemoryNotifier>,
}

fn stack() -> Stack {
    let counters = Arc::new(InMemoryCounterStore::new());
    let log = Arc::new(InMemoryEventLog::new());
    let rollups = Arc::new(InMemoryRollupRepository::new());
    let users = Arc::new(InMemoryUserRecordRepository::new());
    let notifier = Arc::new(InMemoryNotifier::new());
    let ingest = IngestService::new(
        counters,
        log.clone(),
        users.clone(),
        IngestConfig {
            append_max_attempts: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
        },
    );
    let aggregator = RollupAggregator::new(
        log.clone(),
        rollups.clone(),
        users.clone(),
        notifier.clone(),
        AggregatorConfig::default(),
    );
    let queries = AnalyticsQueryService::new(rollups.clone(), users.clone());
    Stack {
        ingest,
        aggregator,
        queries,
        log,
        rollups,
        users,
        notifier,
    }
}

fn input(event_type: &str, actor: &str, content: Option<&str>) -> EventInput {
    EventInput {
        event_type: event_type.to_string(),
        scope_id: SCOPE.to_string(),
        actor_user_id: Some(actor.to_string()),
        content_id: content.map(str::to_string),
        ..EventInput::default()
    }
}

fn event_at(
    event_type: &str,
    actor: &str,
    content: Option<&str>,
    occurred_at_ms: i64,
) -> DomainEvent {
    let mut event = validate_event_input(input(event_type, actor, content)).unwrap();
    event.occurred_at_ms = occurred_at_ms;
    event
}

async fn append_event(log: &InMemoryEventLog, event: &DomainEvent) {
    let fields = encode_log_fields(event).unwrap();
    log.append(&fields).await.unwrap();
}

#[tokio::test]
async fn concrete_daily_scenario_flows_end_to_end() {
    let stack = stack();

    for _ in 0..3 {
        stack.ingest.ingest(input("login", "u1", None)).await.unwrap();
    }
    for content in ["p1", "p2"] {
        stack
            .ingest
            .ingest(input("post_created", "u1", Some(content)))
            .await
            .unwrap();
    }
    for _ in 0..5 {
        stack
            .ingest
            .ingest(input("like_given", "u1", Some("p1")))
            .await
            .unwrap();
    }

    let outcome = stack.aggregator.run_batch(100).await.unwrap();
    assert_eq!(outcome.processed, 10);
    assert_eq!(stack.log.pending().await.unwrap(), 0);

    let bucket = Period::Daily.bucket_start_ms(now_ms());
    let rollup = stack
        .rollups
        .get(SCOPE, Period::Daily, bucket)
        .await
        .unwrap()
        .expect("daily rollup");
    assert_eq!(rollup.users.logins, 3);
    assert_eq!(rollup.users.active_users(), 1);
    assert_eq!(rollup.content.posts_created, 2);
    assert_eq!(rollup.engagement.likes_given, 5);
    assert_eq!(rollup.performance.events_total, 10);
    // five likes at weight two on p1
    assert_eq!(rollup.insights.trending[0].content_id, "p1");
    assert_eq!(rollup.insights.trending[0].engagement, 10);

    let record = stack
        .users
        .get("u1", Period::Daily, bucket)
        .await
        .unwrap()
        .expect("user record");
    assert_eq!(record.activity.sessions, 3);
    assert_eq!(record.activity.posts_created, 2);
    assert_eq!(record.activity.likes_given, 5);
    assert!(record.finalized);
    assert_eq!(record.scores.engagement, 45.0);
    assert_eq!(record.scores.contribution, 30.0);

    let leaderboard = stack
        .queries
        .leaderboard(SCOPE, Period::Daily, 10)
        .await
        .unwrap();
    assert_eq!(leaderboard.len(), 1);
    assert_eq!(leaderboard[0].user_id, "u1");
    assert_eq!(leaderboard[0].overall_score, 0.25 * 45.0 + 0.30 * 30.0);

    // every aggregated granularity got its bucket
    for period in Period::AGGREGATED {
        let bucket = period.bucket_start_ms(now_ms());
        assert!(
            stack
                .rollups
                .get(SCOPE, period, bucket)
                .await
                .unwrap()
                .is_some(),
            "missing {} rollup",
            period.as_str()
        );
    }
}

struct FlakyAckLog {
    inner: Arc<InMemoryEventLog>,
    fail_acks: AtomicBool,
}

impl FlakyAckLog {
    fn new(inner: Arc<InMemoryEventLog>) -> Self {
        Self {
            inner,
            fail_acks: AtomicBool::new(false),
        }
    }
}

impl EventLog for FlakyAckLog {
    fn append(&self, fields: &[(String, String)]) -> BoxFuture<'_, Result<String, EventLogError>> {
        self.inner.append(fields)
    }

    fn read_from(
        &self,
        after_id: Option<&str>,
        max: usize,
    ) -> BoxFuture<'_, Result<Vec<LogEntry>, EventLogError>> {
        self.inner.read_from(after_id, max)
    }

    fn ack(&self, entry_id: &str) -> BoxFuture<'_, Result<(), EventLogError>> {
        if self.fail_acks.load(Ordering::SeqCst) {
            return Box::pin(async {
                Err(EventLogError::Unavailable("ack refused".to_string()))
            });
        }
        self.inner.ack(entry_id)
    }

    fn pending(&self) -> BoxFuture<'_, Result<u64, EventLogError>> {
        self.inner.pending()
    }
}

#[tokio::test]
async fn crash_before_ack_reprocesses_without_double_counting() {
    let inner = Arc::new(InMemoryEventLog::new());
    let log = Arc::new(FlakyAckLog::new(inner.clone()));
    let rollups = Arc::new(InMemoryRollupRepository::new());
    let users = Arc::new(InMemoryUserRecordRepository::new());
    let aggregator = RollupAggregator::new(
        log.clone(),
        rollups.clone(),
        users.clone(),
        Arc::new(InMemoryNotifier::new()),
        AggregatorConfig::default(),
    );

    let ts = now_ms();
    for event_type in ["login", "login", "like_given", "like_given"] {
        let content = (event_type == "like_given").then_some("p1");
        append_event(&inner, &event_at(event_type, "u1", content, ts)).await;
    }

    // batch commits its writes, then dies before acking
    log.fail_acks.store(true, Ordering::SeqCst);
    let err = aggregator.run_batch(100).await.unwrap_err();
    assert!(matches!(err, DomainError::Unavailable(_)));
    assert_eq!(inner.pending().await.unwrap(), 4);

    let bucket = Period::Daily.bucket_start_ms(ts);
    let after_crash = rollups
        .get(SCOPE, Period::Daily, bucket)
        .await
        .unwrap()
        .expect("rollup written before the crash");
    assert_eq!(after_crash.users.logins, 2);

    // redelivery of the same entries must be a no-op on the counters
    log.fail_acks.store(false, Ordering::SeqCst);
    let outcome = aggregator.run_batch(100).await.unwrap();
    assert_eq!(outcome.processed, 4);
    assert_eq!(inner.pending().await.unwrap(), 0);

    let replayed = rollups
        .get(SCOPE, Period::Daily, bucket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replayed.users.logins, 2);
    assert_eq!(replayed.engagement.likes_given, 2);
    assert_eq!(replayed.performance.events_total, 4);
}

#[tokio::test]
async fn bucket_counters_are_order_independent() {
    let ts = now_ms();
    let events = vec![
        event_at("login", "u1", None, ts),
        event_at("post_created", "u1", Some("p1"), ts),
        event_at("like_given", "u2", Some("p1"), ts),
        event_at("comment_created", "u3", Some("p1"), ts),
        event_at("share", "u2", Some("p1"), ts),
        event_at("ai_interaction", "u1", None, ts),
    ];

    let forward = stack();
    for event in &events {
        append_event(&forward.log, event).await;
    }
    forward.aggregator.run_batch(100).await.unwrap();

    let reverse = stack();
    for event in events.iter().rev() {
        append_event(&reverse.log, event).await;
    }
    reverse.aggregator.run_batch(100).await.unwrap();

    let bucket = Period::Daily.bucket_start_ms(ts);
    let a = forward
        .rollups
        .get(SCOPE, Period::Daily, bucket)
        .await
        .unwrap()
        .unwrap();
    let b = reverse
        .rollups
        .get(SCOPE, Period::Daily, bucket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a.users, b.users);
    assert_eq!(a.content, b.content);
    assert_eq!(a.engagement, b.engagement);
    assert_eq!(a.ai, b.ai);
    assert_eq!(a.performance, b.performance);
}

#[tokio::test]
async fn concurrent_consumers_produce_one_bucket_with_each_event_once() {
    let log = Arc::new(InMemoryEventLog::new());
    let rollups = Arc::new(InMemoryRollupRepository::new());
    let users = Arc::new(InMemoryUserRecordRepository::new());
    let notifier = Arc::new(InMemoryNotifier::new());

    let ts = now_ms();
    append_event(&log, &event_at("login", "u1", None, ts)).await;
    append_event(&log, &event_at("login", "u2", None, ts)).await;

    let first = RollupAggregator::new(
        log.clone(),
        rollups.clone(),
        users.clone(),
        notifier.clone(),
        AggregatorConfig::default(),
    );
    let second = RollupAggregator::new(
        log.clone(),
        rollups.clone(),
        users.clone(),
        notifier.clone(),
        AggregatorConfig::default(),
    );

    let (a, b) = tokio::join!(first.run_batch(100), second.run_batch(100));
    a.unwrap();
    b.unwrap();

    let bucket = Period::Daily.bucket_start_ms(ts);
    let rollup = rollups
        .get(SCOPE, Period::Daily, bucket)
        .await
        .unwrap()
        .expect("exactly one bucket");
    assert_eq!(rollup.users.logins, 2);
    assert_eq!(rollup.users.active_users(), 2);
    assert_eq!(rollup.performance.events_total, 2);
    assert_eq!(log.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn rebuild_from_log_reconstructs_rollups_and_user_records() {
    let stack = stack();
    stack.ingest.ingest(input("login", "u1", None)).await.unwrap();
    stack
        .ingest
        .ingest(input("post_created", "u1", Some("p1")))
        .await
        .unwrap();
    stack
        .ingest
        .ingest(input("like_given", "u2", Some("p1")))
        .await
        .unwrap();

    // processed copy of the state, for comparison
    let baseline = RollupAggregator::new(
        stack.log.clone(),
        stack.rollups.clone(),
        stack.users.clone(),
        Arc::new(InMemoryNotifier::new()),
        AggregatorConfig::default(),
    );
    // rebuild target: same log, cleared record store
    let rebuilt_rollups = Arc::new(InMemoryRollupRepository::new());
    let rebuilt_users = Arc::new(InMemoryUserRecordRepository::new());
    let rebuilder = RollupAggregator::new(
        stack.log.clone(),
        rebuilt_rollups.clone(),
        rebuilt_users.clone(),
        Arc::new(InMemoryNotifier::new()),
        AggregatorConfig::default(),
    );

    let replayed = rebuilder.rebuild_from_log(2).await.unwrap();
    assert_eq!(replayed, 3);
    // replay never acks
    assert_eq!(stack.log.pending().await.unwrap(), 3);

    baseline.run_batch(100).await.unwrap();

    let bucket = Period::Daily.bucket_start_ms(now_ms());
    let original = stack
        .rollups
        .get(SCOPE, Period::Daily, bucket)
        .await
        .unwrap()
        .unwrap();
    let rebuilt = rebuilt_rollups
        .get(SCOPE, Period::Daily, bucket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(original.users, rebuilt.users);
    assert_eq!(original.content, rebuilt.content);
    assert_eq!(original.engagement, rebuilt.engagement);
    assert_eq!(original.performance, rebuilt.performance);

    for user_id in ["u1", "u2"] {
        let original = stack
            .users
            .get(user_id, Period::Daily, bucket)
            .await
            .unwrap()
            .unwrap();
        let rebuilt = rebuilt_users
            .get(user_id, Period::Daily, bucket)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original.activity, rebuilt.activity);
        assert_eq!(original.scores, rebuilt.scores);
        assert_eq!(original.retention, rebuilt.retention);
    }
}

#[tokio::test]
async fn collapsed_activity_emits_a_churn_recommendation() {
    let stack = stack();
    let today = Period::Daily.bucket_start_ms(now_ms());
    let yesterday = today - DAY_MS;

    let mut prior = UserPeriodRecord::new("u1", SCOPE, Period::Daily, yesterday, yesterday);
    prior.activity.sessions = 10;
    let prior = scoring::finalize(&prior, None);
    stack.users.upsert(&prior).await.unwrap();

    // one passive action today, no sessions
    stack
        .ingest
        .ingest(input("like_given", "u1", Some("p1")))
        .await
        .unwrap();
    stack.aggregator.run_batch(100).await.unwrap();

    let recommendations = stack.notifier.snapshot();
    let churn = recommendations
        .iter()
        .find(|r| r.kind == RecommendationKind::ChurnRisk)
        .expect("churn recommendation");
    assert_eq!(churn.user_id.as_deref(), Some("u1"));
    assert_eq!(churn.scope_id, SCOPE);

    let record = stack
        .users
        .get("u1", Period::Daily, today)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.retention.churn_risk, 100.0);
    assert_eq!(record.retention.streak, 1);
}

#[tokio::test]
async fn active_user_collapse_emits_an_anomaly_recommendation() {
    let stack = stack();
    let today = Period::Daily.bucket_start_ms(now_ms());
    let yesterday = today - DAY_MS;

    let mut previous = ScopePeriodRollup::new(SCOPE, Period::Daily, yesterday, yesterday);
    for i in 0..10 {
        previous.apply_event(&event_at("login", &format!("u{i}"), None, yesterday));
    }
    stack.rollups.create(&previous).await.unwrap();

    stack.ingest.ingest(input("login", "u1", None)).await.unwrap();
    stack.aggregator.run_batch(100).await.unwrap();

    let recommendations = stack.notifier.snapshot();
    assert!(
        recommendations
            .iter()
            .any(|r| r.kind == RecommendationKind::EngagementAnomaly),
        "expected an anomaly recommendation, got {recommendations:?}"
    );
}

#[tokio::test]
async fn growth_projection_needs_three_monthly_samples() {
    let stack = stack();
    let months = [
        Period::Monthly.bucket_start_ms(1_704_105_000_000), // 2024-01
        Period::Monthly.bucket_start_ms(1_707_000_000_000), // 2024-02
        Period::Monthly.bucket_start_ms(1_709_500_000_000), // 2024-03
    ];
    let sizes = [100usize, 150, 225];

    for (index, (bucket, size)) in months.iter().zip(sizes).enumerate() {
        let mut rollup = ScopePeriodRollup::new(SCOPE, Period::Monthly, *bucket, *bucket);
        for i in 0..size {
            rollup.users.active_user_ids.insert(format!("u{i}"));
        }
        stack.rollups.create(&rollup).await.unwrap();

        let projection = stack.queries.growth_projection(SCOPE).await.unwrap();
        if index < 2 {
            assert!(!projection.sufficient);
            assert!(projection.confidence < 0.3);
            assert!(projection.projected.is_empty());
        }
    }

    let projection = stack.queries.growth_projection(SCOPE).await.unwrap();
    assert!(projection.sufficient);
    assert_eq!(projection.samples, 3);
    // (225/100)^(1/2) - 1
    assert!((projection.monthly_rate - 0.5).abs() < 1e-9);
    assert_eq!(projection.projected.len(), 6);
    assert!((projection.projected[0].value - 337.5).abs() < 1e-6);
    assert!(projection.confidence >= 0.3);
}

#[tokio::test]
async fn time_series_is_ascending_and_empty_ranges_are_not_errors() {
    let stack = stack();
    // 2024-03-04 was a Monday; three separate hours
    let base = 1_709_510_400_000;
    for (hour, likes) in [(0i64, 1usize), (1, 3), (2, 2)] {
        let ts = base + hour * 3_600_000;
        for _ in 0..likes {
            append_event(&stack.log, &event_at("like_given", "u1", Some("p1"), ts)).await;
        }
    }
    stack.aggregator.run_batch(100).await.unwrap();

    let series = stack
        .queries
        .time_series(
            SCOPE,
            "engagement.likes",
            base,
            base + 3 * 3_600_000,
            Period::Hourly,
        )
        .await
        .unwrap();
    assert_eq!(series.len(), 3);
    assert!(series.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    assert_eq!(values, vec![1.0, 3.0, 2.0]);

    let empty = stack
        .queries
        .time_series(SCOPE, "engagement.likes", 0, 1_000, Period::Hourly)
        .await
        .unwrap();
    assert!(empty.is_empty());

    let err = stack
        .queries
        .time_series(SCOPE, "engagement.nonsense", 0, 1_000, Period::Hourly)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let comparison = stack
        .queries
        .compare_scopes(
            &[SCOPE.to_string(), "college-b".to_string()],
            "engagement.likes",
            Period::Hourly,
            base,
            base + 3 * 3_600_000,
        )
        .await
        .unwrap();
    assert_eq!(comparison[0].total, 6.0);
    assert_eq!(comparison[1].total, 0.0);
    assert_eq!(comparison[1].points, 0);
}

#[tokio::test]
async fn leaderboard_breaks_ties_by_smaller_user_id() {
    let stack = stack();
    for user in ["u-beta", "u-alpha"] {
        for _ in 0..2 {
            stack.ingest.ingest(input("login", user, None)).await.unwrap();
        }
    }
    stack.aggregator.run_batch(100).await.unwrap();

    let leaderboard = stack
        .queries
        .leaderboard(SCOPE, Period::Daily, 10)
        .await
        .unwrap();
    assert_eq!(leaderboard.len(), 2);
    assert_eq!(leaderboard[0].overall_score, leaderboard[1].overall_score);
    assert_eq!(leaderboard[0].user_id, "u-alpha");
    assert_eq!(leaderboard[0].rank, 1);
    assert_eq!(leaderboard[1].rank, 2);
}

#[tokio::test]
async fn target_metadata_feeds_received_counters_through_the_pipeline() {
    let stack = stack();
    let mut liked = input("like_given", "u1", Some("p1"));
    liked.metadata = Some(HashMap::from([(
        "target_user_id".to_string(),
        serde_json::Value::String("u2".to_string()),
    )]));
    stack.ingest.ingest(liked).await.unwrap();
    stack.aggregator.run_batch(100).await.unwrap();

    let bucket = Period::Daily.bucket_start_ms(now_ms());
    let target = stack
        .users
        .get("u2", Period::Daily, bucket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(target.activity.likes_received, 1);
    assert!(target.finalized);
    // quality rewards likes on few posts
    assert_eq!(target.scores.quality, 100.0);
}
