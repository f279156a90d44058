mod observability;

use std::sync::Arc;
use std::time::{Duration, Instant};

use pulse_domain::aggregator::{AggregatorConfig, RollupAggregator};
use pulse_domain::ports::event_log::EventLog;
use pulse_domain::ports::notify::Notifier;
use pulse_domain::ports::rollups::RollupRepository;
use pulse_domain::ports::users::UserRecordRepository;
use pulse_domain::rollup::{DAY_MS, InMemoryRollupRepository, Period};
use pulse_domain::scoring::InMemoryUserRecordRepository;
use pulse_domain::util::{backoff_ms, now_ms};
use pulse_infra::config::AppConfig;
use pulse_infra::db::{DbConfig, SurrealAdapter};
use pulse_infra::event_log::RedisEventLog;
use pulse_infra::logging::init_tracing;
use pulse_infra::notify::TracingNotifier;
use pulse_infra::repositories::{
    SurrealRollupRepository, SurrealUserRecordRepository, connect_surreal,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let log: Arc<dyn EventLog> = Arc::new(
        RedisEventLog::connect_with_stream(&config.redis_url, &config.stream_key).await?,
    );
    let (rollups, users) = build_repositories(&config).await?;
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier::new());

    let aggregator = RollupAggregator::new(
        log.clone(),
        rollups.clone(),
        users.clone(),
        notifier,
        AggregatorConfig {
            churn_alert_threshold: config.churn_alert_threshold,
            ..AggregatorConfig::default()
        },
    );

    info!(
        backend = %config.data_backend,
        batch_size = config.worker_batch_size,
        "aggregation worker starting"
    );
    run_loop(&config, &aggregator, log, rollups, users).await;
    info!("aggregation worker shutdown");

    Ok(())
}

async fn build_repositories(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn RollupRepository>, Arc<dyn UserRecordRepository>)> {
    if config.data_backend.eq_ignore_ascii_case("surreal") {
        let db_config = DbConfig::from_app_config(config);
        SurrealAdapter::new(db_config.clone()).health_check().await?;
        let client = connect_surreal(&db_config).await?;
        Ok((
            Arc::new(SurrealRollupRepository::with_client(client.clone())),
            Arc::new(SurrealUserRecordRepository::with_client(client)),
        ))
    } else {
        warn!("memory backend selected; rollups will not survive a restart");
        Ok((
            Arc::new(InMemoryRollupRepository::new()),
            Arc::new(InMemoryUserRecordRepository::new()),
        ))
    }
}

async fn run_loop(
    config: &AppConfig,
    aggregator: &RollupAggregator,
    log: Arc<dyn EventLog>,
    rollups: Arc<dyn RollupRepository>,
    users: Arc<dyn UserRecordRepository>,
) {
    let mut poll = tokio::time::interval(Duration::from_millis(config.worker_poll_interval_ms));
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;
    let mut last_cleanup_ms = now_ms();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = poll.tick() => {
                let started = Instant::now();
                match aggregator.run_batch(config.worker_batch_size).await {
                    Ok(outcome) => {
                        consecutive_failures = 0;
                        let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;
                        let result = if outcome.processed > 0 { "ok" } else { "empty" };
                        observability::register_batch(
                            result,
                            outcome.processed,
                            outcome.skipped,
                            duration_ms,
                        );
                        if outcome.processed > 0 {
                            info!(
                                processed = outcome.processed,
                                skipped = outcome.skipped,
                                "batch aggregated"
                            );
                        }
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        observability::register_batch("error", 0, 0, 0.0);
                        let delay = backoff_ms(
                            config.worker_backoff_base_ms,
                            consecutive_failures,
                            config.worker_backoff_max_ms,
                        );
                        error!(error = %err, retry_in_ms = delay, "batch failed");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }

                match log.pending().await {
                    Ok(pending) => observability::set_stream_pending(pending),
                    Err(err) => warn!(error = %err, "stream depth probe failed"),
                }

                let now = now_ms();
                if now - last_cleanup_ms >= config.worker_cleanup_interval_ms as i64 {
                    last_cleanup_ms = now;
                    run_cleanup(config, &rollups, &users, now).await;
                }
            }
        }
    }
}

async fn run_cleanup(
    config: &AppConfig,
    rollups: &Arc<dyn RollupRepository>,
    users: &Arc<dyn UserRecordRepository>,
    now_ms: i64,
) {
    let hourly_cutoff = now_ms - config.retention_hourly_days * DAY_MS;
    let standard_cutoff = now_ms - config.retention_days * DAY_MS;

    match rollups.prune_before(Period::Hourly, hourly_cutoff).await {
        Ok(removed) if removed > 0 => {
            observability::register_pruned("rollup_hourly", removed);
            info!(removed, "pruned expired hourly rollups");
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "hourly rollup cleanup failed"),
    }
    match rollups.prune_before(Period::Daily, standard_cutoff).await {
        Ok(removed) if removed > 0 => {
            observability::register_pruned("rollup_daily", removed);
            info!(removed, "pruned expired daily rollups");
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "daily rollup cleanup failed"),
    }
    match users.prune_before(Period::Daily, standard_cutoff).await {
        Ok(removed) if removed > 0 => {
            observability::register_pruned("user_daily", removed);
            info!(removed, "pruned expired user records");
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "user record cleanup failed"),
    }
}

#[cfg(test)]
mod tests;
