use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub log_level: String,
    pub redis_url: String,
    pub counter_prefix: String,
    pub stream_key: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub ingest_append_max_attempts: u32,
    pub ingest_backoff_base_ms: u64,
    pub ingest_backoff_max_ms: u64,
    pub worker_poll_interval_ms: u64,
    pub worker_batch_size: usize,
    pub worker_backoff_base_ms: u64,
    pub worker_backoff_max_ms: u64,
    pub worker_cleanup_interval_ms: u64,
    pub retention_hourly_days: i64,
    pub retention_days: i64,
    pub churn_alert_threshold: f64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("log_level", "info")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("counter_prefix", "pulse:counters")?
            .set_default("stream_key", "pulse:events")?
            .set_default("data_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "pulse")?
            .set_default("surreal_db", "analytics")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("ingest_append_max_attempts", 3)?
            .set_default("ingest_backoff_base_ms", 50)?
            .set_default("ingest_backoff_max_ms", 1_000)?
            .set_default("worker_poll_interval_ms", 1_000)?
            .set_default("worker_batch_size", 100)?
            .set_default("worker_backoff_base_ms", 1_000)?
            .set_default("worker_backoff_max_ms", 60_000)?
            .set_default("worker_cleanup_interval_ms", 3_600_000)?
            .set_default("retention_hourly_days", 7)?
            .set_default("retention_days", 365)?
            .set_default("churn_alert_threshold", 70.0)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}
