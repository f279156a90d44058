use pulse_domain::ports::BoxFuture;
use pulse_domain::ports::event_log::{EventLog, EventLogError, LogEntry};
use redis::aio::ConnectionManager;

const DEFAULT_STREAM_KEY: &str = "pulse:events";

/// Event log on a Redis stream, consumer-group-less: a single logical
/// consumer reads from the oldest retained entry and deletes entries on
/// ack, so "unacked" and "retained" coincide.
#[derive(Clone)]
pub struct RedisEventLog {
    manager: ConnectionManager,
    stream_key: String,
}

impl RedisEventLog {
    pub async fn connect(redis_url: &str) -> Result<Self, EventLogError> {
        Self::connect_with_stream(redis_url, DEFAULT_STREAM_KEY).await
    }

    pub async fn connect_with_stream(
        redis_url: &str,
        stream_key: impl Into<String>,
    ) -> Result<Self, EventLogError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| EventLogError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| EventLogError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            stream_key: stream_key.into(),
        })
    }
}

impl EventLog for RedisEventLog {
    fn append(&self, fields: &[(String, String)]) -> BoxFuture<'_, Result<String, EventLogError>> {
        let stream_key = self.stream_key.clone();
        let fields = fields.to_vec();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut cmd = redis::cmd("XADD");
            cmd.arg(&stream_key).arg("*");
            for (key, value) in &fields {
                cmd.arg(key).arg(value);
            }
            let entry_id: String = cmd
                .query_async(&mut conn)
                .await
                .map_err(|err| EventLogError::Operation(err.to_string()))?;
            Ok(entry_id)
        })
    }

    fn read_from(
        &self,
        after_id: Option<&str>,
        max: usize,
    ) -> BoxFuture<'_, Result<Vec<LogEntry>, EventLogError>> {
        let stream_key = self.stream_key.clone();
        // "(" prefixes an exclusive range bound
        let start = after_id
            .map(|id| format!("({id}"))
            .unwrap_or_else(|| "-".to_string());
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let raw: Vec<(String, Vec<(String, String)>)> = redis::cmd("XRANGE")
                .arg(&stream_key)
                .arg(&start)
                .arg("+")
                .arg("COUNT")
                .arg(max as i64)
                .query_async(&mut conn)
                .await
                .map_err(|err| EventLogError::Operation(err.to_string()))?;
            Ok(raw
                .into_iter()
                .map(|(entry_id, fields)| LogEntry { entry_id, fields })
                .collect())
        })
    }

    fn ack(&self, entry_id: &str) -> BoxFuture<'_, Result<(), EventLogError>> {
        let stream_key = self.stream_key.clone();
        let entry_id = entry_id.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: i64 = redis::cmd("XDEL")
                .arg(&stream_key)
                .arg(&entry_id)
                .query_async(&mut conn)
                .await
                .map_err(|err| EventLogError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn pending(&self) -> BoxFuture<'_, Result<u64, EventLogError>> {
        let stream_key = self.stream_key.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let length: u64 = redis::cmd("XLEN")
                .arg(&stream_key)
                .query_async(&mut conn)
                .await
                .map_err(|err| EventLogError::Operation(err.to_string()))?;
            Ok(length)
        })
    }
}
