use pulse_domain::ports::BoxFuture;
use pulse_domain::ports::counters::{CounterError, CounterStore};
use redis::aio::ConnectionManager;

const DEFAULT_PREFIX: &str = "pulse:counters";

#[derive(Clone)]
pub struct RedisCounterStore {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CounterError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, CounterError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| CounterError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| CounterError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

impl CounterStore for RedisCounterStore {
    fn increment(&self, key: &str) -> BoxFuture<'_, Result<i64, CounterError>> {
        let key = self.full_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let value: i64 = redis::cmd("INCR")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|err| CounterError::Operation(err.to_string()))?;
            Ok(value)
        })
    }

    fn increment_member(
        &self,
        set_key: &str,
        member: &str,
        delta: f64,
    ) -> BoxFuture<'_, Result<f64, CounterError>> {
        let set_key = self.full_key(set_key);
        let member = member.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let score: f64 = redis::cmd("ZINCRBY")
                .arg(&set_key)
                .arg(delta)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(|err| CounterError::Operation(err.to_string()))?;
            Ok(score)
        })
    }

    fn cardinality(&self, set_key: &str) -> BoxFuture<'_, Result<u64, CounterError>> {
        let set_key = self.full_key(set_key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let count: u64 = redis::cmd("ZCARD")
                .arg(&set_key)
                .query_async(&mut conn)
                .await
                .map_err(|err| CounterError::Operation(err.to_string()))?;
            Ok(count)
        })
    }

    fn range_by_score_desc(
        &self,
        set_key: &str,
        offset: usize,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<(String, f64)>, CounterError>> {
        let set_key = self.full_key(set_key);
        Box::pin(async move {
            if count == 0 {
                return Ok(Vec::new());
            }
            let mut conn = self.manager.clone();
            let members: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
                .arg(&set_key)
                .arg(offset as i64)
                .arg((offset + count - 1) as i64)
                .arg("WITHSCORES")
                .query_async(&mut conn)
                .await
                .map_err(|err| CounterError::Operation(err.to_string()))?;
            Ok(members)
        })
    }
}
