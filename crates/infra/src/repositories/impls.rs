use std::sync::Arc;

use pulse_domain::DomainResult;
use pulse_domain::error::DomainError;
use pulse_domain::ports::BoxFuture;
use pulse_domain::ports::rankables::RankableRepository;
use pulse_domain::ports::rollups::RollupRepository;
use pulse_domain::ports::users::UserRecordRepository;
use pulse_domain::ranking::RankableEntity;
use pulse_domain::rollup::{Period, ScopePeriodRollup};
use pulse_domain::scoring::UserPeriodRecord;
use pulse_domain::util::format_ms_rfc3339;
use serde::Deserialize;
use serde_json::Value;
use surrealdb::{
    Surreal,
    engine::remote::ws::{Client, Ws},
    opt::auth::Root,
};

use crate::db::DbConfig;

const ROLLUP_TABLE: &str = "scope_rollup";
const USER_TABLE: &str = "user_period_record";
const RANKABLE_TABLE: &str = "rankable_entity";

pub async fn connect_surreal(db_config: &DbConfig) -> anyhow::Result<Arc<Surreal<Client>>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(&db_config.endpoint).await?;
    db.signin(Root {
        username: db_config.username.as_str(),
        password: db_config.password.as_str(),
    })
    .await?;
    db.use_ns(&db_config.namespace)
        .use_db(&db_config.database)
        .await?;
    Ok(Arc::new(db))
}

fn map_surreal_error(err: surrealdb::Error) -> DomainError {
    let message = err.to_string().to_lowercase();
    if message.contains("already exists")
        || message.contains("duplicate")
        || message.contains("unique")
        || message.contains("conflict")
    {
        return DomainError::Conflict;
    }
    DomainError::Unavailable(format!("surreal query failed: {message}"))
}

#[derive(Debug, Deserialize)]
struct PayloadRow {
    payload: Value,
}

fn decode_payload_rows<T: for<'de> Deserialize<'de>>(rows: Vec<Value>) -> DomainResult<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            let row = serde_json::from_value::<PayloadRow>(row)
                .map_err(|err| DomainError::Validation(format!("invalid row: {err}")))?;
            serde_json::from_value::<T>(row.payload)
                .map_err(|err| DomainError::Validation(format!("invalid payload: {err}")))
        })
        .collect()
}

fn encode_payload<T: serde::Serialize>(value: &T) -> DomainResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| DomainError::Validation(format!("failed to serialize payload: {err}")))
}

async fn count_rows(
    client: &Surreal<Client>,
    query: &str,
    period: Period,
    cutoff_ms: i64,
) -> DomainResult<usize> {
    #[derive(Debug, Deserialize)]
    struct CountRow {
        total: usize,
    }
    let mut response = client
        .query(query)
        .bind(("period", period.as_str().to_string()))
        .bind(("cutoff_ms", cutoff_ms))
        .await
        .map_err(map_surreal_error)?;
    let rows: Vec<Value> = response
        .take(0)
        .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
    Ok(rows
        .into_iter()
        .next()
        .and_then(|row| serde_json::from_value::<CountRow>(row).ok())
        .map(|row| row.total)
        .unwrap_or(0))
}

pub struct SurrealRollupRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealRollupRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    fn record_key(scope_id: &str, period: Period, bucket_start_ms: i64) -> String {
        format!("{scope_id}:{}:{bucket_start_ms}", period.as_str())
    }
}

impl RollupRepository for SurrealRollupRepository {
    fn get(
        &self,
        scope_id: &str,
        period: Period,
        bucket_start_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<ScopePeriodRollup>>> {
        let id = Self::record_key(scope_id, period, bucket_start_ms);
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT payload FROM type::thing('{ROLLUP_TABLE}', $id)"
                ))
                .bind(("id", id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            let mut rollups = decode_payload_rows::<ScopePeriodRollup>(rows)?;
            Ok(rollups.pop())
        })
    }

    fn create(&self, rollup: &ScopePeriodRollup) -> BoxFuture<'_, DomainResult<()>> {
        let id = Self::record_key(&rollup.scope_id, rollup.period, rollup.bucket_start_ms);
        let payload = match encode_payload(rollup) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let scope_id = rollup.scope_id.clone();
        let period = rollup.period.as_str().to_string();
        let bucket_start_ms = rollup.bucket_start_ms;
        let updated_at = format_ms_rfc3339(rollup.updated_at_ms);
        let client = self.client.clone();
        Box::pin(async move {
            client
                .query(format!(
                    "CREATE type::thing('{ROLLUP_TABLE}', $id) SET \
                        scope_id = $scope_id, \
                        period = $period, \
                        bucket_start_ms = $bucket_start_ms, \
                        payload = $payload, \
                        updated_at = <datetime>$updated_at"
                ))
                .bind(("id", id))
                .bind(("scope_id", scope_id))
                .bind(("period", period))
                .bind(("bucket_start_ms", bucket_start_ms))
                .bind(("payload", payload))
                .bind(("updated_at", updated_at))
                .await
                .map_err(map_surreal_error)?
                .check()
                .map_err(map_surreal_error)?;
            Ok(())
        })
    }

    fn update(&self, rollup: &ScopePeriodRollup) -> BoxFuture<'_, DomainResult<()>> {
        let id = Self::record_key(&rollup.scope_id, rollup.period, rollup.bucket_start_ms);
        let payload = match encode_payload(rollup) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let updated_at = format_ms_rfc3339(rollup.updated_at_ms);
        let client = self.client.clone();
        Box::pin(async move {
            client
                .query(format!(
                    "UPDATE type::thing('{ROLLUP_TABLE}', $id) SET \
                        payload = $payload, \
                        updated_at = <datetime>$updated_at"
                ))
                .bind(("id", id))
                .bind(("payload", payload))
                .bind(("updated_at", updated_at))
                .await
                .map_err(map_surreal_error)?
                .check()
                .map_err(map_surreal_error)?;
            Ok(())
        })
    }

    fn list_range(
        &self,
        scope_id: &str,
        period: Period,
        start_ms: i64,
        end_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Vec<ScopePeriodRollup>>> {
        let scope_id = scope_id.to_string();
        let period = period.as_str().to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT payload FROM {ROLLUP_TABLE} \
                     WHERE scope_id = $scope_id AND period = $period \
                       AND bucket_start_ms >= $start_ms AND bucket_start_ms <= $end_ms \
                     ORDER BY bucket_start_ms ASC"
                ))
                .bind(("scope_id", scope_id))
                .bind(("period", period))
                .bind(("start_ms", start_ms))
                .bind(("end_ms", end_ms))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            decode_payload_rows::<ScopePeriodRollup>(rows)
        })
    }

    fn prune_before(
        &self,
        period: Period,
        cutoff_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>> {
        let client = self.client.clone();
        Box::pin(async move {
            let total = count_rows(
                &client,
                &format!(
                    "SELECT count() AS total FROM {ROLLUP_TABLE} \
                     WHERE period = $period AND bucket_start_ms < $cutoff_ms GROUP ALL"
                ),
                period,
                cutoff_ms,
            )
            .await?;
            client
                .query(format!(
                    "DELETE {ROLLUP_TABLE} WHERE period = $period AND bucket_start_ms < $cutoff_ms"
                ))
                .bind(("period", period.as_str().to_string()))
                .bind(("cutoff_ms", cutoff_ms))
                .await
                .map_err(map_surreal_error)?
                .check()
                .map_err(map_surreal_error)?;
            Ok(total)
        })
    }
}

pub struct SurrealUserRecordRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealUserRecordRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    fn record_key(user_id: &str, period: Period, bucket_start_ms: i64) -> String {
        format!("{user_id}:{}:{bucket_start_ms}", period.as_str())
    }
}

impl UserRecordRepository for SurrealUserRecordRepository {
    fn get(
        &self,
        user_id: &str,
        period: Period,
        bucket_start_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<UserPeriodRecord>>> {
        let id = Self::record_key(user_id, period, bucket_start_ms);
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT payload FROM type::thing('{USER_TABLE}', $id)"
                ))
                .bind(("id", id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            let mut records = decode_payload_rows::<UserPeriodRecord>(rows)?;
            Ok(records.pop())
        })
    }

    fn upsert(&self, record: &UserPeriodRecord) -> BoxFuture<'_, DomainResult<()>> {
        let id = Self::record_key(&record.user_id, record.period, record.bucket_start_ms);
        let payload = match encode_payload(record) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let user_id = record.user_id.clone();
        let scope_id = record.scope_id.clone();
        let period = record.period.as_str().to_string();
        let bucket_start_ms = record.bucket_start_ms;
        let overall_score = record.scores.overall;
        let updated_at = format_ms_rfc3339(record.updated_at_ms);
        let client = self.client.clone();
        Box::pin(async move {
            client
                .query(format!(
                    "UPSERT type::thing('{USER_TABLE}', $id) SET \
                        user_id = $user_id, \
                        scope_id = $scope_id, \
                        period = $period, \
                        bucket_start_ms = $bucket_start_ms, \
                        overall_score = $overall_score, \
                        payload = $payload, \
                        updated_at = <datetime>$updated_at"
                ))
                .bind(("id", id))
                .bind(("user_id", user_id))
                .bind(("scope_id", scope_id))
                .bind(("period", period))
                .bind(("bucket_start_ms", bucket_start_ms))
                .bind(("overall_score", overall_score))
                .bind(("payload", payload))
                .bind(("updated_at", updated_at))
                .await
                .map_err(map_surreal_error)?
                .check()
                .map_err(map_surreal_error)?;
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
        let scope_id = scope_id.to_string();
        let period = period.as_str().to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT payload FROM {USER_TABLE} \
                     WHERE scope_id = $scope_id AND period = $period \
                       AND bucket_start_ms >= $start_ms AND bucket_start_ms <= $end_ms \
                     ORDER BY overall_score DESC LIMIT {limit}"
                ))
                .bind(("scope_id", scope_id))
                .bind(("period", period))
                .bind(("start_ms", start_ms))
                .bind(("end_ms", end_ms))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            decode_payload_rows::<UserPeriodRecord>(rows)
        })
    }

    fn prune_before(
        &self,
        period: Period,
        cutoff_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>> {
        let client = self.client.clone();
        Box::pin(async move {
            let total = count_rows(
                &client,
                &format!(
                    "SELECT count() AS total FROM {USER_TABLE} \
                     WHERE period = $period AND bucket_start_ms < $cutoff_ms GROUP ALL"
                ),
                period,
                cutoff_ms,
            )
            .await?;
            client
                .query(format!(
                    "DELETE {USER_TABLE} WHERE period = $period AND bucket_start_ms < $cutoff_ms"
                ))
                .bind(("period", period.as_str().to_string()))
                .bind(("cutoff_ms", cutoff_ms))
                .await
                .map_err(map_surreal_error)?
                .check()
                .map_err(map_surreal_error)?;
            Ok(total)
        })
    }
}

pub struct SurrealRankableRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealRankableRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }
}

impl RankableRepository for SurrealRankableRepository {
    fn get(&self, entity_id: &str) -> BoxFuture<'_, DomainResult<Option<RankableEntity>>> {
        let id = entity_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT payload FROM type::thing('{RANKABLE_TABLE}', $id)"
                ))
                .bind(("id", id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            let mut entities = decode_payload_rows::<RankableEntity>(rows)?;
            Ok(entities.pop())
        })
    }

    fn put(&self, entity: &RankableEntity) -> BoxFuture<'_, DomainResult<()>> {
        let id = entity.entity_id.clone();
        let payload = match encode_payload(entity) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let scope_id = entity.scope_id.clone();
        let kind = entity.kind.as_str().to_string();
        let hot_score = entity.hot_score;
        let client = self.client.clone();
        Box::pin(async move {
            client
                .query(format!(
                    "UPSERT type::thing('{RANKABLE_TABLE}', $id) SET \
                        entity_id = $id, \
                        scope_id = $scope_id, \
                        kind = $kind, \
                        hot_score = $hot_score, \
                        payload = $payload"
                ))
                .bind(("id", id))
                .bind(("scope_id", scope_id))
                .bind(("kind", kind))
                .bind(("hot_score", hot_score))
                .bind(("payload", payload))
                .await
                .map_err(map_surreal_error)?
                .check()
                .map_err(map_surreal_error)?;
            Ok(())
        })
    }

    fn top_by_hot_score(
        &self,
        scope_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<RankableEntity>>> {
        let scope_id = scope_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT payload FROM {RANKABLE_TABLE} \
                     WHERE scope_id = $scope_id \
                     ORDER BY hot_score DESC LIMIT {limit}"
                ))
                .bind(("scope_id", scope_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Validation(format!("invalid query result: {err}")))?;
            decode_payload_rows::<RankableEntity>(rows)
        })
    }
}
