use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log unavailable: {0}")]
    Unavailable(String),
    #[error("event log serialization error: {0}")]
    Serialization(String),
    #[error("event log operation failed: {0}")]
    Operation(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub entry_id: String,
    pub fields: Vec<(String, String)>,
}

/// Append-only durable stream with a single logical consumer. Entries stay
/// in the log until acked; `read_from(None, ..)` returns the oldest unacked
/// entries in id order.
pub trait EventLog: Send + Sync {
    fn append(&self, fields: &[(String, String)]) -> BoxFuture<'_, Result<String, EventLogError>>;
    fn read_from(
        &self,
        after_id: Option<&str>,
        max: usize,
    ) -> BoxFuture<'_, Result<Vec<LogEntry>, EventLogError>>;
    fn ack(&self, entry_id: &str) -> BoxFuture<'_, Result<(), EventLogError>>;
    fn pending(&self) -> BoxFuture<'_, Result<u64, EventLogError>>;
}
