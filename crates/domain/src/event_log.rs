use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::ports::BoxFuture;
use crate::ports::event_log::{EventLog, EventLogError, LogEntry};
use crate::util::now_ms;

/// Entry ids are `millis-seq` pairs, ordered numerically by part. The
/// in-memory log reproduces the scheme so offset guards behave the same
/// against either backend.
pub fn parse_entry_id(entry_id: &str) -> Option<(u64, u64)> {
    let (ms, seq) = entry_id.split_once('-')?;
    Some((ms.parse().ok()?, seq.parse().ok()?))
}

pub fn cmp_entry_ids(a: &str, b: &str) -> Ordering {
    match (parse_entry_id(a), parse_entry_id(b)) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => a.cmp(b),
    }
}

#[derive(Debug, Default)]
struct LogState {
    entries: VecDeque<LogEntry>,
    last_ms: u64,
    last_seq: u64,
}

impl LogState {
    fn next_id(&mut self) -> String {
        let now = now_ms().max(0) as u64;
        if now > self.last_ms {
            self.last_ms = now;
            self.last_seq = 0;
        } else {
            // same millisecond, or a clock that stepped backwards
            self.last_seq += 1;
        }
        format!("{}-{}", self.last_ms, self.last_seq)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    inner: Arc<Mutex<LogState>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("event log lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, fields: &[(String, String)]) -> BoxFuture<'_, Result<String, EventLogError>> {
        let inner = self.inner.clone();
        let fields = fields.to_vec();
        Box::pin(async move {
            let mut guard = inner.lock().expect("event log lock");
            let entry_id = guard.next_id();
            guard.entries.push_back(LogEntry {
                entry_id: entry_id.clone(),
                fields,
            });
            Ok(entry_id)
        })
    }

    fn read_from(
        &self,
        after_id: Option<&str>,
        max: usize,
    ) -> BoxFuture<'_, Result<Vec<LogEntry>, EventLogError>> {
        let inner = self.inner.clone();
        let after_id = after_id.map(str::to_string);
        Box::pin(async move {
            let guard = inner.lock().expect("event log lock");
            let entries = guard
                .entries
                .iter()
                .filter(|entry| match after_id.as_deref() {
                    Some(after) => cmp_entry_ids(&entry.entry_id, after) == Ordering::Greater,
                    None => true,
                })
                .take(max)
                .cloned()
                .collect();
            Ok(entries)
        })
    }

    fn ack(&self, entry_id: &str) -> BoxFuture<'_, Result<(), EventLogError>> {
        let inner = self.inner.clone();
        let entry_id = entry_id.to_string();
        Box::pin(async move {
            let mut guard = inner.lock().expect("event log lock");
            guard.entries.retain(|entry| entry.entry_id != entry_id);
            Ok(())
        })
    }

    fn pending(&self) -> BoxFuture<'_, Result<u64, EventLogError>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner.lock().expect("event log lock").entries.len() as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(value: &str) -> Vec<(String, String)> {
        vec![("event".to_string(), value.to_string())]
    }

    #[tokio::test]
    async fn append_assigns_strictly_increasing_ids() {
        let log = InMemoryEventLog::new();
        let first = log.append(&fields("a")).await.unwrap();
        let second = log.append(&fields("b")).await.unwrap();
        assert_eq!(cmp_entry_ids(&second, &first), Ordering::Greater);
    }

    #[tokio::test]
    async fn read_from_excludes_the_given_id() {
        let log = InMemoryEventLog::new();
        let first = log.append(&fields("a")).await.unwrap();
        log.append(&fields("b")).await.unwrap();
        let rest = log.read_from(Some(&first), 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].fields, fields("b"));
    }

    #[tokio::test]
    async fn ack_removes_the_entry() {
        let log = InMemoryEventLog::new();
        let id = log.append(&fields("a")).await.unwrap();
        log.ack(&id).await.unwrap();
        assert!(log.read_from(None, 10).await.unwrap().is_empty());
        assert_eq!(log.pending().await.unwrap(), 0);
    }

    #[test]
    fn id_ordering_is_numeric_not_lexicographic() {
        assert_eq!(cmp_entry_ids("100-2", "100-10"), Ordering::Less);
        assert_eq!(cmp_entry_ids("99-0", "100-0"), Ordering::Less);
    }
}
