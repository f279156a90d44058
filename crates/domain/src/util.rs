use std::time::{SystemTime, UNIX_EPOCH};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    let fallback = OffsetDateTime::from_unix_timestamp(0).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let value =
        OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000).unwrap_or(fallback);
    value
        .format(&Rfc3339)
        .unwrap_or("1970-01-01T00:00:00Z".to_string())
}

pub fn backoff_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay = base_ms.saturating_mul(pow);
    delay.min(max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ms_returns_zero_for_zero_attempt() {
        assert_eq!(backoff_ms(1_000, 0, 60_000), 0);
    }

    #[test]
    fn backoff_ms_grows_geometrically() {
        assert_eq!(backoff_ms(1_000, 1, 60_000), 1_000);
        assert_eq!(backoff_ms(1_000, 2, 60_000), 2_000);
        assert_eq!(backoff_ms(1_000, 3, 60_000), 4_000);
    }

    #[test]
    fn backoff_ms_caps_at_maximum() {
        assert_eq!(backoff_ms(1_000, 10, 3_000), 3_000);
    }

    #[test]
    fn event_ids_have_no_dashes() {
        let id = uuid_v7_without_dashes();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }
}
