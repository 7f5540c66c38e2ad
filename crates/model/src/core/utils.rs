use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Largest integer a JSON consumer can parse without losing precision.
const JSON_SAFE_INT_MASK: u64 = (1 << 53) - 1;

/// Formats a timestamp the way the API expects in `since_*` filters.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses RFC 3339 timestamps, plus the naive `YYYY-MM-DD HH:MM:SS` and
/// `YYYY-MM-DD` forms (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Stable numeric fingerprint of a JSON document.
///
/// Object keys serialize in sorted order, so equal documents always produce
/// the same value.
pub fn fingerprint(value: &Value) -> u64 {
    let digest = md5::compute(value.to_string());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.0[..8]);
    u64::from_be_bytes(head) & JSON_SAFE_INT_MASK
}
