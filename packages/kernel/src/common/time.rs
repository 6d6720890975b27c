//! Timestamp conversion between the domain (`DateTime<Utc>`) and the store
//! (INTEGER unix milliseconds).
//!
//! Persisting milliseconds keeps every SQL comparison numeric; ISO-8601 only
//! appears at the API boundary via serde.

use chrono::{DateTime, Utc};

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn opt_to_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(to_millis)
}

pub fn opt_from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_millis)
}
