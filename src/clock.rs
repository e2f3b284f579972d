//! Wall-clock access and epoch-millisecond conversions

use chrono::{DateTime, TimeZone, Utc};

/// Source of the current time, injectable so cycles are deterministic in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Milliseconds since the Unix epoch, the unit CloudWatch timestamps use
pub fn to_unix_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Inverse of [`to_unix_millis`]; `None` when out of chrono's range
pub fn from_unix_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
