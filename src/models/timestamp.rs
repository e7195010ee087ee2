//! Defines custom `Timestamp` type.

use std::fmt;

use chrono::{TimeZone, Utc};
use redis::{self, FromRedisValue, RedisResult, ToRedisArgs};
use serde_derive::Serialize;

use crate::models::Duration;

/// Milliseconds since the Unix epoch.
///
/// This is the clock format used throughout the queue: hash fields such as
/// `finishedOn`/`processedOn`, and the scores of the delayed, completed and
/// failed sets. Stored in Redis as a plain integer.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Get the current UTC time.
    pub fn now() -> Self {
        Timestamp(Utc::now().timestamp_millis())
    }

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Start of the minute this timestamp falls in. Used to bucket metrics
    /// counters.
    pub fn minute_bucket(&self) -> Timestamp {
        Timestamp(self.0 - self.0.rem_euclid(60_000))
    }

    /// Whole minutes between this timestamp's bucket and an earlier bucket.
    pub fn minutes_since(&self, earlier: &Timestamp) -> i64 {
        (self.minute_bucket().0 - earlier.minute_bucket().0) / 60_000
    }

    /// This timestamp moved back by given duration, saturating at zero.
    pub fn minus(&self, duration: &Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(duration.as_millis() as i64))
    }
}

impl FromRedisValue for Timestamp {
    fn from_redis_value(v: &redis::Value) -> RedisResult<Self> {
        let millis: i64 = redis::from_redis_value(v)?;
        Ok(Timestamp(millis))
    }
}

impl ToRedisArgs for Timestamp {
    fn write_redis_args<W: ?Sized + redis::RedisWrite>(&self, out: &mut W) {
        self.0.write_redis_args(out)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match Utc.timestamp_millis_opt(self.0) {
            chrono::LocalResult::Single(dt) => write!(f, "{}", dt.to_rfc3339()),
            _ => write!(f, "{}ms", self.0),
        }
    }
}
