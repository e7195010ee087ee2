use std::fmt;
use std::str::FromStr;

use redis::{self, FromRedisValue, ToRedisArgs};
use serde_derive::Serialize;

const PAUSED_FIELD: &str = "paused";
const CONCURRENCY_FIELD: &str = "concurrency";
const MAX_EVENTS_FIELD: &str = "opts.maxLenEvents";

/// Represents a queue-wide setting stored in the queue's meta hash.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Field {
    /// Present and truthy when the queue is paused.
    Paused,

    /// Maximum number of jobs allowed in the active list.
    Concurrency,

    /// Approximate cap on the event stream's length.
    MaxEvents,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl AsRef<str> for Field {
    fn as_ref(&self) -> &str {
        match self {
            Field::Paused => PAUSED_FIELD,
            Field::Concurrency => CONCURRENCY_FIELD,
            Field::MaxEvents => MAX_EVENTS_FIELD,
        }
    }
}

impl FromStr for Field {
    type Err = ();

    fn from_str(s: &str) -> Result<Field, ()> {
        match s {
            PAUSED_FIELD => Ok(Field::Paused),
            CONCURRENCY_FIELD => Ok(Field::Concurrency),
            MAX_EVENTS_FIELD => Ok(Field::MaxEvents),
            _ => Err(()),
        }
    }
}

impl ToRedisArgs for Field {
    fn write_redis_args<W: ?Sized + redis::RedisWrite>(&self, out: &mut W) {
        self.as_ref().write_redis_args(out)
    }
}

impl FromRedisValue for Field {
    fn from_redis_value(v: &redis::Value) -> redis::RedisResult<Self> {
        let s: String = String::from_redis_value(v)?;
        Field::from_str(&s).map_err(|_| (redis::ErrorKind::TypeError, "Invalid meta field").into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn field_to_from_str() {
        let all_fields = [Field::Paused, Field::Concurrency, Field::MaxEvents];
        for field in &all_fields {
            assert_eq!(field, &Field::from_str(field.as_ref()).unwrap());
        }
    }
}
