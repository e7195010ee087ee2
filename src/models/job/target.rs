//! Defines the terminal state a finishing job is headed for.

use std::fmt;
use std::str::FromStr;

use redis::{self, FromRedisValue, ToRedisArgs};
use serde_derive::{Deserialize, Serialize};

use super::Field;
use crate::models::Event;

const COMPLETED_TARGET: &str = "completed";
const FAILED_TARGET: &str = "failed";

/// Terminal state of a finishing job: the completed set or the failed set.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Completed,
    Failed,
}

impl Target {
    /// Job hash field the finish result is written to.
    pub fn result_field(&self) -> Field {
        match self {
            Target::Completed => Field::ReturnValue,
            Target::Failed => Field::FailedReason,
        }
    }

    /// Event appended to the stream when a job lands in this target.
    pub fn event(&self) -> Event {
        match self {
            Target::Completed => Event::Completed,
            Target::Failed => Event::Failed,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl AsRef<str> for Target {
    fn as_ref(&self) -> &str {
        match self {
            Target::Completed => COMPLETED_TARGET,
            Target::Failed => FAILED_TARGET,
        }
    }
}

impl FromStr for Target {
    type Err = ();

    fn from_str(s: &str) -> Result<Target, ()> {
        match s {
            COMPLETED_TARGET => Ok(Target::Completed),
            FAILED_TARGET => Ok(Target::Failed),
            _ => Err(()),
        }
    }
}

impl ToRedisArgs for Target {
    fn write_redis_args<W: ?Sized + redis::RedisWrite>(&self, out: &mut W) {
        self.as_ref().write_redis_args(out)
    }
}

impl FromRedisValue for Target {
    fn from_redis_value(v: &redis::Value) -> redis::RedisResult<Self> {
        let s = String::from_redis_value(v)?;
        Target::from_str(&s).map_err(|_| (redis::ErrorKind::TypeError, "Invalid target").into())
    }
}
