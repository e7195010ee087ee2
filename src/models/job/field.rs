use std::fmt;
use std::str::FromStr;

use redis::{self, FromRedisValue, ToRedisArgs};
use serde_derive::Serialize;

const NAME_FIELD: &str = "name";
const DATA_FIELD: &str = "data";
const TIMESTAMP_FIELD: &str = "timestamp";
const PARENT_KEY_FIELD: &str = "parentKey";
const PARENT_FIELD: &str = "parent";
const DEBOUNCE_ID_FIELD: &str = "deid";
const ATTEMPTS_MADE_FIELD: &str = "atm";
const PRIORITY_FIELD: &str = "priority";
const RETURN_VALUE_FIELD: &str = "returnvalue";
const FAILED_REASON_FIELD: &str = "failedReason";
const FINISHED_ON_FIELD: &str = "finishedOn";
const PROCESSED_ON_FIELD: &str = "processedOn";

/// Represents a job field that's stored in a Redis hash.
///
/// The string forms are the queue's wire contract; clients read them back
/// directly, so they are never renamed.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Field {
    /// Client-assigned job name, opaque to the queue.
    Name,

    /// Client payload, opaque to the queue.
    Data,

    /// Creation time, set by the producer.
    Timestamp,

    /// Full Redis key of the parent job, if any.
    ParentKey,

    /// Encoded parent descriptor, see `ParentData`.
    Parent,

    /// Debounce id this job was enqueued under, if any.
    DebounceId,

    /// Number of finish/retry attempts made so far.
    AttemptsMade,

    /// Scheduling priority; 0 means plain FIFO via the wait list.
    Priority,

    /// Result recorded when the job completes.
    ReturnValue,

    /// Reason recorded when the job fails.
    FailedReason,

    /// Time the job reached a terminal state.
    FinishedOn,

    /// Time the job was last handed to a worker.
    ProcessedOn,
}

impl Field {
    pub fn all_fields() -> &'static [Field] {
        static ALL_FIELDS: [Field; 12] = [
            Field::Name,
            Field::Data,
            Field::Timestamp,
            Field::ParentKey,
            Field::Parent,
            Field::DebounceId,
            Field::AttemptsMade,
            Field::Priority,
            Field::ReturnValue,
            Field::FailedReason,
            Field::FinishedOn,
            Field::ProcessedOn,
        ];

        &ALL_FIELDS
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl AsRef<str> for Field {
    fn as_ref(&self) -> &str {
        match self {
            Field::Name => NAME_FIELD,
            Field::Data => DATA_FIELD,
            Field::Timestamp => TIMESTAMP_FIELD,
            Field::ParentKey => PARENT_KEY_FIELD,
            Field::Parent => PARENT_FIELD,
            Field::DebounceId => DEBOUNCE_ID_FIELD,
            Field::AttemptsMade => ATTEMPTS_MADE_FIELD,
            Field::Priority => PRIORITY_FIELD,
            Field::ReturnValue => RETURN_VALUE_FIELD,
            Field::FailedReason => FAILED_REASON_FIELD,
            Field::FinishedOn => FINISHED_ON_FIELD,
            Field::ProcessedOn => PROCESSED_ON_FIELD,
        }
    }
}

impl FromStr for Field {
    type Err = ();

    fn from_str(s: &str) -> Result<Field, ()> {
        match s {
            NAME_FIELD => Ok(Field::Name),
            DATA_FIELD => Ok(Field::Data),
            TIMESTAMP_FIELD => Ok(Field::Timestamp),
            PARENT_KEY_FIELD => Ok(Field::ParentKey),
            PARENT_FIELD => Ok(Field::Parent),
            DEBOUNCE_ID_FIELD => Ok(Field::DebounceId),
            ATTEMPTS_MADE_FIELD => Ok(Field::AttemptsMade),
            PRIORITY_FIELD => Ok(Field::Priority),
            RETURN_VALUE_FIELD => Ok(Field::ReturnValue),
            FAILED_REASON_FIELD => Ok(Field::FailedReason),
            FINISHED_ON_FIELD => Ok(Field::FinishedOn),
            PROCESSED_ON_FIELD => Ok(Field::ProcessedOn),
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
        Field::from_str(&s).map_err(|_| (redis::ErrorKind::TypeError, "Invalid job field").into())
    }
}
