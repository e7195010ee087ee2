//! Defines the queue's event stream vocabulary.

use std::fmt;
use std::str::FromStr;

use redis::{self, ToRedisArgs};

const COMPLETED_EVENT: &str = "completed";
const FAILED_EVENT: &str = "failed";
const RETRIES_EXHAUSTED_EVENT: &str = "retries-exhausted";
const WAITING_EVENT: &str = "waiting";
const ACTIVE_EVENT: &str = "active";
const DELAYED_EVENT: &str = "delayed";
const DRAINED_EVENT: &str = "drained";

/// Kind of event appended to a queue's capped event stream.
///
/// Stream append order matches state transition order, so consumers can treat
/// the stream as an authoritative transition log.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Event {
    /// A job reached the completed set.
    Completed,

    /// A job reached the failed set.
    Failed,

    /// A job failed with no attempts remaining.
    RetriesExhausted,

    /// A job became ready to be picked up by a worker.
    Waiting,

    /// A job was handed to a worker.
    Active,

    /// A job was scheduled for a later time.
    Delayed,

    /// Nothing is left in the wait, active or priority sets.
    Drained,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl AsRef<str> for Event {
    fn as_ref(&self) -> &str {
        match self {
            Event::Completed => COMPLETED_EVENT,
            Event::Failed => FAILED_EVENT,
            Event::RetriesExhausted => RETRIES_EXHAUSTED_EVENT,
            Event::Waiting => WAITING_EVENT,
            Event::Active => ACTIVE_EVENT,
            Event::Delayed => DELAYED_EVENT,
            Event::Drained => DRAINED_EVENT,
        }
    }
}

impl FromStr for Event {
    type Err = ();

    fn from_str(s: &str) -> Result<Event, ()> {
        match s {
            COMPLETED_EVENT => Ok(Event::Completed),
            FAILED_EVENT => Ok(Event::Failed),
            RETRIES_EXHAUSTED_EVENT => Ok(Event::RetriesExhausted),
            WAITING_EVENT => Ok(Event::Waiting),
            ACTIVE_EVENT => Ok(Event::Active),
            DELAYED_EVENT => Ok(Event::Delayed),
            DRAINED_EVENT => Ok(Event::Drained),
            _ => Err(()),
        }
    }
}

impl ToRedisArgs for Event {
    fn write_redis_args<W: ?Sized + redis::RedisWrite>(&self, out: &mut W) {
        self.as_ref().write_redis_args(out)
    }
}
