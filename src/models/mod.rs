//! Data structures used throughout the crate.

pub mod job;
pub mod queue;

mod duration;
mod error;
mod event;
mod timestamp;

pub use self::duration::Duration;
pub use self::error::{UcaError, UcaResult};
pub use self::event::Event;
pub use self::timestamp::Timestamp;

use serde_derive::Serialize;

/// Successful outcomes of finishing an active job.
#[derive(Debug, PartialEq)]
pub enum FinishResult {
    /// Job finished; no follow-up work was requested or available.
    Finished,

    /// Job finished and the next ready job was claimed for the caller.
    NextJob(job::Payload),

    /// Job finished, but the rate limiter window is saturated; the caller
    /// should sleep for the remaining milliseconds before asking again.
    RateLimited { ttl_ms: u64 },

    /// Job finished and nothing is ready, but a delayed job is due at the
    /// given epoch-ms time.
    NextDelayed { timestamp_ms: i64 },
}

/// Which end of the wait list a retried job is pushed back onto.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PushSide {
    /// LPUSH: the job is consumed after everything already waiting.
    Front,

    /// RPUSH: the job is consumed next.
    Back,
}

/// Snapshot of one queue's per-state sizes.
#[derive(Debug, Default, Eq, PartialEq, Serialize)]
pub struct QueueDepths {
    pub wait: u64,
    pub active: u64,
    pub prioritized: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueDepths {
    /// True when no job is waiting, running or prioritized.
    pub fn is_drained(&self) -> bool {
        self.wait == 0 && self.active == 0 && self.prioritized == 0
    }
}
