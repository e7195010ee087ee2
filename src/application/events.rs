//! Appends structured events to a queue's capped stream.
//!
//! Stream append order is the authoritative order of state transitions, so
//! every emission goes through here and is queued into the same atomic
//! pipeline as the transition it describes. The stream is trimmed once per
//! procedure, before any of the procedure's own appends, so a procedure never
//! trims its own emissions.

use redis::{streams::StreamMaxlen, Pipeline};

use crate::models::Event;

/// Payload key carrying the previous state of the job an event is about.
const PREV_KEY: &str = "prev";

/// `prev` value for jobs leaving the active list.
pub const PREV_ACTIVE: &str = "active";

/// `prev` value for jobs promoted out of the delayed set.
pub const PREV_DELAYED: &str = "delayed";

/// `prev` value for jobs re-entering the wait list after a failure.
pub const PREV_FAILED: &str = "failed";

/// `prev` value for jobs leaving the wait list.
pub const PREV_WAITING: &str = "waiting";

/// `prev` value for parents leaving the waiting-children set.
pub const PREV_WAITING_CHILDREN: &str = "waiting-children";

/// Writes one queue's events into atomic pipelines.
pub struct EventEmitter<'a> {
    stream: &'a str,
}

impl<'a> EventEmitter<'a> {
    pub fn new(stream: &'a str) -> Self {
        Self { stream }
    }

    /// Queue the procedure-entry trim. Approximate trimming keeps this cheap;
    /// the cap comes from the queue's meta hash.
    pub fn trim<'b>(&self, pipe: &'b mut Pipeline, max_len: u64) -> &'b mut Pipeline {
        pipe.xtrim(self.stream, StreamMaxlen::Approx(max_len as usize))
            .ignore()
    }

    /// Queue a `completed` event carrying the job's return value.
    pub fn completed<'b>(
        &self,
        pipe: &'b mut Pipeline,
        job_id: &str,
        return_value: &str,
    ) -> &'b mut Pipeline {
        self.emit(pipe, Event::Completed, job_id, &[("returnvalue", return_value)])
    }

    /// Queue a `failed` event carrying the failure reason.
    pub fn failed<'b>(
        &self,
        pipe: &'b mut Pipeline,
        job_id: &str,
        failed_reason: &str,
        prev: &str,
    ) -> &'b mut Pipeline {
        self.emit(pipe, Event::Failed, job_id, &[("failedReason", failed_reason), (PREV_KEY, prev)])
    }

    /// Queue a `retries-exhausted` event; emitted after the final failure.
    pub fn retries_exhausted<'b>(
        &self,
        pipe: &'b mut Pipeline,
        job_id: &str,
        attempts_made: u64,
    ) -> &'b mut Pipeline {
        let attempts = attempts_made.to_string();
        self.emit(pipe, Event::RetriesExhausted, job_id, &[("attemptsMade", attempts.as_str())])
    }

    /// Queue a `waiting` event; `prev` names the state the job came from.
    pub fn waiting<'b>(&self, pipe: &'b mut Pipeline, job_id: &str, prev: &str) -> &'b mut Pipeline {
        self.emit(pipe, Event::Waiting, job_id, &[(PREV_KEY, prev)])
    }

    /// Queue an `active` event for a job handed to a worker.
    pub fn active<'b>(&self, pipe: &'b mut Pipeline, job_id: &str) -> &'b mut Pipeline {
        self.emit(pipe, Event::Active, job_id, &[(PREV_KEY, PREV_WAITING)])
    }

    /// Queue a `drained` event; emitted when wait, active and prioritized are
    /// all empty.
    pub fn drained<'b>(&self, pipe: &'b mut Pipeline) -> &'b mut Pipeline {
        pipe.xadd(self.stream, "*", &[("event", Event::Drained.as_ref())])
            .ignore()
    }

    fn emit<'b>(
        &self,
        pipe: &'b mut Pipeline,
        event: Event,
        job_id: &str,
        extra: &[(&str, &str)],
    ) -> &'b mut Pipeline {
        let mut items: Vec<(&str, &str)> = Vec::with_capacity(2 + extra.len());
        items.push(("event", event.as_ref()));
        items.push(("jobId", job_id));
        items.extend_from_slice(extra);
        pipe.xadd(self.stream, "*", &items).ignore()
    }
}
