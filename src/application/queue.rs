//! Defines queue-wide reads and the scheduler pieces shared by the
//! state-transition procedures.

use std::collections::HashMap;

use redis::{aio::ConnectionLike, AsyncCommands, Pipeline};

use super::events::{self, EventEmitter};
use super::keys::{self, QueueKeys};
use crate::models::queue::{self, RateLimit};
use crate::models::{job, Duration, PushSide, Timestamp, UcaResult};
use crate::redis_utils::vec_from_redis_pipe;

/// Upper bound on delayed jobs promoted within a single procedure.
pub const PROMOTE_BATCH: isize = 1000;

/// Priorities above this are clamped, so packed scores stay inside the exact
/// integer range of a Redis double.
pub const MAX_PRIORITY: u64 = 1 << 20;

/// Pack a priority and a counter value into a priority-set score. Lower
/// priorities sort first; the monotonic counter breaks ties in insertion
/// order.
pub fn priority_score(priority: u64, counter: u64) -> u64 {
    (priority.min(MAX_PRIORITY) << 32) | (counter & 0xffff_ffff)
}

/// Point-in-time view of the queue's meta hash.
#[derive(Clone, Debug)]
pub struct MetaSnapshot {
    pub paused: bool,
    pub concurrency: Option<u64>,
    pub max_events: u64,
}

impl MetaSnapshot {
    /// Whether workers must not be handed new jobs: the queue is paused, or
    /// the active list has reached the concurrency cap.
    pub fn paused_or_maxed(&self, active_len: u64) -> bool {
        self.paused || self.concurrency.map_or(false, |cap| active_len >= cap)
    }
}

/// Allocates consecutive values of the queue's monotonic priority counter.
///
/// The counter is read once inside the watch window; `flush_in_pipe` queues a
/// single `INCRBY`, so the allocation commits together with the scores that
/// use it.
pub struct CounterAlloc {
    base: u64,
    used: u64,
}

impl CounterAlloc {
    pub async fn read<C: ConnectionLike + Send>(conn: &mut C, counter_key: &str) -> UcaResult<Self> {
        let base: u64 = conn.get::<_, Option<u64>>(counter_key).await?.unwrap_or(0);
        Ok(Self { base, used: 0 })
    }

    pub fn next(&mut self) -> u64 {
        self.used += 1;
        self.base + self.used
    }

    pub fn flush_in_pipe(&self, pipe: &mut Pipeline, counter_key: &str) {
        if self.used > 0 {
            pipe.incr(counter_key, self.used).ignore();
        }
    }
}

/// A delayed job due for promotion, with its landing spot precomputed.
#[derive(Debug)]
pub struct Promotion {
    pub id: String,
    pub priority: u64,
    /// Packed priority-set score; only meaningful when `priority > 0`.
    pub score: u64,
}

/// Where the next-job candidate is popped from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CandidateSource {
    Wait,
    Prioritized,
}

/// Next job selected for a worker, before the claim is queued.
#[derive(Debug)]
pub struct NextCandidate {
    pub id: String,
    pub source: CandidateSource,
}

/// Interface to one queue's shared structures within a procedure.
pub struct QueueOps<'a> {
    pub keys: &'a QueueKeys,
}

impl<'a> QueueOps<'a> {
    pub fn new(keys: &'a QueueKeys) -> Self {
        Self { keys }
    }

    /// Read the queue's meta hash.
    pub async fn meta<C: ConnectionLike + Send>(&self, conn: &mut C) -> UcaResult<MetaSnapshot> {
        let (paused, concurrency, max_events): (Option<String>, Option<u64>, Option<u64>) = conn
            .hget(
                &self.keys.meta,
                &[
                    queue::Field::Paused,
                    queue::Field::Concurrency,
                    queue::Field::MaxEvents,
                ],
            )
            .await?;
        Ok(MetaSnapshot {
            paused: paused.is_some(),
            concurrency,
            max_events: max_events.unwrap_or(queue::DEFAULT_MAX_EVENTS_LEN),
        })
    }

    /// Read the delayed jobs due at `now`, oldest first, and assign each its
    /// landing spot. Counters are allocated here so the computed scores match
    /// the queued `INCRBY`.
    pub async fn plan_promotions<C: ConnectionLike + Send>(
        &self,
        conn: &mut C,
        now: Timestamp,
        alloc: &mut CounterAlloc,
    ) -> UcaResult<Vec<Promotion>> {
        let due: Vec<String> = conn
            .zrangebyscore_limit(
                &self.keys.delayed,
                "-inf",
                format!("({}", now.as_millis()),
                0,
                PROMOTE_BATCH,
            )
            .await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let mut read = redis::pipe();
        for id in &due {
            read.hget(self.keys.job(id), job::Field::Priority);
        }
        let priorities: Vec<Option<u64>> = vec_from_redis_pipe(conn, &read).await?;

        Ok(due
            .into_iter()
            .zip(priorities)
            .map(|(id, priority)| {
                let priority = priority.unwrap_or(0);
                let score = if priority > 0 {
                    priority_score(priority, alloc.next())
                } else {
                    0
                };
                Promotion { id, priority, score }
            })
            .collect())
    }

    /// Queue the planned promotions: out of the delayed set, into the wait
    /// list or priority set, one `waiting` event each, and the wake marker
    /// when workers may act on the new work.
    pub fn queue_promotions_in_pipe(
        &self,
        pipe: &mut Pipeline,
        emitter: &EventEmitter,
        promotions: &[Promotion],
        paused_or_maxed: bool,
        now: Timestamp,
    ) {
        for promotion in promotions {
            pipe.zrem(&self.keys.delayed, &promotion.id).ignore();
            if promotion.priority == 0 {
                pipe.lpush(&self.keys.wait, &promotion.id).ignore();
            } else {
                pipe.zadd(&self.keys.prioritized, &promotion.id, promotion.score)
                    .ignore();
            }
            emitter.waiting(pipe, &promotion.id, events::PREV_DELAYED);
        }

        if !promotions.is_empty() && !paused_or_maxed {
            pipe.set(&self.keys.marker, now.as_millis()).ignore();
        }
    }

    /// Queue insertion of a ready job into the wait list or priority set,
    /// with the wake marker when workers may pick it up.
    pub fn push_ready_in_pipe(
        &self,
        pipe: &mut Pipeline,
        job_id: &str,
        priority: u64,
        side: PushSide,
        alloc: &mut CounterAlloc,
        paused_or_maxed: bool,
        now: Timestamp,
    ) {
        if priority == 0 {
            match side {
                PushSide::Front => pipe.lpush(&self.keys.wait, job_id).ignore(),
                PushSide::Back => pipe.rpush(&self.keys.wait, job_id).ignore(),
            };
        } else {
            pipe.zadd(
                &self.keys.prioritized,
                job_id,
                priority_score(priority, alloc.next()),
            )
            .ignore();
        }

        if !paused_or_maxed {
            pipe.set(&self.keys.marker, now.as_millis()).ignore();
        }
    }

    /// Remaining window of a saturated rate limiter, in milliseconds; 0 when
    /// the limiter has capacity.
    pub async fn rate_limit_ttl<C: ConnectionLike + Send>(
        &self,
        conn: &mut C,
        limiter: &RateLimit,
    ) -> UcaResult<u64> {
        let used: u64 = conn
            .get::<_, Option<u64>>(&self.keys.limiter)
            .await?
            .unwrap_or(0);
        if used >= limiter.max {
            let ttl: i64 = conn.pttl(&self.keys.limiter).await?;
            if ttl > 0 {
                return Ok(ttl as u64);
            }
        }
        Ok(0)
    }

    /// Select the next job for a worker: wait list first, then the lowest
    /// score in the priority set. Insertions queued by this same procedure
    /// (promoted delayed jobs, a re-activated parent) are considered even
    /// though they have not committed yet and are invisible to reads.
    pub async fn next_candidate<C: ConnectionLike + Send>(
        &self,
        conn: &mut C,
        promotions: &[Promotion],
        reactivated: Option<&Promotion>,
    ) -> UcaResult<Option<NextCandidate>> {
        let tail: Vec<String> = conn.lrange(&self.keys.wait, -1, -1).await?;
        if let Some(id) = tail.into_iter().next() {
            return Ok(Some(NextCandidate { id, source: CandidateSource::Wait }));
        }
        // with an empty wait list, the queued RPOPLPUSH pops whatever this
        // procedure pushes first: the re-activated parent is queued ahead of
        // the promotions
        if let Some(parent) = reactivated.filter(|r| r.priority == 0) {
            return Ok(Some(NextCandidate {
                id: parent.id.clone(),
                source: CandidateSource::Wait,
            }));
        }
        if let Some(promotion) = promotions.iter().find(|p| p.priority == 0) {
            return Ok(Some(NextCandidate {
                id: promotion.id.clone(),
                source: CandidateSource::Wait,
            }));
        }

        let head: Vec<(String, u64)> = conn
            .zrange_withscores(&self.keys.prioritized, 0, 0)
            .await?;
        let pending = promotions
            .iter()
            .chain(reactivated)
            .filter(|p| p.priority > 0)
            .min_by_key(|p| p.score);

        let best = match (head.into_iter().next(), pending) {
            (Some((_, score)), Some(p)) if p.score < score => Some(p.id.clone()),
            (Some((id, _)), _) => Some(id),
            (None, Some(p)) => Some(p.id.clone()),
            (None, None) => None,
        };

        Ok(best.map(|id| NextCandidate {
            id,
            source: CandidateSource::Prioritized,
        }))
    }

    /// Queue the claim of a selected job and everything a worker needs to
    /// start on it: the move into the active list, the rate limiter window
    /// increment, `processedOn`, a fresh lock under the caller's token, and
    /// the `active` event. Returns the job's data so the caller can hand it
    /// back without a second round trip.
    pub async fn prepare_job_for_processing<C: ConnectionLike + Send>(
        &self,
        conn: &mut C,
        pipe: &mut Pipeline,
        emitter: &EventEmitter<'_>,
        candidate: &NextCandidate,
        limiter: Option<&RateLimit>,
        lock_duration: &Duration,
        token: &str,
        now: Timestamp,
    ) -> UcaResult<job::Payload> {
        match candidate.source {
            CandidateSource::Wait => {
                pipe.rpoplpush(&self.keys.wait, &self.keys.active).ignore();
            }
            CandidateSource::Prioritized => {
                pipe.zrem(&self.keys.prioritized, &candidate.id).ignore();
                pipe.rpush(&self.keys.active, &candidate.id).ignore();
            }
        }

        if let Some(limiter) = limiter {
            let windowed: bool = conn.exists(&self.keys.limiter).await?;
            pipe.incr(&self.keys.limiter, 1).ignore();
            if !windowed {
                // first increment opens the window
                pipe.pexpire(&self.keys.limiter, limiter.duration.as_millis() as usize)
                    .ignore();
            }
        }

        let job_key = self.keys.job(&candidate.id);
        let data: HashMap<String, String> = conn.hgetall(&job_key).await?;
        pipe.hset(&job_key, job::Field::ProcessedOn, now).ignore();
        pipe.pset_ex(
            keys::lock_key(&job_key),
            token,
            lock_duration.as_millis() as usize,
        )
        .ignore();
        emitter.active(pipe, &candidate.id);

        Ok(job::Payload::new(candidate.id.as_str(), data))
    }

    /// Due time of the next delayed job, skipping the first `skip` entries
    /// (the ones this procedure is already promoting).
    pub async fn next_delayed_timestamp<C: ConnectionLike + Send>(
        &self,
        conn: &mut C,
        skip: usize,
    ) -> UcaResult<Option<i64>> {
        let entries: Vec<(String, i64)> = conn
            .zrange_withscores(&self.keys.delayed, skip as isize, skip as isize)
            .await?;
        Ok(entries.into_iter().next().map(|(_, score)| score))
    }

    /// Whether nothing is waiting, prioritized, or (beyond the finishing job)
    /// active.
    pub async fn is_drained<C: ConnectionLike + Send>(
        &self,
        conn: &mut C,
        active_len_after: u64,
    ) -> UcaResult<bool> {
        if active_len_after > 0 {
            return Ok(false);
        }
        let (wait_len, prioritized_len): (u64, u64) = redis::pipe()
            .llen(&self.keys.wait)
            .zcard(&self.keys.prioritized)
            .query_async(conn)
            .await?;
        Ok(wait_len == 0 && prioritized_len == 0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn score_orders_by_priority_then_counter() {
        // a lower priority value always sorts first
        assert!(priority_score(1, 999) < priority_score(2, 1));
        // equal priorities pop in insertion order
        assert!(priority_score(5, 1) < priority_score(5, 2));
    }

    #[test]
    fn score_clamps_priority() {
        assert_eq!(
            priority_score(u64::max_value(), 7),
            priority_score(MAX_PRIORITY, 7)
        );
    }

    #[test]
    fn paused_or_maxed() {
        let meta = MetaSnapshot { paused: false, concurrency: Some(2), max_events: 100 };
        assert!(!meta.paused_or_maxed(1));
        assert!(meta.paused_or_maxed(2));

        let paused = MetaSnapshot { paused: true, concurrency: None, max_events: 100 };
        assert!(paused.paused_or_maxed(0));

        let unbounded = MetaSnapshot { paused: false, concurrency: None, max_events: 100 };
        assert!(!unbounded.paused_or_maxed(10_000));
    }
}
