//! Defines the orchestrating procedures of the queue core.
//!
//! Main struct provided is `QueueManager`, through which the state-transition
//! procedures are exposed. Each procedure runs as one optimistic transaction:
//! the touched keys are watched, every decision is made from reads inside the
//! watch window, every write is queued into a single atomic pipeline, and a
//! conflicting write by anyone else retries the whole procedure. An error
//! return means the pipeline never executed, so no partial effect is ever
//! visible. The one exception is retry's eager delayed-promotion, which is
//! committed even when the retry itself is then rejected.

use log::{debug, info};
use redis::{aio::ConnectionLike, AsyncCommands};

use super::events::{self, EventEmitter};
use super::job::JobRef;
use super::keys::{self, QueueKeys};
use super::metrics::MetricsRecorder;
use super::parent::{self, ParentLink};
use super::queue::{CounterAlloc, QueueOps};
use crate::models::job::{self, Target};
use crate::models::{queue, FinishResult, PushSide, QueueDepths, Timestamp, UcaError, UcaResult};
use crate::transaction_async;

/// Executes the queue's state-transition procedures against Redis. Contains
/// the public entry points a transport layer maps onto.
pub struct QueueManager {}

impl QueueManager {
    /// Move an active job into the completed or failed set (or delete it,
    /// per the retention policy), optionally claiming the next ready job
    /// for the caller in the same atomic unit.
    ///
    /// The caller must still own the job's lock under `opts.token`, and the
    /// job must be in the active list with no pending dependencies.
    pub async fn finish_active_job<C: ConnectionLike + Send>(
        conn: &mut C,
        queue_keys: &QueueKeys,
        job_id: &str,
        target: Target,
        result: &str,
        fetch_next: bool,
        opts: &queue::FinishOpts,
        timestamp: Timestamp,
    ) -> UcaResult<FinishResult> {
        let job_key = queue_keys.job(job_id);
        debug!(
            "[{}] finish requested: target={}, fetch_next={}",
            &job_key, target, fetch_next
        );

        let mut watch: Vec<String> = vec![
            job_key.clone(),
            keys::lock_key(&job_key),
            keys::dependencies_key(&job_key),
            queue_keys.wait.clone(),
            queue_keys.active.clone(),
            queue_keys.prioritized.clone(),
            queue_keys.priority_counter.clone(),
            queue_keys.delayed.clone(),
            queue_keys.completed.clone(),
            queue_keys.failed.clone(),
            queue_keys.stalled.clone(),
            queue_keys.meta.clone(),
            queue_keys.limiter.clone(),
        ];
        watch.extend(parent::ancestor_watch_keys(conn, &job_key, target).await?);

        let outcome: UcaResult<FinishResult> = transaction_async!(conn, &watch, {
            Self::finish_in_transaction(
                conn, queue_keys, job_id, target, result, fetch_next, opts, timestamp,
            )
            .await?
        });

        match &outcome {
            Ok(_) => info!("[{}] {}", &job_key, target),
            Err(err) => debug!("[{}] finish rejected: {}", &job_key, err),
        }
        outcome
    }

    /// One attempt at the finish procedure, inside the watch window.
    /// `Ok(None)` means the watched state changed under us and the caller's
    /// loop retries; the inner result carries the wire-contract errors.
    async fn finish_in_transaction<C: ConnectionLike + Send>(
        conn: &mut C,
        queue_keys: &QueueKeys,
        job_id: &str,
        target: Target,
        result: &str,
        fetch_next: bool,
        opts: &queue::FinishOpts,
        timestamp: Timestamp,
    ) -> UcaResult<Option<UcaResult<FinishResult>>> {
        let job = JobRef::new(queue_keys, job_id);
        let ops = QueueOps::new(queue_keys);
        let emitter = EventEmitter::new(&queue_keys.events);

        if !job.exists(conn).await? {
            return Ok(Some(Err(UcaError::NoSuchJob(job.id))));
        }
        if let Err(err) = job.check_lock(conn, &opts.token).await {
            return Ok(Some(Err(err)));
        }
        let active = match job.check_active(conn).await {
            Ok(active) => active,
            Err(err) => return Ok(Some(Err(err))),
        };
        if let Err(err) = job.check_dependencies(conn).await {
            return Ok(Some(Err(err)));
        }

        let meta = ops.meta(conn).await?;
        let finish_meta = job.finish_meta(conn).await?;
        let attempts_made = finish_meta.attempts_made() + 1;
        let active_len_after = active.len() as u64 - 1;

        let mut pipeline = redis::pipe();
        let pipe = pipeline.atomic();

        emitter.trim(pipe, meta.max_events);
        job.release_lock_in_pipe(pipe);
        job.remove_from_active_in_pipe(pipe);

        // a parent re-activated into this same queue is tracked so the
        // scheduler below can see work that is queued but not yet committed
        let mut reactivated = None;
        if let Some(link) = ParentLink::from_meta(&finish_meta) {
            match target {
                Target::Completed => {
                    let same_queue = link.keys.prefix == queue_keys.prefix;
                    let parent = parent::update_parent_deps_if_needed(
                        conn, pipe, &link, &job.key, result, timestamp,
                    )
                    .await?;
                    if same_queue {
                        reactivated = parent;
                    }
                }
                Target::Failed => {
                    let ancestor = parent::move_parent_if_needed(
                        conn,
                        pipe,
                        link,
                        job.key.clone(),
                        result.to_string(),
                        timestamp,
                    )
                    .await?;
                    if let Some((prefix, parent)) = ancestor {
                        if prefix == queue_keys.prefix {
                            reactivated = Some(parent);
                        }
                    }
                }
            }
        }

        job.remove_debounce_in_pipe(pipe, &finish_meta);

        if opts.keep_jobs.removes_job() {
            job.delete_keys_in_pipe(pipe);
            // a deleted child must not linger as a dangling member of its
            // parent's dependency set
            if let Some(parent_key) = finish_meta.parent_key() {
                pipe.srem(keys::dependencies_key(&parent_key), &job.key).ignore();
            }
        } else {
            let stale = job
                .plan_retention(conn, target, &opts.keep_jobs, timestamp)
                .await?;
            job.finalize_in_pipe(pipe, target, result, timestamp, &stale);
            pipe.hset(&job.key, job::Field::AttemptsMade, attempts_made).ignore();
        }

        match target {
            Target::Completed => emitter.completed(pipe, &job.id, result),
            Target::Failed => emitter.failed(pipe, &job.id, result, events::PREV_ACTIVE),
        };
        if target == Target::Failed && attempts_made >= opts.attempts {
            emitter.retries_exhausted(pipe, &job.id, attempts_made);
        }

        if let Some(size) = opts.max_metrics_size.filter(|size| *size > 0) {
            MetricsRecorder::new(queue_keys, target)
                .record(conn, pipe, timestamp, size)
                .await?;
        }

        let outcome = if fetch_next {
            let paused_or_maxed = meta.paused_or_maxed(active_len_after);
            let mut alloc = CounterAlloc::read(conn, &queue_keys.priority_counter).await?;
            let promotions = ops.plan_promotions(conn, timestamp, &mut alloc).await?;

            let ttl = match &opts.limiter {
                Some(limiter) => ops.rate_limit_ttl(conn, limiter).await?,
                None => 0,
            };

            if ttl > 0 {
                ops.queue_promotions_in_pipe(pipe, &emitter, &promotions, paused_or_maxed, timestamp);
                alloc.flush_in_pipe(pipe, &queue_keys.priority_counter);
                FinishResult::RateLimited { ttl_ms: ttl }
            } else if paused_or_maxed {
                ops.queue_promotions_in_pipe(pipe, &emitter, &promotions, true, timestamp);
                alloc.flush_in_pipe(pipe, &queue_keys.priority_counter);
                FinishResult::Finished
            } else if let Some(candidate) =
                ops.next_candidate(conn, &promotions, reactivated.as_ref()).await?
            {
                ops.queue_promotions_in_pipe(pipe, &emitter, &promotions, paused_or_maxed, timestamp);
                let payload = ops
                    .prepare_job_for_processing(
                        conn,
                        pipe,
                        &emitter,
                        &candidate,
                        opts.limiter.as_ref(),
                        &opts.lock_duration,
                        &opts.token,
                        timestamp,
                    )
                    .await?;
                alloc.flush_in_pipe(pipe, &queue_keys.priority_counter);
                FinishResult::NextJob(payload)
            } else if let Some(due) = ops.next_delayed_timestamp(conn, promotions.len()).await? {
                FinishResult::NextDelayed { timestamp_ms: due }
            } else {
                if reactivated.is_none() && ops.is_drained(conn, active_len_after).await? {
                    emitter.drained(pipe);
                }
                FinishResult::Finished
            }
        } else {
            if reactivated.is_none() && ops.is_drained(conn, active_len_after).await? {
                emitter.drained(pipe);
            }
            FinishResult::Finished
        };

        let exec: Option<()> = pipeline.query_async(conn).await?;
        Ok(exec.map(|_| Ok(outcome)))
    }

    /// Return an active job to the waiting pool so it can be picked up again.
    ///
    /// Due delayed jobs are promoted before the job is even looked at: any
    /// worker entering the retry path opportunistically advances the queue,
    /// and those promotions are committed even when the retry itself is
    /// rejected.
    pub async fn retry_failed_job<C: ConnectionLike + Send>(
        conn: &mut C,
        queue_keys: &QueueKeys,
        job_id: &str,
        token: &str,
        push_side: PushSide,
        timestamp: Timestamp,
    ) -> UcaResult<()> {
        let job_key = queue_keys.job(job_id);
        let watch: Vec<String> = vec![
            job_key.clone(),
            keys::lock_key(&job_key),
            queue_keys.wait.clone(),
            queue_keys.active.clone(),
            queue_keys.prioritized.clone(),
            queue_keys.priority_counter.clone(),
            queue_keys.delayed.clone(),
            queue_keys.stalled.clone(),
            queue_keys.meta.clone(),
        ];

        let outcome: UcaResult<()> = transaction_async!(conn, &watch, {
            Self::retry_in_transaction(conn, queue_keys, job_id, token, push_side, timestamp)
                .await?
        });

        match &outcome {
            Ok(()) => info!("[{}] moved back to waiting", &job_key),
            Err(err) => debug!("[{}] retry rejected: {}", &job_key, err),
        }
        outcome
    }

    /// One attempt at the retry procedure, inside the watch window.
    async fn retry_in_transaction<C: ConnectionLike + Send>(
        conn: &mut C,
        queue_keys: &QueueKeys,
        job_id: &str,
        token: &str,
        push_side: PushSide,
        timestamp: Timestamp,
    ) -> UcaResult<Option<UcaResult<()>>> {
        let job = JobRef::new(queue_keys, job_id);
        let ops = QueueOps::new(queue_keys);
        let emitter = EventEmitter::new(&queue_keys.events);

        let meta = ops.meta(conn).await?;
        let active: Vec<String> = conn.lrange(&queue_keys.active, 0, -1).await?;

        let mut pipeline = redis::pipe();
        let pipe = pipeline.atomic();
        emitter.trim(pipe, meta.max_events);

        let mut alloc = CounterAlloc::read(conn, &queue_keys.priority_counter).await?;
        let promotions = ops.plan_promotions(conn, timestamp, &mut alloc).await?;
        ops.queue_promotions_in_pipe(
            pipe,
            &emitter,
            &promotions,
            meta.paused_or_maxed(active.len() as u64),
            timestamp,
        );

        let rejection = if !job.exists(conn).await? {
            Some(UcaError::NoSuchJob(job.id.clone()))
        } else if let Err(err) = job.check_lock(conn, token).await {
            Some(err)
        } else if !active.iter().any(|id| id == &job.id) {
            Some(UcaError::NotInActiveList(job.id.clone()))
        } else {
            None
        };
        if let Some(err) = rejection {
            // commit the eager promotions, then surface the rejection
            alloc.flush_in_pipe(pipe, &queue_keys.priority_counter);
            let exec: Option<()> = pipeline.query_async(conn).await?;
            return Ok(exec.map(|_| Err(err)));
        }

        let priority: u64 = conn
            .hget::<_, _, Option<u64>>(&job.key, job::Field::Priority)
            .await?
            .unwrap_or(0);
        let paused_or_maxed = meta.paused_or_maxed(active.len() as u64 - 1);

        job.release_lock_in_pipe(pipe);
        job.remove_from_active_in_pipe(pipe);
        ops.push_ready_in_pipe(
            pipe,
            &job.id,
            priority,
            push_side,
            &mut alloc,
            paused_or_maxed,
            timestamp,
        );
        pipe.hincr(&job.key, job::Field::AttemptsMade, 1).ignore();
        emitter.waiting(pipe, &job.id, events::PREV_FAILED);
        alloc.flush_in_pipe(pipe, &queue_keys.priority_counter);

        let exec: Option<()> = pipeline.query_async(conn).await?;
        Ok(exec.map(|_| Ok(())))
    }

    /// Promote every delayed job due at `timestamp`: the same promotion the
    /// finish and retry procedures run inline, exposed for periodic
    /// maintenance sweeps. Returns the number of jobs promoted.
    pub async fn promote_delayed_jobs<C: ConnectionLike + Send>(
        conn: &mut C,
        queue_keys: &QueueKeys,
        timestamp: Timestamp,
    ) -> UcaResult<usize> {
        let watch: Vec<String> = vec![
            queue_keys.delayed.clone(),
            queue_keys.wait.clone(),
            queue_keys.prioritized.clone(),
            queue_keys.priority_counter.clone(),
            queue_keys.meta.clone(),
            queue_keys.active.clone(),
        ];

        let promoted: usize = transaction_async!(conn, &watch, {
            let ops = QueueOps::new(queue_keys);
            let emitter = EventEmitter::new(&queue_keys.events);
            let meta = ops.meta(conn).await?;
            let active_len: u64 = conn.llen(&queue_keys.active).await?;
            let mut alloc = CounterAlloc::read(conn, &queue_keys.priority_counter).await?;
            let promotions = ops.plan_promotions(conn, timestamp, &mut alloc).await?;

            if promotions.is_empty() {
                Some(0)
            } else {
                let mut pipeline = redis::pipe();
                let pipe = pipeline.atomic();
                emitter.trim(pipe, meta.max_events);
                ops.queue_promotions_in_pipe(
                    pipe,
                    &emitter,
                    &promotions,
                    meta.paused_or_maxed(active_len),
                    timestamp,
                );
                alloc.flush_in_pipe(pipe, &queue_keys.priority_counter);
                let exec: Option<()> = pipeline.query_async(conn).await?;
                exec.map(|_| promotions.len())
            }
        });

        if promoted > 0 {
            info!("[{}] promoted {} delayed jobs", &queue_keys.prefix, promoted);
        }
        Ok(promoted)
    }

    /// Create or update a queue's meta hash from given settings.
    pub async fn configure_queue<C: ConnectionLike + Send>(
        conn: &mut C,
        queue_keys: &QueueKeys,
        settings: &queue::Settings,
    ) -> UcaResult<()> {
        let mut pipeline = redis::pipe();
        let pipe = pipeline.atomic();

        if settings.paused {
            pipe.hset(&queue_keys.meta, queue::Field::Paused, 1).ignore();
        } else {
            pipe.hdel(&queue_keys.meta, queue::Field::Paused).ignore();
        }
        match settings.concurrency {
            Some(cap) => pipe.hset(&queue_keys.meta, queue::Field::Concurrency, cap).ignore(),
            None => pipe.hdel(&queue_keys.meta, queue::Field::Concurrency).ignore(),
        };
        pipe.hset(&queue_keys.meta, queue::Field::MaxEvents, settings.max_events_len)
            .ignore();

        let _: () = pipeline.query_async(conn).await?;
        info!("[{}] settings written", &queue_keys.meta);
        Ok(())
    }

    /// Snapshot of the queue's per-state sizes, read in one atomic pipeline.
    pub async fn queue_depths<C: ConnectionLike + Send>(
        conn: &mut C,
        queue_keys: &QueueKeys,
    ) -> UcaResult<QueueDepths> {
        let (wait, active, prioritized, delayed, completed, failed): (u64, u64, u64, u64, u64, u64) =
            redis::pipe()
                .atomic()
                .llen(&queue_keys.wait)
                .llen(&queue_keys.active)
                .zcard(&queue_keys.prioritized)
                .zcard(&queue_keys.delayed)
                .zcard(&queue_keys.completed)
                .zcard(&queue_keys.failed)
                .query_async(conn)
                .await?;
        Ok(QueueDepths { wait, active, prioritized, delayed, completed, failed })
    }

    /// Check connection to Redis using ping command.
    pub async fn check_ping<C: ConnectionLike>(conn: &mut C) -> UcaResult<()> {
        Ok(redis::cmd("PING").query_async(conn).await?)
    }
}
