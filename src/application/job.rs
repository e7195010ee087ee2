//! Defines the per-job pieces of the state-transition procedures.

use log::debug;
use redis::{aio::ConnectionLike, AsyncCommands, Pipeline};

use super::keys::{self, QueueKeys};
use crate::models::job::{self, Target};
use crate::models::queue::KeepJobs;
use crate::models::{Timestamp, UcaError, UcaResult};

/// Convenient wrapper combining a job id with its derived keys in a queue.
///
/// Methods come in two flavours, following the shape of the procedures: async
/// reads that validate state inside the watch window, and `*_in_pipe` methods
/// that queue writes into the procedure's atomic pipeline.
pub struct JobRef<'a> {
    pub id: String,
    pub key: String,
    keys: &'a QueueKeys,
}

impl<'a> JobRef<'a> {
    pub fn new<S: Into<String>>(keys: &'a QueueKeys, id: S) -> Self {
        let id = id.into();
        let key = keys.job(&id);
        Self { id, key, keys }
    }

    /// Key of this job's worker lock.
    pub fn lock_key(&self) -> String {
        keys::lock_key(&self.key)
    }

    /// Key of the set of children this job is still waiting on.
    pub fn dependencies_key(&self) -> String {
        keys::dependencies_key(&self.key)
    }

    /// Whether the job hash exists at all.
    pub async fn exists<C: ConnectionLike + Send>(&self, conn: &mut C) -> UcaResult<bool> {
        Ok(conn.exists(&self.key).await?)
    }

    /// Get the subset of this job's metadata the finish/retry procedures need.
    pub async fn finish_meta<C: ConnectionLike + Send>(&self, conn: &mut C) -> UcaResult<job::FinishMeta> {
        Ok(conn.hget(&self.key, job::FinishMeta::fields()).await?)
    }

    /// Validate that the caller's token still owns this job's lock.
    ///
    /// A missing lock means the job expired out from under the worker; a
    /// token mismatch means another worker took it over.
    pub async fn check_lock<C: ConnectionLike + Send>(&self, conn: &mut C, token: &str) -> UcaResult<()> {
        match conn.get::<_, Option<String>>(self.lock_key()).await? {
            None => Err(UcaError::MissingLock(self.id.clone())),
            Some(ref held) if held != token => Err(UcaError::LockNotOwned(self.id.clone())),
            Some(_) => Ok(()),
        }
    }

    /// Validate that this job is currently in the active list.
    ///
    /// The list is watched by the caller's transaction, so the queued `LREM`
    /// cannot miss once this check passes.
    pub async fn check_active<C: ConnectionLike + Send>(&self, conn: &mut C) -> UcaResult<Vec<String>> {
        let active: Vec<String> = conn.lrange(&self.keys.active, 0, -1).await?;
        if active.iter().any(|id| id == &self.id) {
            Ok(active)
        } else {
            Err(UcaError::NotInActiveList(self.id.clone()))
        }
    }

    /// Validate that this job has no unfinished children left.
    pub async fn check_dependencies<C: ConnectionLike + Send>(&self, conn: &mut C) -> UcaResult<()> {
        let pending: u64 = conn.scard(self.dependencies_key()).await?;
        if pending == 0 {
            Ok(())
        } else {
            Err(UcaError::PendingDependencies(self.id.clone()))
        }
    }

    /// Queue release of the lock and removal from the stalled watch set.
    /// Callers must have validated ownership with `check_lock` first.
    pub fn release_lock_in_pipe<'b>(&self, pipe: &'b mut Pipeline) -> &'b mut Pipeline {
        pipe.del(self.lock_key())
            .ignore()
            .srem(&self.keys.stalled, &self.id)
            .ignore()
    }

    /// Queue removal from the active list: tail side, single occurrence.
    pub fn remove_from_active_in_pipe<'b>(&self, pipe: &'b mut Pipeline) -> &'b mut Pipeline {
        pipe.lrem(&self.keys.active, -1, &self.id).ignore()
    }

    /// Compute which retained jobs the retention policy removes once this job
    /// is added to the target set at `timestamp`: everything older than the
    /// age bound, then the oldest entries beyond the count bound.
    pub async fn plan_retention<C: ConnectionLike + Send>(
        &self,
        conn: &mut C,
        target: Target,
        keep: &KeepJobs,
        timestamp: Timestamp,
    ) -> UcaResult<Vec<String>> {
        let target_set = self.keys.target_set(target);

        let mut stale: Vec<String> = match &keep.age {
            Some(age) => {
                let cutoff = timestamp.minus(age).as_millis();
                conn.zrangebyscore(target_set, "-inf", format!("({}", cutoff))
                    .await?
            }
            None => Vec::new(),
        };

        if let Some(count) = keep.count {
            let card: u64 = conn.zcard(target_set).await?;
            let retained = card + 1 - stale.len() as u64;
            if retained > count {
                // age-stale entries are the oldest, so one range covers both
                let need = stale.len() as u64 + (retained - count);
                stale = conn.zrange(target_set, 0, need as isize - 1).await?;
            }
        }

        if !stale.is_empty() {
            debug!("[{}] retention removes {} older jobs", target_set, stale.len());
        }
        Ok(stale)
    }

    /// Queue the terminal writes for a retained job: result field,
    /// `finishedOn`, placement in the target set, and removal of everything
    /// `plan_retention` selected. This job is written before older entries
    /// are trimmed, so it can never fall victim to its own trim pass.
    pub fn finalize_in_pipe<'b>(
        &self,
        pipe: &'b mut Pipeline,
        target: Target,
        result: &str,
        timestamp: Timestamp,
        stale: &[String],
    ) -> &'b mut Pipeline {
        let target_set = self.keys.target_set(target);
        pipe.zadd(target_set, &self.id, timestamp.as_millis())
            .ignore()
            .hset(&self.key, target.result_field(), result)
            .ignore()
            .hset(&self.key, job::Field::FinishedOn, timestamp)
            .ignore();

        for stale_id in stale {
            JobRef::new(self.keys, stale_id.as_str()).delete_keys_in_pipe(pipe);
            pipe.zrem(target_set, stale_id).ignore();
        }
        pipe
    }

    /// Queue deletion of this job's hash and every derived sub-key.
    pub fn delete_keys_in_pipe<'b>(&self, pipe: &'b mut Pipeline) -> &'b mut Pipeline {
        pipe.del(vec![
            self.key.clone(),
            keys::logs_key(&self.key),
            keys::processed_key(&self.key),
            keys::dependencies_key(&self.key),
            keys::results_key(&self.key),
        ])
        .ignore()
    }

    /// Queue removal of this job's debounce index entry, if it has one.
    pub fn remove_debounce_in_pipe<'b>(
        &self,
        pipe: &'b mut Pipeline,
        meta: &job::FinishMeta,
    ) -> &'b mut Pipeline {
        if let Some(debounce_id) = meta.debounce_id() {
            pipe.del(self.keys.debounce(&debounce_id)).ignore();
        }
        pipe
    }
}
