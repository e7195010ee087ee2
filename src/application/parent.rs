//! Parent/child dependency linking.
//!
//! A parent job sits in its queue's waiting-children set until the child keys
//! in its dependency set have all finished. Children report their results
//! here as they complete, and the parent is re-activated the moment its
//! dependency set empties. A failing child either fails its parent outright,
//! counts as a satisfied dependency, or leaves the parent blocked, depending
//! on the flags the child was enqueued with.
//!
//! The parent may live in a different queue than the child; every key touched
//! on the parent side is derived from the parent's own queue prefix, and the
//! caller's transaction covers both queues.

use std::future::Future;
use std::pin::Pin;

use log::info;
use redis::{aio::ConnectionLike, AsyncCommands, Pipeline};

use super::events::{self, EventEmitter};
use super::keys::{self, QueueKeys};
use super::queue::{priority_score, CounterAlloc, Promotion, QueueOps};
use crate::models::job::{self, Target};
use crate::models::{Timestamp, UcaResult};

/// A child's link to its parent: the parent's identity, flags, and the key
/// set of the queue the parent lives in.
pub struct ParentLink {
    pub parent_key: String,
    pub data: job::ParentData,
    pub keys: QueueKeys,
}

impl ParentLink {
    /// Build the link from a child's metadata, if the child has a parent.
    pub fn from_meta(meta: &job::FinishMeta) -> Option<Self> {
        let parent_key = meta.parent_key()?;
        let data = meta.parent()?;
        let keys = QueueKeys::from_prefix(data.queue_key.clone());
        Some(Self { parent_key, data, keys })
    }

    /// Parent-side keys a transaction must watch before updating this link.
    pub fn watch_keys(&self) -> Vec<String> {
        vec![
            self.parent_key.clone(),
            keys::dependencies_key(&self.parent_key),
            self.keys.waiting_children.clone(),
            self.keys.meta.clone(),
            self.keys.active.clone(),
            self.keys.priority_counter.clone(),
            self.keys.wait.clone(),
            self.keys.prioritized.clone(),
        ]
    }
}

/// Read the ancestor chain whose keys a finish transaction must watch: the
/// immediate parent always, and on a failure as far as fail-parent
/// propagation can reach. Parent links are written once at enqueue, so
/// reading them ahead of the transaction is safe.
pub async fn ancestor_watch_keys<C: ConnectionLike + Send>(
    conn: &mut C,
    job_key: &str,
    target: Target,
) -> UcaResult<Vec<String>> {
    let mut watch = Vec::new();
    let meta: job::FinishMeta = conn.hget(job_key, job::FinishMeta::fields()).await?;
    let mut link = ParentLink::from_meta(&meta);

    while let Some(current) = link {
        watch.extend(current.watch_keys());
        link = if target == Target::Failed && current.data.fail_parent_on_failure {
            let parent_meta: job::FinishMeta = conn
                .hget(&current.parent_key, job::FinishMeta::fields())
                .await?;
            ParentLink::from_meta(&parent_meta)
        } else {
            None
        };
    }
    Ok(watch)
}

/// Queue the parent-side effects of a child's successful result: record the
/// result for the parent, drop the child from the dependency set, and
/// re-activate the parent once nothing is left to wait for.
///
/// Returns the parent's queued ready-insertion when it was re-activated, so
/// a scheduler running in the same procedure can take it into account (its
/// writes have not committed yet and are invisible to reads).
pub async fn update_parent_deps_if_needed<C: ConnectionLike + Send>(
    conn: &mut C,
    pipe: &mut Pipeline,
    link: &ParentLink,
    child_key: &str,
    result: &str,
    now: Timestamp,
) -> UcaResult<Option<Promotion>> {
    pipe.lpush(keys::results_key(&link.parent_key), result).ignore();
    pipe.hset(keys::processed_key(&link.parent_key), child_key, result)
        .ignore();

    let deps_key = keys::dependencies_key(&link.parent_key);
    let is_member: bool = conn.sismember(&deps_key, child_key).await?;
    if !is_member {
        return Ok(None);
    }
    pipe.srem(&deps_key, child_key).ignore();

    // the child is still a member at read time, so the set empties when it
    // was the last one standing
    let remaining: u64 = conn.scard(&deps_key).await?;
    if remaining != 1 {
        return Ok(None);
    }

    let parent_exists: bool = conn.exists(&link.parent_key).await?;
    if !parent_exists {
        return Ok(None);
    }
    let waiting: Option<u64> = conn
        .zrank(&link.keys.waiting_children, &link.data.id)
        .await?;
    if waiting.is_none() {
        return Ok(None);
    }

    // re-activate the parent in its own queue
    let ops = QueueOps::new(&link.keys);
    let meta = ops.meta(conn).await?;
    let active_len: u64 = conn.llen(&link.keys.active).await?;
    let priority: u64 = conn
        .hget::<_, _, Option<u64>>(&link.parent_key, job::Field::Priority)
        .await?
        .unwrap_or(0);

    pipe.zrem(&link.keys.waiting_children, &link.data.id).ignore();
    let mut alloc = CounterAlloc::read(conn, &link.keys.priority_counter).await?;
    let score = if priority > 0 {
        priority_score(priority, alloc.next())
    } else {
        0
    };
    if priority == 0 {
        pipe.lpush(&link.keys.wait, &link.data.id).ignore();
    } else {
        pipe.zadd(&link.keys.prioritized, &link.data.id, score).ignore();
    }
    if !meta.paused_or_maxed(active_len) {
        pipe.set(&link.keys.marker, now.as_millis()).ignore();
    }
    alloc.flush_in_pipe(pipe, &link.keys.priority_counter);
    EventEmitter::new(&link.keys.events).waiting(pipe, &link.data.id, events::PREV_WAITING_CHILDREN);

    info!("[{}] dependencies satisfied", &link.parent_key);
    Ok(Some(Promotion { id: link.data.id.clone(), priority, score }))
}

/// Queue the parent-side effects of a child's failure.
///
/// Fail-parent links fail the whole ancestor chain as far as the flags carry;
/// ignore-dependency links count the failure as a satisfied dependency;
/// otherwise the parent stays in waiting-children, blocked by the failed
/// child.
///
/// When an ancestor ends up re-activated (an ignore-dependency link whose
/// dependency set emptied), its queued ready-insertion is returned together
/// with the prefix of the queue it lives in.
pub fn move_parent_if_needed<'a, C: ConnectionLike + Send>(
    conn: &'a mut C,
    pipe: &'a mut Pipeline,
    link: ParentLink,
    child_key: String,
    failed_reason: String,
    now: Timestamp,
) -> Pin<Box<dyn Future<Output = UcaResult<Option<(String, Promotion)>>> + Send + 'a>> {
    Box::pin(async move {
        if link.data.fail_parent_on_failure {
            let parent_exists: bool = conn.exists(&link.parent_key).await?;
            if !parent_exists {
                return Ok(None);
            }

            let reason = format!("child {} failed", child_key);
            pipe.zrem(&link.keys.waiting_children, &link.data.id).ignore();
            pipe.hset(&link.parent_key, job::Field::FailedReason, &reason)
                .ignore();
            pipe.hset(&link.parent_key, job::Field::FinishedOn, now).ignore();
            pipe.zadd(&link.keys.failed, &link.data.id, now.as_millis())
                .ignore();
            EventEmitter::new(&link.keys.events).failed(
                pipe,
                &link.data.id,
                &reason,
                events::PREV_WAITING_CHILDREN,
            );
            info!("[{}] failed: {}", &link.parent_key, &reason);

            let parent_meta: job::FinishMeta = conn
                .hget(&link.parent_key, job::FinishMeta::fields())
                .await?;
            if let Some(grandparent) = ParentLink::from_meta(&parent_meta) {
                return move_parent_if_needed(
                    conn,
                    pipe,
                    grandparent,
                    link.parent_key.clone(),
                    reason,
                    now,
                )
                .await;
            }
        } else if link.data.ignore_dependency_on_failure {
            let reactivated =
                update_parent_deps_if_needed(conn, pipe, &link, &child_key, &failed_reason, now)
                    .await?;
            return Ok(reactivated.map(|promotion| (link.keys.prefix.clone(), promotion)));
        }

        Ok(None)
    })
}
