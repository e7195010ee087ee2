//! Contains definitions for the Redis keys, prefixes and suffixes used by a queue.

use crate::models::job::Target;

/// Suffix of the per-job lock key, compare-and-deleted with the worker's token.
pub const LOCK_SUFFIX: &str = ":lock";

/// Suffix of the per-job log list.
pub const LOGS_SUFFIX: &str = ":logs";

/// Suffix of the set of child job keys a parent is still waiting on.
pub const DEPENDENCIES_SUFFIX: &str = ":dependencies";

/// Suffix of the finished child -> result map kept for a parent.
pub const PROCESSED_SUFFIX: &str = ":processed";

/// Suffix of the ordered child result list kept for a parent.
pub const RESULTS_SUFFIX: &str = ":results";

/// Lock key for a full job key.
pub fn lock_key(job_key: &str) -> String {
    format!("{}{}", job_key, LOCK_SUFFIX)
}

/// Log list key for a full job key.
pub fn logs_key(job_key: &str) -> String {
    format!("{}{}", job_key, LOGS_SUFFIX)
}

/// Dependency set key for a full job key.
pub fn dependencies_key(job_key: &str) -> String {
    format!("{}{}", job_key, DEPENDENCIES_SUFFIX)
}

/// Processed map key for a full job key.
pub fn processed_key(job_key: &str) -> String {
    format!("{}{}", job_key, PROCESSED_SUFFIX)
}

/// Result list key for a full job key.
pub fn results_key(job_key: &str) -> String {
    format!("{}{}", job_key, RESULTS_SUFFIX)
}

/// All Redis keys belonging to one queue, built once from a namespace and the
/// queue name. Job hashes live directly under the queue prefix, so a full job
/// key doubles as `<prefix>:<job id>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueueKeys {
    /// Key prefix shared by every key of this queue.
    pub prefix: String,

    /// FIFO list of ready jobs.
    pub wait: String,

    /// List of jobs currently held by workers.
    pub active: String,

    /// Ordered set of ready jobs with non-default priority.
    pub prioritized: String,

    /// Monotonic tiebreaker counter for the priority set.
    pub priority_counter: String,

    /// Ordered set of jobs scheduled for the future, scored by due time.
    pub delayed: String,

    /// Ordered set of retained completed jobs, scored by finish time.
    pub completed: String,

    /// Ordered set of retained failed jobs, scored by finish time.
    pub failed: String,

    /// Watch set of active jobs checked for liveness by an external monitor.
    pub stalled: String,

    /// Ordered set of parent jobs waiting for their children.
    pub waiting_children: String,

    /// Queue-wide configuration hash.
    pub meta: String,

    /// Capped stream of state-transition events.
    pub events: String,

    /// Wake signal written whenever work may be ready.
    pub marker: String,

    /// Rate limiter window counter.
    pub limiter: String,
}

impl QueueKeys {
    /// Build the key set for given queue name under given namespace.
    pub fn new(namespace: &str, name: &str) -> Self {
        let prefix = if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", namespace, name)
        };
        Self::from_prefix(prefix)
    }

    /// Build the key set from an existing queue prefix, e.g. the `queueKey`
    /// of a parent job living in another queue.
    pub fn from_prefix<S: Into<String>>(prefix: S) -> Self {
        let prefix = prefix.into();
        QueueKeys {
            wait: format!("{}:wait", prefix),
            active: format!("{}:active", prefix),
            prioritized: format!("{}:prioritized", prefix),
            priority_counter: format!("{}:pc", prefix),
            delayed: format!("{}:delayed", prefix),
            completed: format!("{}:completed", prefix),
            failed: format!("{}:failed", prefix),
            stalled: format!("{}:stalled", prefix),
            waiting_children: format!("{}:waiting-children", prefix),
            meta: format!("{}:meta", prefix),
            events: format!("{}:events", prefix),
            marker: format!("{}:marker", prefix),
            limiter: format!("{}:limiter", prefix),
            prefix,
        }
    }

    /// Key of the job hash for given job id.
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:{}", self.prefix, job_id)
    }

    /// Key of the debounce index entry for given debounce id.
    pub fn debounce(&self, debounce_id: &str) -> String {
        format!("{}:de:{}", self.prefix, debounce_id)
    }

    /// Key of the metrics hash for given terminal state; the ring data list
    /// lives at `<metrics key>:data`.
    pub fn metrics(&self, target: Target) -> String {
        format!("{}:metrics:{}", self.prefix, target.as_ref())
    }

    /// Terminal set a finishing job is headed for.
    pub fn target_set(&self, target: Target) -> &str {
        match target {
            Target::Completed => &self.completed,
            Target::Failed => &self.failed,
        }
    }
}
