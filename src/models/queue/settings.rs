//! Queue-wide settings and per-call option structures.

use serde_derive::{Deserialize, Serialize};

use crate::models::Duration;

/// Event stream cap applied when the meta hash does not configure one.
pub const DEFAULT_MAX_EVENTS_LEN: u64 = 10_000;

/// Queue-wide settings stored in the queue's meta hash.
///
/// Also usable as a `[queue.<name>]` block in the TOML configuration file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Whether workers should be handed new jobs.
    pub paused: bool,

    /// Maximum number of jobs in the active list; `None` means unbounded.
    pub concurrency: Option<u64>,

    /// Approximate cap on the event stream, enforced before each procedure's
    /// own appends.
    pub max_events_len: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            paused: false,
            concurrency: None,
            max_events_len: DEFAULT_MAX_EVENTS_LEN,
        }
    }
}

/// Retention policy for jobs landing in the completed or failed set.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct KeepJobs {
    /// Maximum number of jobs retained in the terminal set. `Some(0)` removes
    /// the job and all its sub-keys immediately; `None` retains without a
    /// count bound (age may still trim).
    pub count: Option<u64>,

    /// Maximum age of retained jobs; older entries are removed when a newer
    /// job finishes.
    pub age: Option<Duration>,
}

impl KeepJobs {
    /// Whether finishing under this policy removes the job outright.
    pub fn removes_job(&self) -> bool {
        self.count == Some(0)
    }
}

/// Rate limiter window: at most `max` jobs may be handed to workers per
/// `duration`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RateLimit {
    pub max: u64,
    pub duration: Duration,
}

/// Per-call options for finishing a job, packed by the client.
///
/// The field names are the wire contract for the packed map.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FinishOpts {
    /// Lock token proving the caller still owns the job.
    pub token: String,

    /// Retention policy for the terminal set the job lands in.
    #[serde(default, rename = "keepJobs")]
    pub keep_jobs: KeepJobs,

    /// Lock lifetime granted on the next job when one is fetched.
    #[serde(rename = "lockDuration")]
    pub lock_duration: Duration,

    /// Attempt budget for the job; hitting it on failure emits a
    /// retries-exhausted event.
    pub attempts: u64,

    /// Width of the per-minute metrics ring; metrics are skipped entirely
    /// when unset.
    #[serde(default, rename = "maxMetricsSize")]
    pub max_metrics_size: Option<u64>,

    /// Rate limiter configuration; limit checks are skipped when unset.
    #[serde(default)]
    pub limiter: Option<RateLimit>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keep_jobs_removal() {
        assert!(KeepJobs { count: Some(0), age: None }.removes_job());
        assert!(!KeepJobs { count: Some(1), age: None }.removes_job());
        assert!(!KeepJobs { count: None, age: None }.removes_job());
    }

    #[test]
    fn finish_opts_packed_names() {
        let opts: FinishOpts = serde_json::from_str(
            r#"{
                "token": "worker-1:abc",
                "keepJobs": {"count": 10, "age": "1h"},
                "lockDuration": "30s",
                "attempts": 3,
                "maxMetricsSize": 120,
                "limiter": {"max": 5, "duration": "750ms"}
            }"#,
        )
        .unwrap();

        assert_eq!(opts.token, "worker-1:abc");
        assert_eq!(opts.keep_jobs.count, Some(10));
        assert_eq!(opts.keep_jobs.age, Some(Duration::from_secs(3600)));
        assert_eq!(opts.lock_duration, Duration::from_secs(30));
        assert_eq!(opts.attempts, 3);
        assert_eq!(opts.max_metrics_size, Some(120));
        let limiter = opts.limiter.unwrap();
        assert_eq!(limiter.max, 5);
        assert_eq!(limiter.duration, Duration::from_millis(750));
    }

    #[test]
    fn finish_opts_minimal() {
        let opts: FinishOpts = serde_json::from_str(
            r#"{"token": "t", "lockDuration": "30s", "attempts": 1}"#,
        )
        .unwrap();
        assert_eq!(opts.keep_jobs, KeepJobs::default());
        assert_eq!(opts.max_metrics_size, None);
        assert!(opts.limiter.is_none());
    }
}
