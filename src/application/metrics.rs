//! Maintains fixed-width rings of per-minute finish counters.

use redis::{aio::ConnectionLike, AsyncCommands, Pipeline};

use super::keys::QueueKeys;
use crate::models::job::Target;
use crate::models::{Timestamp, UcaResult};

const COUNT_FIELD: &str = "count";
const PREV_TS_FIELD: &str = "prevTS";
const PREV_COUNT_FIELD: &str = "prevCount";

/// Suffix of the ring data list, newest minute at the head.
const DATA_SUFFIX: &str = ":data";

/// Records per-minute completion/failure counts for one queue.
///
/// The hash at the metrics key tracks the running total (`count`), the minute
/// bucket last written (`prevTS`) and the total as of that bucket
/// (`prevCount`); the list at `<key>:data` holds one count per minute, newest
/// at the head, capped at the configured ring width. Minutes with no finishes
/// are backfilled with zeros when the next finish arrives.
pub struct MetricsRecorder {
    key: String,
    data_key: String,
}

impl MetricsRecorder {
    pub fn new(keys: &QueueKeys, target: Target) -> Self {
        let key = keys.metrics(target);
        let data_key = format!("{}{}", key, DATA_SUFFIX);
        Self { key, data_key }
    }

    /// Read the ring state and queue this finish's increment. `max_size`
    /// bounds both the ring and the zero backfill.
    pub async fn record<C: ConnectionLike + Send>(
        &self,
        conn: &mut C,
        pipe: &mut Pipeline,
        now: Timestamp,
        max_size: u64,
    ) -> UcaResult<()> {
        let bucket = now.minute_bucket();
        let (count, prev_ts): (Option<u64>, Option<Timestamp>) =
            conn.hget(&self.key, &[COUNT_FIELD, PREV_TS_FIELD]).await?;
        let count = count.unwrap_or(0);

        let head: Option<u64> = match prev_ts {
            Some(prev) if prev == bucket => conn.lindex(&self.data_key, 0).await?,
            _ => None,
        };

        match (prev_ts, head) {
            (Some(prev), Some(head)) if prev == bucket => {
                pipe.lset(&self.data_key, 0, head + 1).ignore();
            }
            _ => {
                // one entry per elapsed minute, zeros for the skipped ones;
                // anything beyond the ring width is trimmed anyway
                let gap = prev_ts.map_or(1, |prev| bucket.minutes_since(&prev).max(1));
                let backfill = (gap - 1).min(max_size as i64) as usize;
                let mut entries: Vec<u64> = vec![0; backfill];
                entries.push(1);
                pipe.lpush(&self.data_key, entries).ignore();
                pipe.ltrim(&self.data_key, 0, max_size as isize - 1).ignore();
                pipe.hset(&self.key, PREV_TS_FIELD, bucket).ignore();
                pipe.hset(&self.key, PREV_COUNT_FIELD, count).ignore();
            }
        }

        pipe.hincr(&self.key, COUNT_FIELD, 1).ignore();
        Ok(())
    }
}
