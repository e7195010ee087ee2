//! Integration tests for the retry-failed-job procedure.
//!
//! Requires Redis to be installed, so that the tests can start/stop Redis
//! servers as necessary using the `redis-server` binary.

use redis::aio::Connection;
use redis::AsyncCommands;

use uca::application::{priority_score, QueueManager};
use uca::models::{PushSide, Timestamp, UcaError};

use crate::support::*;

mod support;

const QUEUE: &str = "jobs";
const TOKEN: &str = "worker-1:token";

const NOW_MS: i64 = 1_700_000_000_000;

fn now() -> Timestamp {
    Timestamp::from_millis(NOW_MS)
}

async fn init() -> (TestContext, Connection, QueueHarness) {
    let ctx = TestContext::new();
    let conn = ctx.async_connection().await.unwrap();
    let harness = QueueHarness::new(QUEUE);
    (ctx, conn, harness)
}

#[tokio::test]
async fn retry_moves_job_back_to_wait() {
    let (_ctx, mut conn, q) = init().await;
    q.seed_active_job(&mut conn, "j1", TOKEN, &[]).await;

    QueueManager::retry_failed_job(&mut conn, &q.keys, "j1", TOKEN, PushSide::Front, now())
        .await
        .unwrap();

    assert!(q.active_jobs(&mut conn).await.is_empty());
    assert_eq!(q.waiting_jobs(&mut conn).await, vec!["j1".to_string()]);
    assert!(!q.lock_exists(&mut conn, "j1").await);
    assert_eq!(q.job_field(&mut conn, "j1", "atm").await.unwrap(), "1");

    let events = q.events(&mut conn).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "waiting");
    assert_eq!(events[0]["jobId"], "j1");
    assert_eq!(events[0]["prev"], "failed");

    let marker_exists: bool = conn.exists(&q.keys.marker).await.unwrap();
    assert!(marker_exists);
}

#[tokio::test]
async fn retry_push_side_is_honoured() {
    let (_ctx, mut conn, q) = init().await;
    q.seed_waiting_job(&mut conn, "ahead").await;
    q.seed_active_job(&mut conn, "j1", TOKEN, &[]).await;

    // Back lands at the consumption end of the wait list
    QueueManager::retry_failed_job(&mut conn, &q.keys, "j1", TOKEN, PushSide::Back, now())
        .await
        .unwrap();
    assert_eq!(
        q.waiting_jobs(&mut conn).await,
        vec!["ahead".to_string(), "j1".to_string()]
    );
}

#[tokio::test]
async fn retry_moves_job_to_priority_set() {
    let (_ctx, mut conn, q) = init().await;
    q.seed_active_job(&mut conn, "j1", TOKEN, &[("priority", "5")]).await;

    QueueManager::retry_failed_job(&mut conn, &q.keys, "j1", TOKEN, PushSide::Front, now())
        .await
        .unwrap();

    assert!(q.active_jobs(&mut conn).await.is_empty());
    assert!(q.waiting_jobs(&mut conn).await.is_empty());

    // first counter value under priority 5, and the counter was advanced
    let score: i64 = conn.zscore(&q.keys.prioritized, "j1").await.unwrap();
    assert_eq!(score as u64, priority_score(5, 1));
    let counter: u64 = conn.get(&q.keys.priority_counter).await.unwrap();
    assert_eq!(counter, 1);

    assert_eq!(q.job_field(&mut conn, "j1", "atm").await.unwrap(), "1");
    assert_eq!(q.event_names(&mut conn).await, vec!["waiting"]);
    let marker_exists: bool = conn.exists(&q.keys.marker).await.unwrap();
    assert!(marker_exists);
}

#[tokio::test]
async fn retry_promotes_delayed_jobs_even_for_missing_job() {
    let (_ctx, mut conn, q) = init().await;
    q.seed_delayed_job(&mut conn, "d1", NOW_MS - 1_000, 0).await;

    let err = QueueManager::retry_failed_job(&mut conn, &q.keys, "ghost", TOKEN, PushSide::Front, now())
        .await
        .unwrap_err();
    assert_eq!(err, UcaError::NoSuchJob("ghost".to_string()));
    assert_eq!(err.code(), Some(-1));

    // the rejection did not stop the eager promotion
    assert_eq!(q.waiting_jobs(&mut conn).await, vec!["d1".to_string()]);
    let delayed: u64 = conn.zcard(&q.keys.delayed).await.unwrap();
    assert_eq!(delayed, 0);

    let events = q.events(&mut conn).await;
    assert_eq!(events[0]["event"], "waiting");
    assert_eq!(events[0]["jobId"], "d1");
    assert_eq!(events[0]["prev"], "delayed");
}

#[tokio::test]
async fn retry_error_codes() {
    let (_ctx, mut conn, q) = init().await;

    // job exists but has no lock
    q.seed_job(&mut conn, "unlocked", &[]).await;
    let _: () = conn.rpush(&q.keys.active, "unlocked").await.unwrap();
    let err = QueueManager::retry_failed_job(
        &mut conn, &q.keys, "unlocked", TOKEN, PushSide::Front, now(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), Some(-2));

    // lock held under another worker's token
    q.seed_active_job(&mut conn, "stolen", "worker-2:token", &[]).await;
    let err = QueueManager::retry_failed_job(
        &mut conn, &q.keys, "stolen", TOKEN, PushSide::Front, now(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), Some(-6));
    // the job is untouched: still active, still locked, no attempt counted
    assert!(q.lock_exists(&mut conn, "stolen").await);
    assert!(q.active_jobs(&mut conn).await.contains(&"stolen".to_string()));
    assert_eq!(q.job_field(&mut conn, "stolen", "atm").await, None);

    // job not in the active list
    q.seed_job(&mut conn, "idle", &[]).await;
    let _: () = conn
        .set(format!("{}:lock", q.keys.job("idle")), TOKEN)
        .await
        .unwrap();
    let err = QueueManager::retry_failed_job(
        &mut conn, &q.keys, "idle", TOKEN, PushSide::Front, now(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), Some(-3));
}

#[tokio::test]
async fn standalone_promotion_sweep() {
    let (_ctx, mut conn, q) = init().await;
    q.seed_delayed_job(&mut conn, "d1", NOW_MS - 2_000, 0).await;
    q.seed_delayed_job(&mut conn, "d2", NOW_MS - 1_000, 3).await;
    q.seed_delayed_job(&mut conn, "future", NOW_MS + 60_000, 0).await;

    let promoted = QueueManager::promote_delayed_jobs(&mut conn, &q.keys, now())
        .await
        .unwrap();
    assert_eq!(promoted, 2);

    assert_eq!(q.waiting_jobs(&mut conn).await, vec!["d1".to_string()]);
    let score: i64 = conn.zscore(&q.keys.prioritized, "d2").await.unwrap();
    assert_eq!(score as u64, priority_score(3, 1));
    let delayed: Vec<String> = conn.zrange(&q.keys.delayed, 0, -1).await.unwrap();
    assert_eq!(delayed, vec!["future".to_string()]);

    // a second sweep finds nothing due
    let promoted = QueueManager::promote_delayed_jobs(&mut conn, &q.keys, now())
        .await
        .unwrap();
    assert_eq!(promoted, 0);
}

#[tokio::test]
async fn configure_queue_writes_meta() {
    let (_ctx, mut conn, q) = init().await;
    let settings = uca::models::queue::Settings {
        paused: true,
        concurrency: Some(4),
        max_events_len: 2_000,
    };
    QueueManager::configure_queue(&mut conn, &q.keys, &settings)
        .await
        .unwrap();

    let paused: Option<String> = conn.hget(&q.keys.meta, "paused").await.unwrap();
    assert!(paused.is_some());
    let concurrency: u64 = conn.hget(&q.keys.meta, "concurrency").await.unwrap();
    assert_eq!(concurrency, 4);
    let max_events: u64 = conn.hget(&q.keys.meta, "opts.maxLenEvents").await.unwrap();
    assert_eq!(max_events, 2_000);

    // resuming clears the paused flag
    QueueManager::configure_queue(
        &mut conn,
        &q.keys,
        &uca::models::queue::Settings::default(),
    )
    .await
    .unwrap();
    let paused: Option<String> = conn.hget(&q.keys.meta, "paused").await.unwrap();
    assert!(paused.is_none());
}
