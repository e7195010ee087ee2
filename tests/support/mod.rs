//! Shared test support.
//!
//! Requires Redis to be installed, so that the tests can start/stop Redis
//! servers as necessary using the `redis-server` binary.

use std::collections::HashMap;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::Duration as StdDuration;

use redis::aio::Connection;
use redis::streams::StreamRangeReply;
use redis::AsyncCommands;

use uca::application::QueueKeys;
use uca::models::queue::{FinishOpts, KeepJobs};
use uca::models::Duration;

/// Starts a throwaway `redis-server` on a free port, and kills it on drop,
/// so that every test runs against its own empty database.
pub struct TestContext {
    port: u16,
    server: Child,
}

impl TestContext {
    pub fn new() -> Self {
        let port = free_port();
        let server = Command::new("redis-server")
            .arg("--port")
            .arg(port.to_string())
            .arg("--save")
            .arg("")
            .arg("--appendonly")
            .arg("no")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to start redis-server, is it installed?");

        let ctx = Self { port, server };
        ctx.wait_for_server();
        ctx
    }

    pub fn client(&self) -> redis::Client {
        redis::Client::open(format!("redis://127.0.0.1:{}/", self.port)).unwrap()
    }

    pub async fn async_connection(&self) -> redis::RedisResult<Connection> {
        self.client().get_async_connection().await
    }

    fn wait_for_server(&self) {
        let client = self.client();
        for _ in 0..100 {
            if let Ok(mut conn) = client.get_connection() {
                if redis::cmd("PING").query::<String>(&mut conn).is_ok() {
                    return;
                }
            }
            sleep(StdDuration::from_millis(50));
        }
        panic!("redis-server did not come up on port {}", self.port);
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.server.kill();
        let _ = self.server.wait();
    }
}

fn free_port() -> u16 {
    // bind port 0 to let the OS pick, then hand the port to redis-server
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Test helper for seeding queue state the way the external collaborators
/// (producers, workers picking up jobs) would have left it.
pub struct QueueHarness {
    pub keys: QueueKeys,
}

impl QueueHarness {
    pub fn new(name: &str) -> Self {
        Self { keys: QueueKeys::new("", name) }
    }

    /// Write a job hash as a producer would.
    pub async fn seed_job(&self, conn: &mut Connection, job_id: &str, fields: &[(&str, &str)]) {
        let key = self.keys.job(job_id);
        let _: () = conn.hset(&key, "name", "test-job").await.unwrap();
        for (field, value) in fields {
            let _: () = conn.hset(&key, *field, *value).await.unwrap();
        }
    }

    /// Seed a job held by a worker: hash, active list entry, and lock.
    pub async fn seed_active_job(
        &self,
        conn: &mut Connection,
        job_id: &str,
        token: &str,
        fields: &[(&str, &str)],
    ) {
        self.seed_job(conn, job_id, fields).await;
        let _: () = conn.rpush(&self.keys.active, job_id).await.unwrap();
        let lock_key = format!("{}:lock", self.keys.job(job_id));
        let _: () = conn.set(&lock_key, token).await.unwrap();
    }

    /// Seed a job sitting in the wait list.
    pub async fn seed_waiting_job(&self, conn: &mut Connection, job_id: &str) {
        self.seed_job(conn, job_id, &[]).await;
        let _: () = conn.lpush(&self.keys.wait, job_id).await.unwrap();
    }

    /// Seed a job in the delayed set, due at the given epoch-ms time.
    pub async fn seed_delayed_job(
        &self,
        conn: &mut Connection,
        job_id: &str,
        due_ms: i64,
        priority: u64,
    ) {
        let priority = priority.to_string();
        if priority != "0" {
            self.seed_job(conn, job_id, &[("priority", priority.as_str())]).await;
        } else {
            self.seed_job(conn, job_id, &[]).await;
        }
        let _: () = conn.zadd(&self.keys.delayed, job_id, due_ms).await.unwrap();
    }

    pub async fn lock_exists(&self, conn: &mut Connection, job_id: &str) -> bool {
        let lock_key = format!("{}:lock", self.keys.job(job_id));
        conn.exists(&lock_key).await.unwrap()
    }

    pub async fn active_jobs(&self, conn: &mut Connection) -> Vec<String> {
        conn.lrange(&self.keys.active, 0, -1).await.unwrap()
    }

    pub async fn waiting_jobs(&self, conn: &mut Connection) -> Vec<String> {
        conn.lrange(&self.keys.wait, 0, -1).await.unwrap()
    }

    pub async fn job_field(
        &self,
        conn: &mut Connection,
        job_id: &str,
        field: &str,
    ) -> Option<String> {
        conn.hget(&self.keys.job(job_id), field).await.unwrap()
    }

    pub async fn target_score(
        &self,
        conn: &mut Connection,
        target_set: &str,
        job_id: &str,
    ) -> Option<i64> {
        conn.zscore(target_set, job_id).await.unwrap()
    }

    /// All events in the queue's stream, oldest first, as field maps.
    pub async fn events(&self, conn: &mut Connection) -> Vec<HashMap<String, String>> {
        let reply: StreamRangeReply = conn.xrange_all(&self.keys.events).await.unwrap();
        reply
            .ids
            .into_iter()
            .map(|entry| {
                entry
                    .map
                    .iter()
                    .map(|(k, v)| (k.clone(), redis::from_redis_value(v).unwrap()))
                    .collect()
            })
            .collect()
    }

    /// Just the event names, oldest first.
    pub async fn event_names(&self, conn: &mut Connection) -> Vec<String> {
        self.events(conn)
            .await
            .iter()
            .map(|event| event["event"].clone())
            .collect()
    }
}

/// Finish options used by most tests: keep a handful of finished jobs, no
/// limiter, no metrics.
pub fn default_finish_opts(token: &str) -> FinishOpts {
    FinishOpts {
        token: token.to_string(),
        keep_jobs: KeepJobs { count: Some(10), age: None },
        lock_duration: Duration::from_secs(30),
        attempts: 3,
        max_metrics_size: None,
        limiter: None,
    }
}
