//! Miscellaneous Redis utilities and helper functions.

use redis::{aio::ConnectionLike, from_redis_value, FromRedisValue, Pipeline, RedisResult, Value};

/// Helper function for getting nested data structures from Redis pipelines.
///
/// Used for e.g. querying for vectors of tuples from:
/// pipe.hget(key1, [x, y, z])
///     .hget(key2, [x, y, z])
///     .hget(key3, [x, y, z])
///
/// let results: Vec<(x_type, y_type, z_type)> = vec_from_redis_pipe(conn, pipe).await?;
pub async fn vec_from_redis_pipe<C: ConnectionLike, T: FromRedisValue>(
    conn: &mut C,
    pipe: &Pipeline,
) -> RedisResult<Vec<T>> {
    let values: Vec<Value> = pipe.query_async(conn).await?;
    let mut results = Vec::with_capacity(values.len());
    for v in values {
        results.push(from_redis_value::<T>(&v)?);
    }

    Ok(results)
}

/// Helper macro to perform transactions in Redis.
///
/// Watches the given keys, then evaluates the body, which must produce an
/// `Option<T>`. A value of `Some(T)` means the body's atomic pipeline executed
/// and the loop terminates. A value of `None` means a watched key was modified
/// before `EXEC`, and that the whole body should be retried.
#[macro_export]
macro_rules! transaction_async {
    ($conn:expr, $keys:expr, $body:expr) => {
        loop {
            let _: () = redis::cmd("WATCH").arg($keys).query_async($conn).await?;
            if let Some(result) = $body {
                let _: () = redis::cmd("UNWATCH").query_async($conn).await?;
                break result;
            }
        }
    };
}
