//! Redis-backed `KvStore` implementation.

use super::{KvStore, PipelineOp, PipelineResult, PoolStats};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// `KvStore` backed by `redis::aio::ConnectionManager`, grounded on the
/// Redis usage already present in the scheduling job queue and worker pool.
pub struct RedisKv {
    conn: ConnectionManager,
    max_pool_size: u32,
    in_flight: AtomicU32,
    round_trip_deadline: Duration,
    ping_deadline: Duration,
}

impl RedisKv {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str, max_pool_size: u32, config: &Config) -> CoreResult<Self> {
        let client = redis::Client::open(url).map_err(CoreError::from)?;
        let conn = ConnectionManager::new(client).await.map_err(CoreError::from)?;
        Ok(Self {
            conn,
            max_pool_size,
            in_flight: AtomicU32::new(0),
            round_trip_deadline: config.store_find_deadline,
            ping_deadline: config.ping_deadline,
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Race `fut` against `deadline`, converting an elapsed timeout into
/// `CoreError::Transient` via `CoreError`'s `From<Elapsed>` impl.
async fn with_deadline<T, F>(deadline: Duration, fut: F) -> CoreResult<T>
where
    F: Future<Output = CoreResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(elapsed) => Err(CoreError::from(elapsed)),
    }
}

struct InFlightGuard<'a>(&'a AtomicU32);
impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}
impl<'a> Drop for InFlightGuard<'a> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.round_trip_deadline, async {
            let value: Option<Vec<u8>> = redis::cmd("GET")
                .arg(key)
                .query_async(&mut self.conn())
                .await
                .map_err(CoreError::from)?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.round_trip_deadline, async {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("EX").arg(ttl.as_secs().max(1));
            }
            cmd.query_async::<_, ()>(&mut self.conn()).await.map_err(CoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn del(&self, keys: &[&str]) -> CoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.round_trip_deadline, async {
            redis::cmd("DEL")
                .arg(keys)
                .query_async::<_, ()>(&mut self.conn())
                .await
                .map_err(CoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn exists(&self, keys: &[&str]) -> CoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.round_trip_deadline, async {
            let count: u64 = redis::cmd("EXISTS")
                .arg(keys)
                .query_async(&mut self.conn())
                .await
                .map_err(CoreError::from)?;
            Ok(count)
        })
        .await
    }

    async fn incr(&self, key: &str) -> CoreResult<i64> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.round_trip_deadline, async {
            let value: i64 = redis::cmd("INCR")
                .arg(key)
                .query_async(&mut self.conn())
                .await
                .map_err(CoreError::from)?;
            Ok(value)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<()> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.round_trip_deadline, async {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl.as_secs().max(1))
                .query_async::<_, ()>(&mut self.conn())
                .await
                .map_err(CoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn keys(&self, pattern: &str) -> CoreResult<Vec<String>> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.round_trip_deadline, async {
            let keys: Vec<String> = redis::cmd("KEYS")
                .arg(pattern)
                .query_async(&mut self.conn())
                .await
                .map_err(CoreError::from)?;
            Ok(keys)
        })
        .await
    }

    async fn ping(&self) -> CoreResult<()> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.ping_deadline, async {
            redis::cmd("PING")
                .query_async::<_, String>(&mut self.conn())
                .await
                .map_err(CoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> CoreResult<Vec<PipelineResult>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.round_trip_deadline, async {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for op in &ops {
                match op {
                    PipelineOp::Get(key) => {
                        pipe.cmd("GET").arg(key);
                    }
                    PipelineOp::Set { key, value, ttl } => {
                        let mut cmd = redis::cmd("SET");
                        cmd.arg(key).arg(value);
                        if let Some(ttl) = ttl {
                            cmd.arg("EX").arg(ttl.as_secs().max(1));
                        }
                        pipe.add_command(cmd);
                    }
                    PipelineOp::Del(key) => {
                        pipe.cmd("DEL").arg(key);
                    }
                    PipelineOp::LPush { queue, value } => {
                        pipe.cmd("LPUSH").arg(queue).arg(value);
                    }
                }
            }

            let raw: Vec<redis::Value> = pipe.query_async(&mut self.conn()).await.map_err(CoreError::from)?;

            let mut results = Vec::with_capacity(ops.len());
            for (op, value) in ops.iter().zip(raw) {
                results.push(match op {
                    PipelineOp::Get(_) => PipelineResult::Value(decode_bulk(value)),
                    _ => PipelineResult::Ack,
                });
            }
            Ok(results)
        })
        .await
    }

    async fn lpush(&self, queue: &str, value: Vec<u8>) -> CoreResult<()> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.round_trip_deadline, async {
            redis::cmd("LPUSH")
                .arg(queue)
                .arg(value)
                .query_async::<_, ()>(&mut self.conn())
                .await
                .map_err(CoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn rpop(&self, queue: &str) -> CoreResult<Option<Vec<u8>>> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.round_trip_deadline, async {
            let value: Option<Vec<u8>> = redis::cmd("RPOP")
                .arg(queue)
                .query_async(&mut self.conn())
                .await
                .map_err(CoreError::from)?;
            Ok(value)
        })
        .await
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            in_use: self.in_flight.load(Ordering::SeqCst),
            max_size: self.max_pool_size,
        }
    }
}

fn decode_bulk(value: redis::Value) -> Option<Vec<u8>> {
    match value {
        redis::Value::Data(bytes) => Some(bytes),
        redis::Value::Nil => None,
        _ => None,
    }
}
