//! KV store adapter — a thin interface over an external key-value cache
//! with TTL, pipelines, and atomic increment.
//!
//! This is intentionally narrow: only the operations the cache manager and
//! sync engine actually need, not a general Redis client wrapper.

pub mod memory;
pub mod redis_kv;

use crate::error::CoreResult;
use async_trait::async_trait;
use std::time::Duration;

pub use memory::MemoryKv;
pub use redis_kv::RedisKv;

/// A single operation within a pipeline/batch, so composite reads and the
/// `StageWrite` three-step write can each be issued as one round trip.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    /// `GET key`.
    Get(String),
    /// `SET key value [EX ttl]`.
    Set {
        /// Key to set.
        key: String,
        /// Value to store.
        value: Vec<u8>,
        /// Optional TTL.
        ttl: Option<Duration>,
    },
    /// `DEL key`.
    Del(String),
    /// `LPUSH queue value`.
    LPush {
        /// Queue (list) name.
        queue: String,
        /// Value to push.
        value: Vec<u8>,
    },
}

/// The result of one pipelined operation, positionally matched to the
/// request list.
#[derive(Debug, Clone)]
pub enum PipelineResult {
    /// Response to a `Get`: the value, if present.
    Value(Option<Vec<u8>>),
    /// Response to a `Set`, `Del`, or `LPush`: no payload.
    Ack,
}

/// Connection pool utilization statistics, used by the background monitor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Connections currently checked out.
    pub in_use: u32,
    /// Configured maximum pool size.
    pub max_size: u32,
}

impl PoolStats {
    /// Utilization as a fraction in `[0.0, 1.0]`.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.in_use as f64 / self.max_size as f64
        }
    }
}

/// The KV store interface required by the core.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// `GET key`.
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;

    /// `SET key value [EX ttl]`. `ttl` of `None` sets no expiration — used
    /// for write-buffer keys, which are never TTL'd.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()>;

    /// `DEL key [key ...]`.
    async fn del(&self, keys: &[&str]) -> CoreResult<()>;

    /// `EXISTS key [key ...]`, returning the count of keys that exist.
    async fn exists(&self, keys: &[&str]) -> CoreResult<u64>;

    /// Atomically increment a counter key, returning the new value.
    async fn incr(&self, key: &str) -> CoreResult<i64>;

    /// Set (or refresh) a key's TTL.
    async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<()>;

    /// List keys matching a glob pattern. Used sparingly — a tight read
    /// path must not rely on this for per-request work.
    async fn keys(&self, pattern: &str) -> CoreResult<Vec<String>>;

    /// Liveness check.
    async fn ping(&self) -> CoreResult<()>;

    /// Run a batch of operations as a single round trip. Used by the cache
    /// manager for composite reads and the atomic-looking `StageWrite`.
    async fn pipeline(&self, ops: Vec<PipelineOp>) -> CoreResult<Vec<PipelineResult>>;

    /// `LPUSH queue value`.
    async fn lpush(&self, queue: &str, value: Vec<u8>) -> CoreResult<()>;

    /// `RPOP queue` — non-blocking pop of the oldest enqueued value.
    async fn rpop(&self, queue: &str) -> CoreResult<Option<Vec<u8>>>;

    /// Current connection-pool utilization, for the background monitor.
    fn pool_stats(&self) -> PoolStats {
        PoolStats::default()
    }
}
