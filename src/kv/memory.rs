//! In-memory `KvStore` fake used by unit and integration tests so they run
//! without a live Redis instance.

use super::{KvStore, PipelineOp, PipelineResult, PoolStats};
use crate::error::CoreResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// An in-process `KvStore` backed by a `HashMap`, with the same TTL and
/// list semantics as the Redis adapter.
#[derive(Default)]
pub struct MemoryKv {
    data: RwLock<HashMap<String, Entry>>,
    queues: RwLock<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl MemoryKv {
    /// A fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let mut data = self.data.write();
        match data.get(key) {
            Some(entry) => {
                if entry.expires_at.map(|t| t <= Instant::now()).unwrap_or(false) {
                    data.remove(key);
                    None
                } else {
                    Some(entry.value.clone())
                }
            }
            None => None,
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.get_raw(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()> {
        self.data.write().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> CoreResult<()> {
        let mut data = self.data.write();
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }

    async fn exists(&self, keys: &[&str]) -> CoreResult<u64> {
        Ok(keys.iter().filter(|k| self.get_raw(k).is_some()).count() as u64)
    }

    async fn incr(&self, key: &str) -> CoreResult<i64> {
        let mut data = self.data.write();
        let current = data
            .get(key)
            .and_then(|e| std::str::from_utf8(&e.value).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        data.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<()> {
        if let Some(entry) = self.data.write().get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> CoreResult<Vec<String>> {
        let prefix = pattern.trim_end_matches('*');
        let data = self.data.read();
        Ok(data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> CoreResult<Vec<PipelineResult>> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                PipelineOp::Get(key) => {
                    results.push(PipelineResult::Value(self.get_raw(&key)));
                }
                PipelineOp::Set { key, value, ttl } => {
                    self.set(&key, value, ttl).await?;
                    results.push(PipelineResult::Ack);
                }
                PipelineOp::Del(key) => {
                    self.del(&[&key]).await?;
                    results.push(PipelineResult::Ack);
                }
                PipelineOp::LPush { queue, value } => {
                    self.lpush(&queue, value).await?;
                    results.push(PipelineResult::Ack);
                }
            }
        }
        Ok(results)
    }

    async fn lpush(&self, queue: &str, value: Vec<u8>) -> CoreResult<()> {
        self.queues
            .write()
            .entry(queue.to_string())
            .or_default()
            .push_front(value);
        Ok(())
    }

    async fn rpop(&self, queue: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self
            .queues
            .write()
            .get_mut(queue)
            .and_then(|q| q.pop_back()))
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            in_use: 0,
            max_size: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ttl_expires_entries() {
        let kv = MemoryKv::new();
        kv.set("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn queue_is_fifo() {
        let kv = MemoryKv::new();
        kv.lpush("q", b"first".to_vec()).await.unwrap();
        kv.lpush("q", b"second".to_vec()).await.unwrap();
        assert_eq!(kv.rpop("q").await.unwrap(), Some(b"first".to_vec()));
        assert_eq!(kv.rpop("q").await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(kv.rpop("q").await.unwrap(), None);
    }
}
