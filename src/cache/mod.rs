//! Cache manager — the two-namespace write-buffer/read-cache scheme and
//! the read-through/write-through rules.
//!
//! Key grammar: `{type}:{namespace}:{fingerprint}`, namespace ∈ {`write`,
//! `cache`}. The write buffer is never TTL'd; the read cache carries
//! the per-type TTL from [`crate::config::Config::cache_policy`].

use crate::config::Config;
use crate::error::CoreResult;
use crate::kv::{KvStore, PipelineOp, PipelineResult};
use crate::store::{Document, DocumentStore, Filter};
use std::sync::Arc;
use tracing::{debug, warn};

fn write_key(resource_type: &str, fingerprint: &str) -> String {
    format!("{resource_type}:write:{fingerprint}")
}

fn cache_key(resource_type: &str, fingerprint: &str) -> String {
    format!("{resource_type}:cache:{fingerprint}")
}

/// Enforces the write-buffer/read-cache scheme over a `KvStore`, falling
/// through to a `DocumentStore` on a full miss.
pub struct CacheManager {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn DocumentStore>,
    config: Config,
}

impl CacheManager {
    /// Build a cache manager over the given adapters.
    pub fn new(kv: Arc<dyn KvStore>, store: Arc<dyn DocumentStore>, config: Config) -> Self {
        Self { kv, store, config }
    }

    /// `GetEffective(T, F)`: write buffer, else read cache, else the store
    /// (populating the read cache on the way out).
    pub async fn get_effective(
        &self,
        resource_type: &str,
        fingerprint: &str,
        collection: &str,
        filter: &Filter,
    ) -> CoreResult<Option<Document>> {
        let wkey = write_key(resource_type, fingerprint);
        if let Some(bytes) = self.kv.get(&wkey).await? {
            debug!(resource_type, fingerprint, "served from write buffer");
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }

        let ckey = cache_key(resource_type, fingerprint);
        if let Some(bytes) = self.kv.get(&ckey).await? {
            debug!(resource_type, fingerprint, "served from read cache");
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }

        let found = self.store.find_one(collection, filter, None).await?;
        if let Some(doc) = &found {
            let policy = self.config.cache_policy(resource_type);
            if let Some(ttl) = policy.read_cache_ttl {
                let bytes = serde_json::to_vec(doc)?;
                self.kv.set(&ckey, bytes, Some(ttl)).await?;
            }
        }
        Ok(found)
    }

    /// Batched composite read: fetch the write-buffer keys for several
    /// `(resource_type, fingerprint)` sub-keys of one composite view in a
    /// single pipeline round trip. Misses are left as `None` — callers that
    /// need the read-cache/store fallback for a miss should call
    /// [`CacheManager::get_effective`] for just that sub-key.
    pub async fn get_many_from_write_buffer(
        &self,
        keys: &[(String, String)],
    ) -> CoreResult<Vec<Option<Document>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let ops: Vec<PipelineOp> = keys
            .iter()
            .map(|(t, f)| PipelineOp::Get(write_key(t, f)))
            .collect();
        let results = self.kv.pipeline(ops).await?;

        let mut out = Vec::with_capacity(results.len());
        for result in results {
            let doc = match result {
                PipelineResult::Value(Some(bytes)) => Some(serde_json::from_slice(&bytes)?),
                _ => None,
            };
            out.push(doc);
        }
        Ok(out)
    }

    /// `StageWrite(T, F, value)`: set the write buffer, enqueue a sync job,
    /// delete the read cache — issued as one pipeline. Does not wait for the
    /// sync engine; recovery on a failed apply is the sync engine's job.
    pub async fn stage_write(
        &self,
        resource_type: &str,
        fingerprint: &str,
        queue_name: &str,
        value: &Document,
    ) -> CoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let job = crate::sync::Job::new(resource_type, fingerprint);
        let job_bytes = serde_json::to_vec(&job)?;

        let ops = vec![
            PipelineOp::Set {
                key: write_key(resource_type, fingerprint),
                value: bytes,
                ttl: None,
            },
            PipelineOp::LPush {
                queue: queue_name.to_string(),
                value: job_bytes,
            },
            PipelineOp::Del(cache_key(resource_type, fingerprint)),
        ];
        self.kv.pipeline(ops).await?;
        Ok(())
    }

    /// Invalidate a fixed set of dependent read-cache keys. Failures here
    /// are logged, not propagated to the caller.
    pub async fn invalidate(&self, dependents: &[(String, String)]) {
        for (resource_type, fingerprint) in dependents {
            let key = cache_key(resource_type, fingerprint);
            if let Err(err) = self.kv.del(&[&key]).await {
                warn!(resource_type, fingerprint, %err, "secondary cache invalidation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::store::MemoryDocStore;
    use serde_json::json;

    fn manager() -> CacheManager {
        CacheManager::new(
            Arc::new(MemoryKv::new()),
            Arc::new(MemoryDocStore::new()),
            Config::default(),
        )
    }

    #[tokio::test]
    async fn stage_then_read_returns_the_staged_value_immediately() {
        let mgr = manager();
        let value = json!({"email": "a@x"});
        mgr.stage_write("citizen_overlay", "11144477735", "citizen_overlay", &value)
            .await
            .unwrap();

        let filter = crate::store::filter_eq("cpf", "11144477735");
        let effective = mgr
            .get_effective("citizen_overlay", "11144477735", "citizen_overlay", &filter)
            .await
            .unwrap();
        assert_eq!(effective, Some(value));
    }

    #[tokio::test]
    async fn write_buffer_wins_over_a_stale_read_cache_entry() {
        let mgr = manager();
        let stale = json!({"email": "stale@x"});
        mgr.kv
            .set(
                "citizen_overlay:cache:123",
                serde_json::to_vec(&stale).unwrap(),
                None,
            )
            .await
            .unwrap();

        let fresh = json!({"email": "fresh@x"});
        mgr.stage_write("citizen_overlay", "123", "citizen_overlay", &fresh)
            .await
            .unwrap();

        let filter = crate::store::filter_eq("cpf", "123");
        let effective = mgr
            .get_effective("citizen_overlay", "123", "citizen_overlay", &filter)
            .await
            .unwrap();
        assert_eq!(effective, Some(fresh));
    }

    #[tokio::test]
    async fn miss_falls_through_to_the_store_and_populates_the_cache() {
        let mgr = manager();
        let doc = json!({"cpf": "999", "email": "b@x"});
        mgr.store.insert_one("citizen_overlay", doc.clone()).await.unwrap();

        let filter = crate::store::filter_eq("cpf", "999");
        let effective = mgr
            .get_effective("citizen_overlay", "999", "citizen_overlay", &filter)
            .await
            .unwrap();
        assert_eq!(effective, Some(doc));

        assert!(mgr.kv.get("citizen_overlay:cache:999").await.unwrap().is_some());
    }
}
