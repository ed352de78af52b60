//! Sync engine — a fixed worker pool draining per-type FIFO queues out of
//! the KV store, applying them to the document store, and garbage
//! collecting write-buffer entries.
//!
//! Queues carry only `(resource_type, fingerprint)`, never the payload
//! itself — apply always re-reads the write buffer, which is what makes
//! duplicate jobs for the same fingerprint coalesce for free.

use crate::config::Config;
use crate::error::CoreError;
use crate::kv::KvStore;
use crate::store::{filter_eq, DocumentStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// One pending sync operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Resource-type tag, also the queue name and document-store collection.
    pub resource_type: String,
    /// Entity fingerprint (CPF, phone number, or similar).
    pub fingerprint: String,
    /// Enqueue timestamp, kept for observability only.
    pub enqueued_at: DateTime<Utc>,
    /// Number of transient-error retries already attempted.
    pub retry_count: u32,
}

impl Job {
    /// A freshly enqueued job for `(resource_type, fingerprint)`.
    pub fn new(resource_type: &str, fingerprint: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            fingerprint: fingerprint.to_string(),
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }
}

fn write_key(resource_type: &str, fingerprint: &str) -> String {
    format!("{resource_type}:write:{fingerprint}")
}

/// The field each resource type's fingerprint lives under in its document,
/// so apply can build an upsert filter without the queue carrying one.
fn primary_key_field(resource_type: &str) -> &'static str {
    match resource_type {
        "citizen_overlay" => "cpf",
        "phone_mapping" => "phone",
        "beta_group_membership" => "name",
        "user_config" => "user_id",
        _ => "fingerprint",
    }
}

const DEAD_LETTER_COLLECTION: &str = "sync_dead_letter";

/// A fixed pool of workers draining the configured queues in round-robin.
pub struct WorkerPool {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn DocumentStore>,
    config: Config,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Build a worker pool over the given adapters. Call [`Self::start`] to
    /// spawn workers.
    pub fn new(kv: Arc<dyn KvStore>, store: Arc<dyn DocumentStore>, config: Config) -> Self {
        Self {
            kv,
            store,
            config,
            running: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Spawn `config.sync_worker_count` long-lived worker tasks.
    pub fn start(&mut self) {
        self.running.store(true, Ordering::SeqCst);
        for worker_id in 0..self.config.sync_worker_count {
            let kv = Arc::clone(&self.kv);
            let store = Arc::clone(&self.store);
            let config = self.config.clone();
            let running = Arc::clone(&self.running);
            self.handles
                .push(tokio::spawn(
                    async move { run_worker(worker_id, kv, store, config, running).await },
                ));
        }
    }

    /// Stop accepting new cycles and drain in-flight jobs with a bounded
    /// deadline.
    pub async fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        let deadline = self.config.sync_shutdown_deadline;
        for handle in self.handles.drain(..) {
            if tokio::time::timeout(deadline, handle).await.is_err() {
                warn!("sync worker did not drain within the shutdown deadline");
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    kv: Arc<dyn KvStore>,
    store: Arc<dyn DocumentStore>,
    config: Config,
    running: Arc<AtomicBool>,
) {
    let queue_count = config.sync_queue_names.len().max(1);
    let mut cycle: usize = 0;
    while running.load(Ordering::SeqCst) {
        let mut processed = 0;
        // Rotate the starting queue each cycle so a run of hot queues at the
        // front of the list can't permanently starve the ones behind them.
        let offset = (worker_id + cycle) % queue_count;
        let rotated = config.sync_queue_names.iter().cycle().skip(offset).take(config.sync_queue_names.len());
        for queue_name in rotated {
            if processed >= config.sync_jobs_per_cycle {
                break;
            }
            match kv.rpop(queue_name).await {
                Ok(Some(bytes)) => {
                    processed += 1;
                    match serde_json::from_slice::<Job>(&bytes) {
                        Ok(job) => apply_with_retry(&kv, &store, &config, queue_name, job).await,
                        Err(err) => error!(worker_id, queue_name, %err, "dropping malformed job payload"),
                    }
                }
                Ok(None) => continue,
                Err(err) => warn!(worker_id, queue_name, %err, "queue poll failed"),
            }
        }
        if processed == 0 {
            tokio::time::sleep(config.sync_poll_interval).await;
        }
        cycle = cycle.wrapping_add(1);
    }
}

async fn apply_with_retry(
    kv: &Arc<dyn KvStore>,
    store: &Arc<dyn DocumentStore>,
    config: &Config,
    queue_name: &str,
    mut job: Job,
) {
    let mut backoff = config.sync_retry_base_backoff;
    loop {
        match apply_once(kv, store, &job).await {
            Ok(()) => return,
            Err(err) if err.is_transient() => {
                job.retry_count += 1;
                if job.retry_count > config.sync_max_retries {
                    warn!(
                        resource_type = %job.resource_type,
                        fingerprint = %job.fingerprint,
                        "retry budget exhausted, re-enqueuing"
                    );
                    requeue(kv, queue_name, &job).await;
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => {
                error!(resource_type = %job.resource_type, fingerprint = %job.fingerprint, %err, "dead-lettering job");
                dead_letter(store, &job, &err).await;
                return;
            }
        }
    }
}

/// Read the write buffer, upsert into the store, delete the write buffer.
/// A missing write-buffer entry means the job was already flushed by an
/// earlier duplicate — that's a no-op, not an error.
async fn apply_once(kv: &Arc<dyn KvStore>, store: &Arc<dyn DocumentStore>, job: &Job) -> Result<(), CoreError> {
    let wkey = write_key(&job.resource_type, &job.fingerprint);
    let bytes = match kv.get(&wkey).await? {
        Some(bytes) => bytes,
        None => {
            debug!(resource_type = %job.resource_type, fingerprint = %job.fingerprint, "write buffer empty, already flushed");
            return Ok(());
        }
    };
    let doc: Value = serde_json::from_slice(&bytes)?;
    let set = match &doc {
        Value::Object(map) => map.clone().into_iter().collect::<BTreeMap<_, _>>(),
        _ => return Err(CoreError::Permanent("write-buffer payload is not an object".to_string())),
    };

    let field = primary_key_field(&job.resource_type);
    let filter = filter_eq(field, job.fingerprint.clone());
    store.update_one(&job.resource_type, &filter, &set, true).await?;
    kv.del(&[&wkey]).await?;
    Ok(())
}

async fn requeue(kv: &Arc<dyn KvStore>, queue_name: &str, job: &Job) {
    if let Ok(bytes) = serde_json::to_vec(job) {
        if let Err(err) = kv.lpush(queue_name, bytes).await {
            error!(%err, "failed to re-enqueue job after retry exhaustion");
        }
    }
}

async fn dead_letter(store: &Arc<dyn DocumentStore>, job: &Job, err: &CoreError) {
    let entry = serde_json::json!({
        "resource_type": job.resource_type,
        "fingerprint": job.fingerprint,
        "retry_count": job.retry_count,
        "error": err.to_string(),
        "dead_lettered_at": Utc::now(),
    });
    if let Err(insert_err) = store.insert_one(DEAD_LETTER_COLLECTION, entry).await {
        error!(%insert_err, "failed to write dead-letter entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::store::MemoryDocStore;
    use serde_json::json;

    #[tokio::test]
    async fn apply_upserts_into_the_store_and_clears_the_write_buffer() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocStore::new());

        let doc = json!({"cpf": "123", "email": "a@x"});
        kv.set(
            "citizen_overlay:write:123",
            serde_json::to_vec(&doc).unwrap(),
            None,
        )
        .await
        .unwrap();

        let job = Job::new("citizen_overlay", "123");
        apply_once(&kv, &store, &job).await.unwrap();

        assert!(kv.get("citizen_overlay:write:123").await.unwrap().is_none());
        let filter = filter_eq("cpf", "123");
        let stored = store.find_one("citizen_overlay", &filter, None).await.unwrap();
        assert_eq!(stored, Some(doc));
    }

    #[tokio::test]
    async fn apply_is_a_no_op_when_the_write_buffer_is_already_empty() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocStore::new());

        let job = Job::new("citizen_overlay", "999");
        apply_once(&kv, &store, &job).await.unwrap();

        let count = store.count_documents("citizen_overlay", &Default::default()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn duplicate_jobs_for_the_same_fingerprint_coalesce_onto_the_latest_value() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocStore::new());

        kv.set(
            "citizen_overlay:write:123",
            serde_json::to_vec(&json!({"cpf": "123", "email": "first@x"})).unwrap(),
            None,
        )
        .await
        .unwrap();
        kv.set(
            "citizen_overlay:write:123",
            serde_json::to_vec(&json!({"cpf": "123", "email": "second@x"})).unwrap(),
            None,
        )
        .await
        .unwrap();

        let job_a = Job::new("citizen_overlay", "123");
        let job_b = Job::new("citizen_overlay", "123");
        apply_once(&kv, &store, &job_a).await.unwrap();
        apply_once(&kv, &store, &job_b).await.unwrap();

        let filter = filter_eq("cpf", "123");
        let stored = store.find_one("citizen_overlay", &filter, None).await.unwrap().unwrap();
        assert_eq!(stored["email"], json!("second@x"));
    }
}
