//! Audit log sink — a bounded async buffer with synchronous fallback.

use crate::config::Config;
use crate::error::CoreError;
use crate::store::{BulkModel, DocumentStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};
use uuid::Uuid;

const COLLECTION: &str = "audit_entries";
const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret", "key", "code"];
const REDACTED: &str = "[REDACTED]";

/// Recursively replace any field named in the sensitive-key set, at any
/// nesting depth, with a redacted marker. Arrays are traversed
/// element-wise.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                if SENSITIVE_KEYS.contains(&key.as_str()) {
                    out.insert(key.clone(), json!(REDACTED));
                } else {
                    out.insert(key.clone(), sanitize(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

/// An append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier.
    pub id: Uuid,
    /// CPF the action concerns, if any.
    pub cpf: Option<String>,
    /// Action performed (e.g. "overlay.update_field").
    pub action: String,
    /// Resource type affected (e.g. "citizen_overlay").
    pub resource: String,
    /// Identifier of the specific resource instance.
    pub resource_id: String,
    /// Value before the action, sanitized.
    pub old_value: Option<Value>,
    /// Value after the action, sanitized.
    pub new_value: Option<Value>,
    /// Acting user's identifier.
    pub user_id: Option<String>,
    /// Acting user's IP address.
    pub ip: Option<String>,
    /// Acting user's user-agent string.
    pub user_agent: Option<String>,
    /// Request identifier for correlating with request logs.
    pub request_id: Option<String>,
    /// When the action occurred.
    pub timestamp: DateTime<Utc>,
    /// When this entry should be considered expired (insertion time + the
    /// configured retention). Postgres has no native TTL index, so this is
    /// enforced by a background sweep rather than a store-level expiry.
    pub expires_at: DateTime<Utc>,
    /// Free-form additional context.
    pub metadata: Value,
}

/// Builds an [`AuditEntry`], sanitizing old/new values and stamping
/// timestamps at `build()` time.
pub struct AuditEntryBuilder {
    cpf: Option<String>,
    action: String,
    resource: String,
    resource_id: String,
    old_value: Option<Value>,
    new_value: Option<Value>,
    user_id: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    request_id: Option<String>,
    metadata: Value,
}

impl AuditEntryBuilder {
    /// Start building an entry for `action` against `resource`/`resource_id`.
    pub fn new(action: impl Into<String>, resource: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            cpf: None,
            action: action.into(),
            resource: resource.into(),
            resource_id: resource_id.into(),
            old_value: None,
            new_value: None,
            user_id: None,
            ip: None,
            user_agent: None,
            request_id: None,
            metadata: json!({}),
        }
    }

    /// Set the CPF the action concerns.
    pub fn cpf(mut self, cpf: impl Into<String>) -> Self {
        self.cpf = Some(cpf.into());
        self
    }

    /// Set the value before the action.
    pub fn old_value(mut self, value: Value) -> Self {
        self.old_value = Some(value);
        self
    }

    /// Set the value after the action.
    pub fn new_value(mut self, value: Value) -> Self {
        self.new_value = Some(value);
        self
    }

    /// Set the acting user's identifier.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the acting user's IP address.
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Set the acting user's user-agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the correlating request identifier.
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set free-form metadata.
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Finalize the entry, sanitizing `old_value`/`new_value` and stamping
    /// `timestamp`/`expires_at` against `retention`.
    pub fn build(self, retention: std::time::Duration) -> AuditEntry {
        let now = Utc::now();
        AuditEntry {
            id: Uuid::new_v4(),
            cpf: self.cpf,
            action: self.action,
            resource: self.resource,
            resource_id: self.resource_id,
            old_value: self.old_value.as_ref().map(sanitize),
            new_value: self.new_value.as_ref().map(sanitize),
            user_id: self.user_id,
            ip: self.ip,
            user_agent: self.user_agent,
            request_id: self.request_id,
            timestamp: now,
            expires_at: now + chrono::Duration::from_std(retention).unwrap(),
            metadata: self.metadata,
        }
    }
}

/// A bounded async buffer of audit entries, drained by a fixed pool of
/// batch-insert workers, with a synchronous fallback on backpressure.
pub struct AuditSink {
    sender: mpsc::Sender<AuditEntry>,
    store: Arc<dyn DocumentStore>,
    fallback_deadline: std::time::Duration,
}

impl AuditSink {
    /// Start the sink: spawns `config.audit_worker_count` batch workers
    /// draining a channel of capacity `config.audit_buffer_capacity`.
    pub fn start(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        let (sender, receiver) = mpsc::channel(config.audit_buffer_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        for _ in 0..config.audit_worker_count {
            let receiver = Arc::clone(&receiver);
            let store = Arc::clone(&store);
            let config = config.clone();
            tokio::spawn(async move { run_batch_worker(receiver, store, config).await });
        }
        Self {
            sender,
            store,
            fallback_deadline: config.audit_fallback_deadline,
        }
    }

    /// Enqueue an entry without blocking. On backpressure (buffer full),
    /// falls back to a synchronous single insert bounded by the configured
    /// deadline — this is not an error to the caller.
    pub async fn record(&self, entry: AuditEntry) {
        match self.sender.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                warn!("audit buffer full, falling back to synchronous insert");
                self.fallback_insert(entry).await;
            }
            Err(TrySendError::Closed(_)) => {
                error!("audit sink channel closed, entry dropped");
            }
        }
    }

    async fn fallback_insert(&self, entry: AuditEntry) {
        let doc = match serde_json::to_value(&entry) {
            Ok(doc) => doc,
            Err(err) => {
                error!(%err, "failed to serialize audit entry for fallback insert");
                return;
            }
        };
        let result = tokio::time::timeout(self.fallback_deadline, self.store.insert_one(COLLECTION, doc)).await;
        match result {
            Ok(Ok(())) => {
                let fallback = CoreError::BackpressureFallback("synchronous audit insert completed".to_string());
                warn!(entry_id = %entry.id, %fallback, "audit backpressure fallback");
            }
            Ok(Err(err)) => error!(%err, "synchronous audit fallback insert failed"),
            Err(_) => error!("synchronous audit fallback insert exceeded its deadline"),
        }
    }
}

async fn collect_batch(
    receiver: &Arc<Mutex<mpsc::Receiver<AuditEntry>>>,
    config: &Config,
) -> (Vec<AuditEntry>, bool) {
    let mut batch = Vec::new();
    let deadline = tokio::time::Instant::now() + config.audit_batch_interval;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let item = {
            let mut rx = receiver.lock().await;
            tokio::time::timeout(remaining, rx.recv()).await
        };
        match item {
            Ok(Some(entry)) => {
                batch.push(entry);
                if batch.len() >= config.audit_batch_size {
                    return (batch, false);
                }
            }
            Ok(None) => return (batch, true),
            Err(_) => return (batch, false),
        }
    }
}

async fn run_batch_worker(receiver: Arc<Mutex<mpsc::Receiver<AuditEntry>>>, store: Arc<dyn DocumentStore>, config: Config) {
    loop {
        let (batch, closed) = collect_batch(&receiver, &config).await;
        if !batch.is_empty() {
            let models = batch
                .into_iter()
                .map(|entry| serde_json::to_value(entry).map(|doc| BulkModel::Insert { doc }))
                .collect::<Result<Vec<_>, _>>();
            match models {
                Ok(models) => {
                    if let Err(err) = store.bulk_write(COLLECTION, false, models).await {
                        error!(%err, "audit batch insert failed");
                    }
                }
                Err(err) => error!(%err, "failed to serialize audit batch"),
            }
        }
        if closed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{filter_eq, MemoryDocStore};
    use std::time::Duration;

    #[test]
    fn sanitize_redacts_sensitive_fields_at_any_depth() {
        let value = json!({"password": "secret", "nested": {"token": "t", "safe": "ok"}});
        let sanitized = sanitize(&value);
        assert_eq!(sanitized["password"], json!(REDACTED));
        assert_eq!(sanitized["nested"]["token"], json!(REDACTED));
        assert_eq!(sanitized["nested"]["safe"], json!("ok"));
    }

    #[test]
    fn sanitize_redacts_inside_arrays() {
        let value = json!([{"key": "k1"}, {"safe": "ok"}]);
        let sanitized = sanitize(&value);
        assert_eq!(sanitized[0]["key"], json!(REDACTED));
        assert_eq!(sanitized[1]["safe"], json!("ok"));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let value = json!({"password": "secret", "nested": {"token": "t"}});
        let once = sanitize(&value);
        let twice = sanitize(&once);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn record_lands_in_the_store_via_a_batch_worker() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocStore::new());
        let mut config = Config::default();
        config.audit_batch_interval = Duration::from_millis(10);
        config.audit_batch_size = 10;
        let sink = AuditSink::start(Arc::clone(&store), config);

        let entry = AuditEntryBuilder::new("overlay.update_field", "citizen_overlay", "11144477735")
            .new_value(json!({"password": "secret"}))
            .build(Duration::from_secs(86_400));
        let entry_id = entry.id;
        sink.record(entry).await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        let filter = filter_eq("id", entry_id.to_string());
        let count = store.count_documents(COLLECTION, &filter).await.unwrap();
        assert_eq!(count, 1);
    }
}
