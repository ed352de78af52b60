//! Document store adapter — a thin interface over an external document
//! store with upsert, find, bulk-write, and projection.
//!
//! Documents are represented as a tagged `serde_json::Value`. Filters are
//! flat field-equality
//! maps, which is the only shape the domain services actually need: match
//! on fingerprint, match on fingerprint + version for optimistic
//! concurrency, match on a TTL/expiry timestamp for sweeps.

pub mod memory;
pub mod postgres_store;

use crate::error::CoreResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

pub use memory::MemoryDocStore;
pub use postgres_store::PostgresDocStore;

/// A document, represented as a JSON object.
pub type Document = Value;

/// A flat equality filter: every (field, value) pair must match.
pub type Filter = BTreeMap<String, Value>;

/// The set of fields to return from a find, or `None` for the full
/// document.
pub type Projection = Option<Vec<String>>;

/// Outcome of a conditional `update_one`, mirroring MongoDB's
/// `(matched, modified, upserted_id)` tuple closely enough for the
/// optimistic-update protocol to distinguish "no such document" from
/// "document exists but didn't match the filter".
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    /// Number of documents the filter matched.
    pub matched: u64,
    /// Number of documents actually modified.
    pub modified: u64,
}

/// One operation within a `bulk_write` batch.
#[derive(Debug, Clone)]
pub enum BulkModel {
    /// Insert a new document.
    Insert {
        /// Document to insert.
        doc: Document,
    },
    /// Conditionally update (or upsert) a document matching `filter`.
    Update {
        /// Filter selecting the document.
        filter: Filter,
        /// Fields to set.
        set: BTreeMap<String, Value>,
        /// Insert a new document if no match, per `upsert`.
        upsert: bool,
    },
    /// Delete the first document matching `filter`.
    Delete {
        /// Filter selecting the document.
        filter: Filter,
    },
}

/// An index to create idempotently at startup.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    /// Collection the index applies to.
    pub collection: String,
    /// Index name.
    pub name: String,
    /// Fields the index covers, in order.
    pub fields: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// The document store interface required by the core.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Find the first document matching `filter`.
    async fn find_one(&self, collection: &str, filter: &Filter, projection: Projection) -> CoreResult<Option<Document>>;

    /// Find up to `limit` documents matching `filter`.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<i64>,
        projection: Projection,
    ) -> CoreResult<Vec<Document>>;

    /// Insert a single document.
    async fn insert_one(&self, collection: &str, doc: Document) -> CoreResult<()>;

    /// Insert many documents in one call.
    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> CoreResult<()>;

    /// Conditionally update the first document matching `filter`, setting
    /// the fields in `set`. If `upsert` and nothing matched, insert a new
    /// document combining `filter` and `set`.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set: &BTreeMap<String, Value>,
        upsert: bool,
    ) -> CoreResult<UpdateOutcome>;

    /// Run a batch of insert/update/delete operations. If `ordered`, stop
    /// at the first failing operation; otherwise apply every operation and
    /// report the first error, if any, at the end.
    async fn bulk_write(&self, collection: &str, ordered: bool, models: Vec<BulkModel>) -> CoreResult<()>;

    /// Delete the first document matching `filter`.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> CoreResult<()>;

    /// Count documents matching `filter`.
    async fn count_documents(&self, collection: &str, filter: &Filter) -> CoreResult<i64>;

    /// Create the given indexes if they don't already exist. Duplicate-key
    /// errors on creation are benign.
    async fn ensure_indexes(&self, specs: &[IndexSpec]) -> CoreResult<()>;

    /// Liveness check.
    async fn ping(&self) -> CoreResult<()>;

    /// Current connection-pool utilization, for the background monitor.
    fn pool_stats(&self) -> crate::kv::PoolStats {
        crate::kv::PoolStats::default()
    }
}

/// Build a single-entry filter — the common case (match by fingerprint).
pub fn filter_eq(field: &str, value: impl Into<Value>) -> Filter {
    let mut filter = Filter::new();
    filter.insert(field.to_string(), value.into());
    filter
}
