//! In-memory `DocumentStore` fake used by unit and integration tests.

use super::{BulkModel, Document, DocumentStore, Filter, IndexSpec, Projection, UpdateOutcome};
use crate::error::CoreResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// An in-process `DocumentStore` backed by `Vec<Document>` per collection.
#[derive(Default)]
pub struct MemoryDocStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryDocStore {
    /// A fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(doc: &Document, filter: &Filter) -> bool {
    filter.iter().all(|(field, expected)| doc.get(field) == Some(expected))
}

fn apply_projection(doc: Document, projection: &Projection) -> Document {
    match projection {
        None => doc,
        Some(fields) => {
            let mut out = serde_json::Map::new();
            if let Value::Object(map) = &doc {
                for field in fields {
                    if let Some(v) = map.get(field) {
                        out.insert(field.clone(), v.clone());
                    }
                }
            }
            Value::Object(out)
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocStore {
    async fn find_one(&self, collection: &str, filter: &Filter, projection: Projection) -> CoreResult<Option<Document>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| matches(d, filter)).cloned())
            .map(|d| apply_projection(d, &projection)))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<i64>,
        projection: Projection,
    ) -> CoreResult<Vec<Document>> {
        let collections = self.collections.read();
        let mut results: Vec<Document> = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches(d, filter)).cloned().collect())
            .unwrap_or_default();
        if let Some(limit) = limit {
            results.truncate(limit.max(0) as usize);
        }
        Ok(results.into_iter().map(|d| apply_projection(d, &projection)).collect())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> CoreResult<()> {
        self.collections.write().entry(collection.to_string()).or_default().push(doc);
        Ok(())
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> CoreResult<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set: &BTreeMap<String, Value>,
        upsert: bool,
    ) -> CoreResult<UpdateOutcome> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();

        if let Some(doc) = docs.iter_mut().find(|d| matches(d, filter)) {
            if let Value::Object(map) = doc {
                for (k, v) in set {
                    map.insert(k.clone(), v.clone());
                }
            }
            return Ok(UpdateOutcome {
                matched: 1,
                modified: 1,
            });
        }

        if upsert {
            let mut map = serde_json::Map::new();
            for (k, v) in filter {
                map.insert(k.clone(), v.clone());
            }
            for (k, v) in set {
                map.insert(k.clone(), v.clone());
            }
            docs.push(Value::Object(map));
            return Ok(UpdateOutcome {
                matched: 0,
                modified: 1,
            });
        }

        Ok(UpdateOutcome::default())
    }

    async fn bulk_write(&self, collection: &str, ordered: bool, models: Vec<BulkModel>) -> CoreResult<()> {
        let mut first_error = None;
        for model in models {
            let result = match model {
                BulkModel::Insert { doc } => self.insert_one(collection, doc).await,
                BulkModel::Update { filter, set, upsert } => {
                    self.update_one(collection, &filter, &set, upsert).await.map(|_| ())
                }
                BulkModel::Delete { filter } => self.delete_one(collection, &filter).await,
            };
            if let Err(e) = result {
                if ordered {
                    return Err(e);
                }
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> CoreResult<()> {
        let mut collections = self.collections.write();
        if let Some(docs) = collections.get_mut(collection) {
            if let Some(pos) = docs.iter().position(|d| matches(d, filter)) {
                docs.remove(pos);
            }
        }
        Ok(())
    }

    async fn count_documents(&self, collection: &str, filter: &Filter) -> CoreResult<i64> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches(d, filter)).count() as i64)
            .unwrap_or(0))
    }

    async fn ensure_indexes(&self, _specs: &[IndexSpec]) -> CoreResult<()> {
        Ok(())
    }

    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn update_one_reports_matched_and_modified() {
        let store = MemoryDocStore::new();
        store
            .insert_one("overlay", json!({"cpf": "1", "version": 3}))
            .await
            .unwrap();

        let filter = super::super::filter_eq("cpf", "1");
        let mut set = BTreeMap::new();
        set.insert("version".to_string(), json!(4));

        let outcome = store.update_one("overlay", &filter, &set, false).await.unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.modified, 1);

        let doc = store.find_one("overlay", &filter, None).await.unwrap().unwrap();
        assert_eq!(doc["version"], json!(4));
    }

    #[tokio::test]
    async fn update_one_on_wrong_version_matches_nothing() {
        let store = MemoryDocStore::new();
        store
            .insert_one("overlay", json!({"cpf": "1", "version": 3}))
            .await
            .unwrap();

        let mut filter = Filter::new();
        filter.insert("cpf".to_string(), json!("1"));
        filter.insert("version".to_string(), json!(2));

        let outcome = store
            .update_one("overlay", &filter, &BTreeMap::new(), false)
            .await
            .unwrap();
        assert_eq!(outcome.modified, 0);
    }
}
