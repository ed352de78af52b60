//! Postgres-backed `DocumentStore`.
//!
//! There is no document-database driver anywhere in the reference stack,
//! but `sqlx` + a JSONB column gets the same shape: one `documents` table
//! per logical collection name, rows keyed by nothing but their JSONB
//! body, filters expressed as JSONB containment (`doc @> filter`). This
//! mirrors the plain `sqlx::query`/`query_as` idiom already used for the
//! tenant and subscription tables, rather than reaching for a query
//! builder.

use super::{BulkModel, Document, DocumentStore, Filter, IndexSpec, Projection, UpdateOutcome};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// `DocumentStore` backed by a `PgPool`, one JSONB column per row.
pub struct PostgresDocStore {
    pool: PgPool,
    max_pool_size: u32,
    in_flight: AtomicU32,
    round_trip_deadline: Duration,
    ping_deadline: Duration,
    index_creation_deadline: Duration,
}

impl PostgresDocStore {
    /// Connect to Postgres at `url`, pooling up to `max_pool_size` connections.
    pub async fn connect(url: &str, max_pool_size: u32, config: &Config) -> CoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_pool_size)
            .connect(url)
            .await
            .map_err(CoreError::from)?;
        Ok(Self {
            pool,
            max_pool_size,
            in_flight: AtomicU32::new(0),
            round_trip_deadline: config.store_find_deadline,
            ping_deadline: config.ping_deadline,
            index_creation_deadline: config.index_creation_deadline,
        })
    }

    fn table(collection: &str) -> String {
        format!("documents_{}", collection)
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

fn apply_projection(doc: Value, projection: &Projection) -> Value {
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

fn merge(base: &Value, set: &BTreeMap<String, Value>) -> Value {
    let mut map = match base {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    for (k, v) in set {
        map.insert(k.clone(), v.clone());
    }
    Value::Object(map)
}

#[async_trait]
impl DocumentStore for PostgresDocStore {
    async fn find_one(&self, collection: &str, filter: &Filter, projection: Projection) -> CoreResult<Option<Document>> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        let table = Self::table(collection);
        let filter_json = Value::Object(filter.clone().into_iter().collect());
        with_deadline(self.round_trip_deadline, async {
            let row: Option<(Value,)> = sqlx::query_as(&format!(
                "SELECT doc FROM {table} WHERE doc @> $1 LIMIT 1",
                table = table
            ))
            .bind(filter_json)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)?;
            Ok(row.map(|(doc,)| apply_projection(doc, &projection)))
        })
        .await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<i64>,
        projection: Projection,
    ) -> CoreResult<Vec<Document>> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        let table = Self::table(collection);
        let filter_json = Value::Object(filter.clone().into_iter().collect());
        with_deadline(self.round_trip_deadline, async {
            let rows: Vec<(Value,)> = sqlx::query_as(&format!(
                "SELECT doc FROM {table} WHERE doc @> $1 LIMIT $2",
                table = table
            ))
            .bind(filter_json)
            .bind(limit.unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
            Ok(rows
                .into_iter()
                .map(|(doc,)| apply_projection(doc, &projection))
                .collect())
        })
        .await
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> CoreResult<()> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        let table = Self::table(collection);
        with_deadline(self.round_trip_deadline, async {
            sqlx::query(&format!("INSERT INTO {table} (doc) VALUES ($1)", table = table))
                .bind(doc)
                .execute(&self.pool)
                .await
                .map_err(CoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> CoreResult<()> {
        for doc in docs {
            self.insert_one(collection, doc).await?;
        }
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set: &BTreeMap<String, Value>,
        upsert: bool,
    ) -> CoreResult<UpdateOutcome> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        let table = Self::table(collection);
        let filter_json = Value::Object(filter.clone().into_iter().collect());

        let existing: Option<(i64, Value)> = with_deadline(self.round_trip_deadline, async {
            sqlx::query_as(&format!(
                "SELECT id, doc FROM {table} WHERE doc @> $1 LIMIT 1",
                table = table
            ))
            .bind(filter_json.clone())
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)
        })
        .await?;

        match existing {
            Some((id, doc)) => {
                let merged = merge(&doc, set);
                with_deadline(self.round_trip_deadline, async {
                    sqlx::query(&format!("UPDATE {table} SET doc = $1 WHERE id = $2", table = table))
                        .bind(merged)
                        .bind(id)
                        .execute(&self.pool)
                        .await
                        .map_err(CoreError::from)?;
                    Ok(())
                })
                .await?;
                Ok(UpdateOutcome {
                    matched: 1,
                    modified: 1,
                })
            }
            None if upsert => {
                let merged = merge(&filter_json, set);
                self.insert_one(collection, merged).await?;
                Ok(UpdateOutcome {
                    matched: 0,
                    modified: 1,
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
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
        let _guard = InFlightGuard::enter(&self.in_flight);
        let table = Self::table(collection);
        let filter_json = Value::Object(filter.clone().into_iter().collect());
        with_deadline(self.round_trip_deadline, async {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE id = (SELECT id FROM {table} WHERE doc @> $1 LIMIT 1)",
                table = table
            ))
            .bind(filter_json)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
            Ok(())
        })
        .await
    }

    async fn count_documents(&self, collection: &str, filter: &Filter) -> CoreResult<i64> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        let table = Self::table(collection);
        let filter_json = Value::Object(filter.clone().into_iter().collect());
        with_deadline(self.round_trip_deadline, async {
            let (count,): (i64,) = sqlx::query_as(&format!(
                "SELECT COUNT(*) FROM {table} WHERE doc @> $1",
                table = table
            ))
            .bind(filter_json)
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::from)?;
            Ok(count)
        })
        .await
    }

    async fn ensure_indexes(&self, specs: &[IndexSpec]) -> CoreResult<()> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.index_creation_deadline, async {
            for spec in specs {
                let table = Self::table(&spec.collection);
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} (id BIGSERIAL PRIMARY KEY, doc JSONB NOT NULL)",
                    table = table
                ))
                .execute(&self.pool)
                .await
                .map_err(CoreError::from)?;

                let unique = if spec.unique { "UNIQUE" } else { "" };
                let expr: Vec<String> = spec
                    .fields
                    .iter()
                    .map(|f| format!("(doc->>'{field}')", field = f))
                    .collect();
                let statement = format!(
                    "CREATE {unique} INDEX IF NOT EXISTS {name} ON {table} ({fields})",
                    unique = unique,
                    name = spec.name,
                    table = table,
                    fields = expr.join(", ")
                );
                // Duplicate-key errors on creation are benign; any other error propagates.
                if let Err(e) = sqlx::query(&statement).execute(&self.pool).await {
                    if !e.to_string().contains("already exists") {
                        return Err(CoreError::from(e));
                    }
                }
            }
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> CoreResult<()> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        with_deadline(self.ping_deadline, async {
            sqlx::query("SELECT 1").execute(&self.pool).await.map_err(CoreError::from)?;
            Ok(())
        })
        .await
    }

    fn pool_stats(&self) -> crate::kv::PoolStats {
        crate::kv::PoolStats {
            in_use: self.in_flight.load(Ordering::SeqCst),
            max_size: self.max_pool_size,
        }
    }
}
