//! Self-declared update service — optimistic concurrency over citizen
//! overlays.

use crate::cache::CacheManager;
use crate::config::Config;
use crate::domain::{CitizenOverlay, CitizenRecord, CitizenView, FieldValue, OverlayField};
use crate::error::{CoreError, CoreResult};
use crate::store::{filter_eq, DocumentStore};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

const COLLECTION: &str = "citizen_overlay";

fn field_name(field: OverlayField) -> &'static str {
    match field {
        OverlayField::Address => "address",
        OverlayField::Phone => "phone",
        OverlayField::Email => "email",
        OverlayField::Ethnicity => "ethnicity",
        OverlayField::ExhibitionName => "exhibition_name",
    }
}

fn field_value_json(value: &FieldValue) -> CoreResult<Value> {
    match value {
        FieldValue::Text(s) => Ok(json!(s)),
        FieldValue::Ethnicity(e) => serde_json::to_value(e).map_err(CoreError::from),
    }
}

/// Set `field` on a freshly created overlay.
fn apply_field(overlay: &mut CitizenOverlay, field: OverlayField, value: FieldValue) -> CoreResult<()> {
    match (field, value) {
        (OverlayField::Address, FieldValue::Text(s)) => overlay.address = Some(s),
        (OverlayField::Phone, FieldValue::Text(s)) => overlay.phone = Some(s),
        (OverlayField::Email, FieldValue::Text(s)) => overlay.email = Some(s),
        (OverlayField::ExhibitionName, FieldValue::Text(s)) => overlay.exhibition_name = Some(s),
        (OverlayField::Ethnicity, FieldValue::Ethnicity(e)) => overlay.ethnicity = Some(e),
        (field, value) => {
            return Err(CoreError::Validation(format!(
                "field {field:?} does not accept value {value:?}"
            )))
        }
    }
    Ok(())
}

/// Reads overlays through the cache manager and mutates them via a
/// conditional upsert gated by an expected version.
pub struct OverlayService {
    store: Arc<dyn DocumentStore>,
    cache: Arc<CacheManager>,
    #[allow(dead_code)]
    config: Config,
}

impl OverlayService {
    /// Build the service over the given store and cache manager.
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<CacheManager>, config: Config) -> Self {
        Self { store, cache, config }
    }

    /// Fetch the overlay for a CPF, through the cache manager.
    pub async fn get_overlay(&self, cpf: &str) -> CoreResult<Option<CitizenOverlay>> {
        let filter = filter_eq("cpf", cpf);
        let doc = self
            .cache
            .get_effective(COLLECTION, cpf, COLLECTION, &filter)
            .await?;
        doc.map(|d| serde_json::from_value(d).map_err(CoreError::from)).transpose()
    }

    /// Compose the effective citizen view for a base record.
    pub async fn get_view(&self, base: &CitizenRecord) -> CoreResult<CitizenView> {
        let overlay = self.get_overlay(&base.cpf).await?;
        Ok(CitizenView::compose(base, overlay.as_ref()))
    }

    /// Update a single overlay field, gated by `expected_version`. Queries
    /// and modifies only that field rather than rehydrating the full
    /// overlay. Returns the new version on success.
    ///
    /// `expected_version == 0` is special: it both matches a not-yet-created
    /// overlay (absent document) and the first edit's expected starting
    /// version, so only that case is allowed to upsert a brand-new overlay.
    /// Any other expected version against an absent overlay is `NotFound`,
    /// never a silent create.
    pub async fn update_field(
        &self,
        cpf: &str,
        field: OverlayField,
        value: FieldValue,
        expected_version: i64,
    ) -> CoreResult<i64> {
        let mut filter = BTreeMap::new();
        filter.insert("cpf".to_string(), json!(cpf));
        filter.insert("version".to_string(), json!(expected_version));

        let mut set = BTreeMap::new();
        set.insert(field_name(field).to_string(), field_value_json(&value)?);
        set.insert("version".to_string(), json!(expected_version + 1));
        set.insert("updated_at".to_string(), json!(Utc::now()));

        // Never upsert through `update_one`: its filter pins `version`, and a
        // blind upsert on a version mismatch would insert a second document
        // for a cpf that already has one. Existence is checked explicitly
        // below instead, and a fresh overlay is only ever created via
        // `insert_one`.
        let outcome = self.store.update_one(COLLECTION, &filter, &set, false).await?;

        if outcome.modified == 1 {
            self.cache
                .invalidate(&[(COLLECTION.to_string(), cpf.to_string())])
                .await;
            return Ok(expected_version + 1);
        }

        match self.get_overlay(cpf).await? {
            None if expected_version == 0 => {
                let mut overlay = CitizenOverlay::new(cpf.to_string());
                overlay.version = 1;
                overlay.updated_at = Utc::now();
                apply_field(&mut overlay, field, value)?;
                self.store.insert_one(COLLECTION, serde_json::to_value(&overlay)?).await?;
                self.cache
                    .invalidate(&[(COLLECTION.to_string(), cpf.to_string())])
                    .await;
                Ok(1)
            }
            None => Err(CoreError::NotFound(format!("overlay for cpf {cpf}"))),
            Some(current) => Err(CoreError::Conflict {
                expected: expected_version,
                observed: current.version,
            }),
        }
    }

    /// Set or clear the overlay's pending-phone field directly. This
    /// bypasses the optimistic-concurrency version check: the pending phone
    /// is not one of the five versioned fields, and is always
    /// written by the phone-verification state machine rather than a
    /// client-submitted patch, so there is no concurrent-writer conflict to
    /// guard against.
    pub async fn set_pending_phone(&self, cpf: &str, phone: Option<String>) -> CoreResult<()> {
        let filter = filter_eq("cpf", cpf);

        if self.get_overlay(cpf).await?.is_none() {
            let mut overlay = CitizenOverlay::new(cpf.to_string());
            overlay.pending_phone = phone;
            self.store.insert_one(COLLECTION, serde_json::to_value(overlay)?).await?;
        } else {
            let mut set = BTreeMap::new();
            set.insert("pending_phone".to_string(), json!(phone));
            self.store.update_one(COLLECTION, &filter, &set, false).await?;
        }

        self.cache
            .invalidate(&[(COLLECTION.to_string(), cpf.to_string())])
            .await;
        Ok(())
    }
}

/// Bounded retry wrapper: replays `attempt` on `Conflict`, feeding back the
/// observed version as the next expected version, with exponential backoff,
/// up to `max_attempts` or until `deadline` elapses.
/// Any non-conflict error surfaces immediately.
pub async fn retry_on_conflict<F, Fut>(
    max_attempts: u32,
    base_backoff: Duration,
    deadline: Duration,
    mut expected_version: i64,
    mut attempt: F,
) -> CoreResult<i64>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = CoreResult<i64>>,
{
    let start = Instant::now();
    let mut backoff = base_backoff;

    for attempt_no in 0..max_attempts {
        match attempt(expected_version).await {
            Ok(new_version) => return Ok(new_version),
            Err(CoreError::Conflict { observed, .. }) => {
                if attempt_no + 1 >= max_attempts || start.elapsed() >= deadline {
                    return Err(CoreError::Conflict {
                        expected: expected_version,
                        observed,
                    });
                }
                expected_version = observed;
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => return Err(err),
        }
    }
    unreachable!("loop always returns within max_attempts iterations")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ethnicity;
    use crate::kv::MemoryKv;
    use crate::store::MemoryDocStore;

    fn service() -> OverlayService {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocStore::new());
        let kv = Arc::new(MemoryKv::new());
        let cache = Arc::new(CacheManager::new(kv, Arc::clone(&store), Config::default()));
        OverlayService::new(store, cache, Config::default())
    }

    #[tokio::test]
    async fn first_edit_creates_the_overlay_at_version_one() {
        let svc = service();
        let version = svc
            .update_field("11144477735", OverlayField::Email, FieldValue::Text("a@x".into()), 0)
            .await
            .unwrap();
        assert_eq!(version, 1);

        let overlay = svc.get_overlay("11144477735").await.unwrap().unwrap();
        assert_eq!(overlay.email, Some("a@x".to_string()));
        assert_eq!(overlay.version, 1);
    }

    #[tokio::test]
    async fn concurrent_updates_one_succeeds_one_conflicts() {
        let svc = service();
        svc.update_field("cpf1", OverlayField::Email, FieldValue::Text("seed@x".into()), 0)
            .await
            .unwrap();
        // version is now 1

        let ok = svc
            .update_field("cpf1", OverlayField::Email, FieldValue::Text("a@x".into()), 1)
            .await;
        assert_eq!(ok.unwrap(), 2);

        let conflict = svc
            .update_field("cpf1", OverlayField::Ethnicity, FieldValue::Ethnicity(Ethnicity::Parda), 1)
            .await;
        match conflict {
            Err(CoreError::Conflict { expected, observed }) => {
                assert_eq!(expected, 1);
                assert_eq!(observed, 2);
            }
            other => panic!("expected Conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn retry_on_conflict_replays_with_the_observed_version() {
        let svc = service();
        svc.update_field("cpf2", OverlayField::Email, FieldValue::Text("seed@x".into()), 0)
            .await
            .unwrap();
        // actual version is now 1, but caller starts out thinking it's 0

        let result = retry_on_conflict(5, Duration::from_millis(1), Duration::from_secs(1), 0, |expected| {
            svc.update_field("cpf2", OverlayField::ExhibitionName, FieldValue::Text("Maria".into()), expected)
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn update_against_a_nonexistent_overlay_with_nonzero_version_is_not_found() {
        let svc = service();
        let result = svc
            .update_field("ghost", OverlayField::Email, FieldValue::Text("a@x".into()), 3)
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }
}
