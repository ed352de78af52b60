//! End-to-end scenarios seeded against in-memory fakes of `KvStore` /
//! `DocumentStore`: stage-then-read, conflicting concurrent updates,
//! verification happy path and expiry, quarantine auto-release, and audit
//! redaction.

use cidadao_core::audit::{AuditEntryBuilder, AuditSink};
use cidadao_core::cache::CacheManager;
use cidadao_core::config::Config;
use cidadao_core::domain::{CitizenOverlay, CitizenRecord, Ethnicity, FieldValue, OverlayField};
use cidadao_core::kv::{KvStore, MemoryKv};
use cidadao_core::overlay::OverlayService;
use cidadao_core::phone::notification::MemoryNotificationSink;
use cidadao_core::phone::{ConfirmOutcome, PhoneService};
use cidadao_core::store::{filter_eq, DocumentStore, MemoryDocStore};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn DocumentStore>,
    cache: Arc<CacheManager>,
    overlay: Arc<OverlayService>,
    phone: Arc<PhoneService>,
    notifications: Arc<MemoryNotificationSink>,
    config: Config,
}

fn harness(config: Config) -> Harness {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocStore::new());
    let cache = Arc::new(CacheManager::new(Arc::clone(&kv), Arc::clone(&store), config.clone()));
    let overlay = Arc::new(OverlayService::new(Arc::clone(&store), Arc::clone(&cache), config.clone()));
    let notifications = Arc::new(MemoryNotificationSink::default());
    let phone = Arc::new(PhoneService::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        Arc::clone(&overlay),
        notifications.clone(),
        config.clone(),
    ));
    Harness {
        kv,
        store,
        cache,
        overlay,
        phone,
        notifications,
        config,
    }
}

fn base_record(cpf: &str) -> CitizenRecord {
    CitizenRecord {
        cpf: cpf.to_string(),
        name: "Maria Silva".to_string(),
        birth_date: chrono::Utc::now(),
        address: Some("Rua Base, 1".to_string()),
        phone: Some("+5521900000000".to_string()),
        email: Some("base@example.com".to_string()),
    }
}

#[tokio::test]
async fn overlay_updates_land_in_the_store_synchronously_with_immediate_consistency() {
    let h = harness(Config::default());
    let base = base_record("11144477735");

    h.overlay
        .update_field(&base.cpf, OverlayField::Address, FieldValue::Text("Rua Nova, 42".to_string()), 0)
        .await
        .unwrap();

    // The version-gated conditional upsert is a direct, synchronous store
    // write: there's no KV compare-and-swap primitive strong enough to
    // serialize concurrent editors through the write buffer, so the overlay
    // service bypasses it and only uses the cache manager for invalidation.
    let view = h.overlay.get_view(&base).await.unwrap();
    assert_eq!(view.address, Some("Rua Nova, 42".to_string()));

    let stored = h
        .store
        .find_one("citizen_overlay", &filter_eq("cpf", base.cpf.clone()), None)
        .await
        .unwrap();
    assert!(stored.is_some(), "conditional upsert writes straight to the store");
}

#[tokio::test]
async fn two_concurrent_editors_only_one_wins() {
    let h = harness(Config::default());
    let cpf = "52998224725";
    h.overlay
        .update_field(cpf, OverlayField::Email, FieldValue::Text("seed@example.com".to_string()), 0)
        .await
        .unwrap();

    // Both clients read version 1 and race to submit an edit against it.
    let editor_a = h
        .overlay
        .update_field(cpf, OverlayField::Email, FieldValue::Text("a@example.com".to_string()), 1)
        .await;
    let editor_b = h
        .overlay
        .update_field(cpf, OverlayField::Ethnicity, FieldValue::Ethnicity(Ethnicity::Parda), 1)
        .await;

    let outcomes = [editor_a.is_ok(), editor_b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1, "exactly one editor should win the race");

    let overlay: CitizenOverlay = serde_json::from_value(
        h.store
            .find_one("citizen_overlay", &filter_eq("cpf", cpf), None)
            .await
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(overlay.version, 2);
}

#[tokio::test]
async fn phone_verification_happy_path_then_confirm_outright_expires() {
    let h = harness(Config::default());
    let cpf = "11144477735";
    let phone = "+5521987654321";

    h.phone.request_verification(cpf, phone).await.unwrap();
    let code = h.notifications.last_code(phone).unwrap();

    let outcome = h.phone.confirm_verification(cpf, phone, &code).await.unwrap();
    assert_eq!(outcome, ConfirmOutcome::Verified);

    let base = base_record(cpf);
    let view = h.overlay.get_view(&base).await.unwrap();
    assert_eq!(view.phone, Some(phone.to_string()));
    assert_eq!(view.pending_phone, None);

    // The verification record was consumed; confirming again reports expired.
    let again = h.phone.confirm_verification(cpf, phone, &code).await.unwrap();
    assert_eq!(again, ConfirmOutcome::Expired);
}

#[tokio::test]
async fn quarantined_phone_releases_itself_once_the_window_passes() {
    let mut config = Config::default();
    config.quarantine_duration = Duration::from_millis(1);
    let h = harness(config);
    let phone = "+5521900000001";

    h.phone.quarantine(phone).await.unwrap();
    let mapping = h.phone.get_phone_mapping(phone).await.unwrap().unwrap();
    assert_eq!(mapping.status, cidadao_core::domain::PhoneMappingStatus::Quarantined);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let mapping = h.phone.get_phone_mapping(phone).await.unwrap().unwrap();
    assert_eq!(mapping.status, cidadao_core::domain::PhoneMappingStatus::Released);
}

#[tokio::test]
async fn audit_entries_redact_sensitive_fields_before_landing_in_the_store() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocStore::new());
    let mut config = Config::default();
    config.audit_batch_interval = Duration::from_millis(10);
    let sink = AuditSink::start(Arc::clone(&store), config.clone());

    let entry = AuditEntryBuilder::new("overlay.update_field", "citizen_overlay", "11144477735")
        .old_value(serde_json::json!({"token": "super-secret"}))
        .build(config.audit_retention);
    let entry_id = entry.id;
    sink.record(entry).await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let stored = store
        .find_one("audit_entries", &filter_eq("id", entry_id.to_string()), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["old_value"]["token"], serde_json::json!("[REDACTED]"));
}
