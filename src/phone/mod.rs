//! Phone-verification state machine and quarantine.
//!
//! Verification records are never cached (policy table: read-cache TTL 0)
//! and are TTL-bound at the store, so this service talks to the document
//! store directly rather than through the cache manager — caching a value
//! that must disappear on its own would fight the store's own eviction.

pub mod notification;

pub use notification::{HttpNotificationSink, NotificationSink};

use crate::cache::CacheManager;
use crate::config::Config;
use crate::domain::{FieldValue, OverlayField, PhoneMapping, PhoneMappingStatus};
use crate::error::{CoreError, CoreResult};
use crate::overlay::{retry_on_conflict, OverlayService};
use crate::ratelimit::TokenBucket;
use crate::store::{filter_eq, DocumentStore};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

const VERIFICATION_COLLECTION: &str = "phone_verification";
const PHONE_MAPPING_COLLECTION: &str = "phone_mapping";
const PHONE_MAPPING_TYPE: &str = "phone_mapping";

/// A pending or spent verification code for one (CPF, phone) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// CPF the phone is being verified for.
    pub cpf: String,
    /// Phone number awaiting verification.
    pub phone: String,
    /// The 6-digit code, always formatted with leading zeros.
    pub code: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp: `created_at + verification_ttl`.
    pub expires_at: DateTime<Utc>,
}

/// Outcome of `ConfirmVerification` — not a `CoreError`, since "expired" and
/// "invalid code" are expected domain outcomes rather than failures of the
/// verification service itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The code matched; the overlay's phone field was promoted.
    Verified,
    /// No record exists, or it exists but is past its expiration.
    Expired,
    /// A record exists and is live, but the supplied code didn't match.
    Invalid,
}

/// Generate a 6-digit code uniform over `[000000, 999999]`, leading zeros
/// preserved.
fn generate_code() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..=999_999);
    format!("{value:06}")
}

/// Phone verification, quarantine, and the rate-limited notification path.
pub struct PhoneService {
    store: Arc<dyn DocumentStore>,
    cache: Arc<CacheManager>,
    overlay: Arc<OverlayService>,
    notifications: Arc<dyn NotificationSink>,
    limiter: TokenBucket,
    config: Config,
}

impl PhoneService {
    /// Build the service. `limiter` is shared process-wide.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<CacheManager>,
        overlay: Arc<OverlayService>,
        notifications: Arc<dyn NotificationSink>,
        config: Config,
    ) -> Self {
        let limiter = TokenBucket::new(config.notification_burst, config.notification_rate_per_sec);
        Self {
            store,
            cache,
            overlay,
            notifications,
            limiter,
            config,
        }
    }

    /// Handles a request to verify a phone number for a CPF.
    pub async fn request_verification(&self, cpf: &str, phone: &str) -> CoreResult<()> {
        if !self.limiter.check(1).is_allowed() {
            return Err(CoreError::Transient("notification rate limit exceeded".to_string()));
        }

        let code = generate_code();
        let now = Utc::now();
        let record = VerificationRecord {
            cpf: cpf.to_string(),
            phone: phone.to_string(),
            code: code.clone(),
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.config.verification_ttl).unwrap(),
        };

        let filter = verification_filter(cpf, phone);
        let set = verification_set(&record)?;
        self.store
            .update_one(VERIFICATION_COLLECTION, &filter, &set, true)
            .await?;

        // Notification failure is a hard error; the pending phone is staged
        // only after the notification succeeds.
        self.notifications.send_code(phone, &code).await?;

        self.overlay.set_pending_phone(cpf, Some(phone.to_string())).await?;
        Ok(())
    }

    /// Confirms a previously issued verification code for a CPF and phone.
    pub async fn confirm_verification(&self, cpf: &str, phone: &str, code: &str) -> CoreResult<ConfirmOutcome> {
        let filter = verification_filter(cpf, phone);
        let record = self
            .store
            .find_one(VERIFICATION_COLLECTION, &filter, None)
            .await?;

        let record: VerificationRecord = match record {
            Some(doc) => serde_json::from_value(doc)?,
            None => return Ok(ConfirmOutcome::Expired),
        };

        if record.expires_at <= Utc::now() {
            self.store.delete_one(VERIFICATION_COLLECTION, &filter).await?;
            return Ok(ConfirmOutcome::Expired);
        }

        if record.code != code {
            return Ok(ConfirmOutcome::Invalid);
        }

        let current_version = self.overlay.get_overlay(cpf).await?.map(|o| o.version).unwrap_or(0);
        let phone_owned = phone.to_string();
        retry_on_conflict(
            self.config.overlay_update_max_attempts,
            self.config.sync_retry_base_backoff,
            self.config.sync_shutdown_deadline,
            current_version,
            |expected| {
                let phone = phone_owned.clone();
                async move {
                    self.overlay
                        .update_field(cpf, OverlayField::Phone, FieldValue::Text(phone), expected)
                        .await
                }
            },
        )
        .await?;

        self.overlay.set_pending_phone(cpf, None).await?;
        self.store.delete_one(VERIFICATION_COLLECTION, &filter).await?;
        Ok(ConfirmOutcome::Verified)
    }

    /// Opt a phone out, entering quarantine for `config.quarantine_duration`.
    pub async fn quarantine(&self, phone: &str) -> CoreResult<()> {
        let mut mapping = self.get_phone_mapping(phone).await?.unwrap_or_else(|| PhoneMapping::new(phone.to_string()));
        mapping.quarantine(Utc::now(), chrono::Duration::from_std(self.config.quarantine_duration).unwrap());
        self.persist_phone_mapping(&mapping).await?;
        Ok(())
    }

    /// Read a phone mapping, auto-releasing it if its quarantine window has
    /// passed: a past-due quarantine must read as released.
    pub async fn get_phone_mapping(&self, phone: &str) -> CoreResult<Option<PhoneMapping>> {
        let filter = filter_eq("phone", phone);
        let doc = self
            .cache
            .get_effective(PHONE_MAPPING_TYPE, phone, PHONE_MAPPING_COLLECTION, &filter)
            .await?;
        let mapping: Option<PhoneMapping> = doc.map(serde_json::from_value).transpose()?;

        match mapping {
            Some(mut m) if m.status == PhoneMappingStatus::Quarantined => {
                let effective = m.effective_status(Utc::now());
                if effective != PhoneMappingStatus::Quarantined {
                    m.status = effective;
                    m.quarantine_until = None;
                    self.persist_phone_mapping(&m).await?;
                }
                Ok(Some(m))
            }
            other => Ok(other),
        }
    }

    /// Stage a phone mapping write through the write buffer rather than
    /// writing the store directly: unlike the overlay's version-gated
    /// conditional upsert, a phone mapping write has no optimistic-
    /// concurrency check to protect, so it takes the ordinary staged-write
    /// path and lets the sync engine flush it.
    async fn persist_phone_mapping(&self, mapping: &PhoneMapping) -> CoreResult<()> {
        let value = serde_json::to_value(mapping)?;
        self.cache
            .stage_write(PHONE_MAPPING_TYPE, &mapping.phone, PHONE_MAPPING_TYPE, &value)
            .await
    }
}

fn verification_filter(cpf: &str, phone: &str) -> crate::store::Filter {
    let mut filter = BTreeMap::new();
    filter.insert("cpf".to_string(), json!(cpf));
    filter.insert("phone".to_string(), json!(phone));
    filter
}

fn verification_set(record: &VerificationRecord) -> CoreResult<BTreeMap<String, serde_json::Value>> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        _ => unreachable!("VerificationRecord always serializes to an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::store::MemoryDocStore;
    use notification::MemoryNotificationSink;

    fn service() -> (PhoneService, Arc<MemoryNotificationSink>) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocStore::new());
        let kv = Arc::new(MemoryKv::new());
        let cache = Arc::new(CacheManager::new(kv, Arc::clone(&store), Config::default()));
        let overlay = Arc::new(OverlayService::new(Arc::clone(&store), Arc::clone(&cache), Config::default()));
        let sink = Arc::new(MemoryNotificationSink::default());
        let svc = PhoneService::new(store, cache, overlay, sink.clone(), Config::default());
        (svc, sink)
    }

    #[tokio::test]
    async fn happy_path_promotes_the_phone_and_clears_the_record() {
        let (svc, sink) = service();
        svc.request_verification("52998224725", "+5521987654321").await.unwrap();
        let code = sink.last_code("+5521987654321").unwrap();

        let outcome = svc
            .confirm_verification("52998224725", "+5521987654321", &code)
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Verified);

        let overlay = svc.overlay.get_overlay("52998224725").await.unwrap().unwrap();
        assert_eq!(overlay.phone, Some("+5521987654321".to_string()));
        assert_eq!(overlay.pending_phone, None);

        let again = svc
            .confirm_verification("52998224725", "+5521987654321", &code)
            .await
            .unwrap();
        assert_eq!(again, ConfirmOutcome::Expired);
    }

    #[tokio::test]
    async fn wrong_code_is_invalid_not_expired() {
        let (svc, sink) = service();
        svc.request_verification("11144477735", "+5521900000000").await.unwrap();
        let code = sink.last_code("+5521900000000").unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let outcome = svc.confirm_verification("11144477735", "+5521900000000", wrong).await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Invalid);
    }

    #[tokio::test]
    async fn expired_record_reports_expired_regardless_of_code() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocStore::new());
        let kv = Arc::new(MemoryKv::new());
        let mut config = Config::default();
        config.verification_ttl = std::time::Duration::from_millis(1);
        let cache = Arc::new(CacheManager::new(kv, Arc::clone(&store), config.clone()));
        let overlay = Arc::new(OverlayService::new(Arc::clone(&store), Arc::clone(&cache), config.clone()));
        let sink = Arc::new(MemoryNotificationSink::default());
        let svc = PhoneService::new(store, cache, overlay, sink.clone(), config);

        svc.request_verification("11144477735", "+5521900000000").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let outcome = svc.confirm_verification("11144477735", "+5521900000000", "000000").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Expired);
    }

    #[tokio::test]
    async fn quarantine_auto_releases_on_next_read() {
        let mut config_override = Config::default();
        config_override.quarantine_duration = std::time::Duration::from_millis(1);
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocStore::new());
        let kv = Arc::new(MemoryKv::new());
        let cache = Arc::new(CacheManager::new(kv, Arc::clone(&store), config_override.clone()));
        let overlay = Arc::new(OverlayService::new(Arc::clone(&store), Arc::clone(&cache), config_override.clone()));
        let sink = Arc::new(MemoryNotificationSink::default());
        let svc = PhoneService::new(store, cache, overlay, sink, config_override);

        svc.quarantine("+5521900000000").await.unwrap();
        let immediately = svc.get_phone_mapping("+5521900000000").await.unwrap().unwrap();
        assert_eq!(immediately.status, PhoneMappingStatus::Quarantined);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let later = svc.get_phone_mapping("+5521900000000").await.unwrap().unwrap();
        assert_eq!(later.status, PhoneMappingStatus::Released);
    }
}
