//! Process bootstrap — wires adapters, services, and background tasks into
//! one `AppContext` in the fixed startup order: config
//! → KV adapter → store adapter → ensure indexes → sync engine → audit sink
//! → background monitors.

use crate::audit::AuditSink;
use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::CoreResult;
use crate::kv::{KvStore, RedisKv};
use crate::monitor::PoolMonitor;
use crate::overlay::OverlayService;
use crate::phone::{HttpNotificationSink, NotificationSink, PhoneService};
use crate::store::{DocumentStore, IndexSpec, PostgresDocStore};
use crate::sync::WorkerPool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Everything a request handler needs, assembled once at startup and shared
/// behind `Arc`s for the lifetime of the process.
pub struct AppContext {
    /// Effective configuration this context was bootstrapped with.
    pub config: Config,
    /// KV adapter (write buffer, read cache, sync queues).
    pub kv: Arc<dyn KvStore>,
    /// Document store adapter.
    pub store: Arc<dyn DocumentStore>,
    /// Write-buffered cache manager.
    pub cache: Arc<CacheManager>,
    /// Self-declared overlay service.
    pub overlay: Arc<OverlayService>,
    /// Phone-verification and quarantine service.
    pub phone: Arc<PhoneService>,
    /// Audit sink.
    pub audit: Arc<AuditSink>,
    sync_pool: Mutex<Option<WorkerPool>>,
}

fn index_specs() -> Vec<IndexSpec> {
    vec![
        IndexSpec {
            collection: "citizen_overlay".to_string(),
            name: "citizen_overlay_cpf".to_string(),
            fields: vec!["cpf".to_string()],
            unique: true,
        },
        IndexSpec {
            collection: "phone_mapping".to_string(),
            name: "phone_mapping_phone".to_string(),
            fields: vec!["phone".to_string()],
            unique: true,
        },
        IndexSpec {
            collection: "phone_verification".to_string(),
            name: "phone_verification_cpf_phone".to_string(),
            fields: vec!["cpf".to_string(), "phone".to_string()],
            unique: true,
        },
        IndexSpec {
            collection: "beta_group_membership".to_string(),
            name: "beta_group_membership_name".to_string(),
            fields: vec!["name".to_string()],
            unique: true,
        },
        IndexSpec {
            collection: "user_config".to_string(),
            name: "user_config_user_id".to_string(),
            fields: vec!["user_id".to_string()],
            unique: true,
        },
        IndexSpec {
            collection: "audit_entries".to_string(),
            name: "audit_entries_expires_at".to_string(),
            fields: vec!["expires_at".to_string()],
            unique: false,
        },
        IndexSpec {
            collection: "sync_dead_letter".to_string(),
            name: "sync_dead_letter_resource_type".to_string(),
            fields: vec!["resource_type".to_string()],
            unique: false,
        },
    ]
}

impl AppContext {
    /// Bring up every adapter and background task for `config`, in the
    /// fixed startup order.
    pub async fn bootstrap(config: Config) -> CoreResult<Self> {
        let kv: Arc<dyn KvStore> = Arc::new(RedisKv::connect(&config.redis_url, config.kv_pool_size, &config).await?);
        info!("connected to kv store");

        let store: Arc<dyn DocumentStore> =
            Arc::new(PostgresDocStore::connect(&config.postgres_url, config.store_pool_size, &config).await?);
        info!("connected to document store");

        store.ensure_indexes(&index_specs()).await?;
        info!("indexes ensured");

        let cache = Arc::new(CacheManager::new(Arc::clone(&kv), Arc::clone(&store), config.clone()));
        let overlay = Arc::new(OverlayService::new(Arc::clone(&store), Arc::clone(&cache), config.clone()));
        let notifications: Arc<dyn NotificationSink> = Arc::new(HttpNotificationSink::new(config.notification_endpoint.clone()));
        let phone = Arc::new(PhoneService::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&overlay),
            notifications,
            config.clone(),
        ));

        let mut sync_pool = WorkerPool::new(Arc::clone(&kv), Arc::clone(&store), config.clone());
        sync_pool.start();
        info!(workers = config.sync_worker_count, "sync engine started");

        let audit = Arc::new(AuditSink::start(Arc::clone(&store), config.clone()));
        info!(workers = config.audit_worker_count, "audit sink started");

        PoolMonitor::new(Arc::clone(&kv), Arc::clone(&store), config.pool_monitor_interval).spawn();
        info!("pool monitor started");

        Ok(Self {
            config,
            kv,
            store,
            cache,
            overlay,
            phone,
            audit,
            sync_pool: Mutex::new(Some(sync_pool)),
        })
    }

    /// Stop accepting new sync cycles and drain in-flight jobs with a
    /// bounded deadline. Safe to call more than once; only the first call
    /// does anything.
    pub async fn shutdown(&self) {
        if let Some(pool) = self.sync_pool.lock().await.take() {
            pool.shutdown().await;
        }
    }
}
