//! Process-level configuration.
//!
//! All tuning parameters (TTLs, pool sizes, worker counts, quarantine
//! duration, notification limiter rate) are consumed from the environment
//! at startup and never re-read afterwards. No config-loading crate is used
//! here — the reference stack doesn't carry one either, and plain
//! `std::env` parsing with explicit defaults is the idiomatic choice for a
//! flat set of scalars like this.

use std::time::Duration;

/// Read-cache / write-buffer tuning for one resource type, matching the
/// policy table in the cache manager design.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    /// Read-cache TTL. `None` means the resource type is never cached
    /// (phone verification).
    pub read_cache_ttl: Option<Duration>,
}

/// Top-level configuration for the core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection string backing the KV store adapter.
    pub redis_url: String,
    /// Postgres connection string backing the document store adapter.
    pub postgres_url: String,

    /// Read-cache TTL for citizen overlay / wallet / maintenance-request views.
    pub citizen_cache_ttl: Duration,
    /// Read-cache TTL for phone mapping documents.
    pub phone_mapping_cache_ttl: Duration,
    /// Read-cache TTL for beta-group membership documents.
    pub beta_group_cache_ttl: Duration,
    /// Read-cache TTL for user config documents.
    pub user_config_cache_ttl: Duration,

    /// Sync engine worker pool size.
    pub sync_worker_count: usize,
    /// Queue names the sync engine drains, in round-robin order.
    pub sync_queue_names: Vec<String>,
    /// Max jobs a worker processes per wake-up cycle before sleeping.
    pub sync_jobs_per_cycle: usize,
    /// Sleep interval between cycles when a worker's queues are empty.
    pub sync_poll_interval: Duration,
    /// Max in-worker retry attempts for a transient store error before the
    /// job is re-enqueued at the tail of its queue.
    pub sync_max_retries: u32,
    /// Base backoff for the sync engine's retry loop (doubles per attempt).
    pub sync_retry_base_backoff: Duration,
    /// Deadline for draining in-flight jobs during shutdown.
    pub sync_shutdown_deadline: Duration,

    /// Verification code TTL.
    pub verification_ttl: Duration,
    /// Phone-number quarantine duration after opt-out.
    pub quarantine_duration: Duration,
    /// Outbound notification rate limit, in requests per second.
    pub notification_rate_per_sec: f64,
    /// Outbound notification burst capacity.
    pub notification_burst: u64,

    /// Audit sink channel capacity.
    pub audit_buffer_capacity: usize,
    /// Audit sink worker count.
    pub audit_worker_count: usize,
    /// Max entries flushed per audit batch.
    pub audit_batch_size: usize,
    /// Max time an audit batch waits to fill before flushing anyway.
    pub audit_batch_interval: Duration,
    /// Deadline for the synchronous single-insert backpressure fallback.
    pub audit_fallback_deadline: Duration,
    /// Audit entry retention, applied at insertion time.
    pub audit_retention: Duration,

    /// Deadline for a single KV or document-store round trip (store finds
    /// and every other KV/store call that doesn't have a more specific
    /// deadline of its own).
    pub store_find_deadline: Duration,
    /// Deadline for a KV/store ping.
    pub ping_deadline: Duration,
    /// Deadline for index creation at startup.
    pub index_creation_deadline: Duration,

    /// Retry cap for the optimistic-update retry helper.
    pub overlay_update_max_attempts: u32,

    /// KV connection pool size.
    pub kv_pool_size: u32,
    /// Document store connection pool size.
    pub store_pool_size: u32,

    /// Endpoint the default HTTP notification sink posts codes to. The
    /// production WhatsApp HSM client is out of scope; this is just
    /// enough to exercise the state machine end-to-end.
    pub notification_endpoint: String,
    /// How often the connection-pool monitor polls `pool_stats`.
    pub pool_monitor_interval: Duration,
    /// HTTP listen address for the thin outer router.
    pub http_listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            postgres_url: "postgres://localhost/cidadao".to_string(),

            citizen_cache_ttl: Duration::from_secs(60 * 60),
            phone_mapping_cache_ttl: Duration::from_secs(24 * 60 * 60),
            beta_group_cache_ttl: Duration::from_secs(24 * 60 * 60),
            user_config_cache_ttl: Duration::from_secs(60 * 60),

            sync_worker_count: 10,
            // The real resource types this core stages through the write
            // buffer. Phone verification has a cache-policy row but no
            // write buffer (never cached, never enqueued), so it never gets
            // a queue. Dead-lettering writes straight to the dead-letter
            // collection, bypassing queues entirely, so it has no queue
            // name either.
            sync_queue_names: vec![
                "citizen_overlay".to_string(),
                "phone_mapping".to_string(),
                "beta_group_membership".to_string(),
                "user_config".to_string(),
            ],
            sync_jobs_per_cycle: 3,
            sync_poll_interval: Duration::from_millis(50),
            sync_max_retries: 3,
            sync_retry_base_backoff: Duration::from_millis(100),
            sync_shutdown_deadline: Duration::from_secs(10),

            verification_ttl: Duration::from_secs(5 * 60),
            quarantine_duration: Duration::from_secs(4_320 * 3_600),
            notification_rate_per_sec: 5.0,
            notification_burst: 10,

            audit_buffer_capacity: 1_000,
            audit_worker_count: 5,
            audit_batch_size: 100,
            audit_batch_interval: Duration::from_millis(100),
            audit_fallback_deadline: Duration::from_secs(5),
            audit_retention: Duration::from_secs(365 * 86_400),

            store_find_deadline: Duration::from_secs(10),
            ping_deadline: Duration::from_secs(5),
            index_creation_deadline: Duration::from_secs(30),

            overlay_update_max_attempts: 5,

            kv_pool_size: 20,
            store_pool_size: 20,

            notification_endpoint: "http://127.0.0.1:8088/notify".to_string(),
            pool_monitor_interval: Duration::from_secs(30),
            http_listen_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to
    /// [`Config::default`] for any variable that is unset or fails to
    /// parse.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CIDADAO_REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(url) = std::env::var("CIDADAO_POSTGRES_URL") {
            config.postgres_url = url;
        }
        if let Some(v) = env_usize("CIDADAO_SYNC_WORKER_COUNT") {
            config.sync_worker_count = v;
        }
        if let Some(v) = env_usize("CIDADAO_SYNC_JOBS_PER_CYCLE") {
            config.sync_jobs_per_cycle = v;
        }
        if let Some(v) = env_u64("CIDADAO_SYNC_POLL_INTERVAL_MS") {
            config.sync_poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("CIDADAO_VERIFICATION_TTL_SECS") {
            config.verification_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("CIDADAO_QUARANTINE_HOURS") {
            config.quarantine_duration = Duration::from_secs(v * 3_600);
        }
        if let Some(v) = env_f64("CIDADAO_NOTIFICATION_RATE_PER_SEC") {
            config.notification_rate_per_sec = v;
        }
        if let Some(v) = env_usize("CIDADAO_AUDIT_BUFFER_CAPACITY") {
            config.audit_buffer_capacity = v;
        }
        if let Some(v) = env_usize("CIDADAO_AUDIT_WORKER_COUNT") {
            config.audit_worker_count = v;
        }
        if let Ok(endpoint) = std::env::var("CIDADAO_NOTIFICATION_ENDPOINT") {
            config.notification_endpoint = endpoint;
        }
        if let Ok(addr) = std::env::var("CIDADAO_HTTP_LISTEN_ADDR") {
            config.http_listen_addr = addr;
        }
        config
    }

    /// Look up the read-cache policy for a resource-type tag, matching the
    /// policy table in the component design.
    pub fn cache_policy(&self, resource_type: &str) -> CachePolicy {
        match resource_type {
            "citizen_overlay" => CachePolicy {
                read_cache_ttl: Some(self.citizen_cache_ttl),
            },
            "phone_verification" => CachePolicy {
                read_cache_ttl: None,
            },
            "phone_mapping" => CachePolicy {
                read_cache_ttl: Some(self.phone_mapping_cache_ttl),
            },
            "beta_group_membership" => CachePolicy {
                read_cache_ttl: Some(self.beta_group_cache_ttl),
            },
            "user_config" => CachePolicy {
                read_cache_ttl: Some(self.user_config_cache_ttl),
            },
            _ => CachePolicy {
                read_cache_ttl: Some(self.citizen_cache_ttl),
            },
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_table_matches_spec() {
        let config = Config::default();
        assert_eq!(
            config.cache_policy("citizen_overlay").read_cache_ttl,
            Some(Duration::from_secs(3_600))
        );
        assert_eq!(config.cache_policy("phone_verification").read_cache_ttl, None);
        assert_eq!(
            config.cache_policy("phone_mapping").read_cache_ttl,
            Some(Duration::from_secs(86_400))
        );
    }
}
