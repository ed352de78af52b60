//! # cidadao-core
//!
//! Write-buffered cache, async sync engine, self-declared overlay service,
//! and phone-verification state machine for a citizen-data platform.
//!
//! ## Architecture
//!
//! - `error`: the core error taxonomy (`CoreError`)
//! - `config`: process-level configuration, loaded from the environment
//! - `domain`: citizen record/overlay/view, phone mapping, beta group
//! - `kv`: KV store adapter (write buffer, read cache, sync queues)
//! - `store`: document store adapter
//! - `cache`: write-buffer/read-cache manager
//! - `sync`: async sync engine draining the write buffer into the store
//! - `overlay`: self-declared update service with optimistic concurrency
//! - `phone`: phone-verification state machine and quarantine
//! - `audit`: audit log sink
//! - `ratelimit`: the token-bucket limiter backing notification rate limits
//! - `context`: process bootstrap (`AppContext`)
//! - `monitor`: connection-pool utilization monitor
//! - `api`: the thin outer HTTP surface

pub mod error;

pub mod config;
pub mod domain;

pub mod kv;
pub mod store;

pub mod ratelimit;

pub mod cache;
pub mod sync;

pub mod overlay;
pub mod phone;

pub mod audit;

pub mod monitor;

pub mod context;

pub mod api;

pub use context::AppContext;
pub use error::{CoreError, CoreResult};

/// Crate version, for startup banners.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
