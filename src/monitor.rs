//! Connection-pool utilization monitor: periodic background polling of
//! adapter pool statistics, logging progressive warnings as utilization
//! climbs.

use crate::kv::KvStore;
use crate::store::DocumentStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const WARN_THRESHOLD: f64 = 0.80;
const HIGH_THRESHOLD: f64 = 0.90;
const CRITICAL_THRESHOLD: f64 = 0.95;

/// Polls `pool_stats()` on both adapters at a fixed interval and logs
/// progressive warnings as utilization climbs.
pub struct PoolMonitor {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn DocumentStore>,
    interval: Duration,
}

impl PoolMonitor {
    /// Build a monitor over the given adapters, polling every `interval`.
    pub fn new(kv: Arc<dyn KvStore>, store: Arc<dyn DocumentStore>, interval: Duration) -> Self {
        Self { kv, store, interval }
    }

    /// Spawn the monitor as a detached background task.
    pub fn spawn(self) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                report("kv", self.kv.pool_stats());
                report("store", self.store.pool_stats());
            }
        });
    }
}

fn report(name: &str, stats: crate::kv::PoolStats) {
    let utilization = stats.utilization();
    if utilization >= CRITICAL_THRESHOLD {
        error!(pool = name, utilization, in_use = stats.in_use, max_size = stats.max_size, "pool near exhaustion");
    } else if utilization >= HIGH_THRESHOLD {
        warn!(pool = name, utilization, in_use = stats.in_use, max_size = stats.max_size, "pool utilization high");
    } else if utilization >= WARN_THRESHOLD {
        warn!(pool = name, utilization, in_use = stats.in_use, max_size = stats.max_size, "pool utilization elevated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::PoolStats;

    #[test]
    fn utilization_below_warn_threshold_is_silent() {
        let stats = PoolStats { in_use: 1, max_size: 20 };
        assert!(stats.utilization() < WARN_THRESHOLD);
    }

    #[test]
    fn utilization_above_critical_threshold_is_flagged() {
        let stats = PoolStats { in_use: 19, max_size: 20 };
        assert!(stats.utilization() >= CRITICAL_THRESHOLD);
    }
}
