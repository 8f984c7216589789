//! Worker health reporting and the pluggable health policy.
//!
//! Workers produce one [`HealthReport`] per pulse window; the supervisor
//! keeps only the most recent one per slot and evaluates the configured
//! policy against it on every pulse tick. A policy verdict of `false`
//! requests a graceful stop of that worker, which the normal restart path
//! then replaces.

use std::sync::Arc;

/// Point-in-time health sample produced by a worker.
#[derive(Clone, Debug, Default)]
pub struct HealthReport {
    pub memory: MemoryUsage,
    /// Milliseconds the worker spent busy during the last pulse window.
    pub load: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryUsage {
    pub rss: u64,
    pub heap_total: u64,
    pub heap_used: u64,
}

/// Pure predicate deciding whether a running worker is still healthy.
///
/// Must not block or perform I/O. Evaluated at most once per worker per
/// pulse tick.
pub type HealthPolicy = dyn Fn(&HealthReport) -> bool + Send + Sync;

pub(crate) fn always_healthy() -> Arc<HealthPolicy> {
    Arc::new(|_| true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_accepts_anything() {
        let policy = always_healthy();
        let report = HealthReport {
            load: u64::MAX,
            memory: MemoryUsage {
                rss: u64::MAX,
                ..Default::default()
            },
        };
        assert!(policy(&report));
    }

    #[test]
    fn custom_policy_sees_the_report() {
        let policy: Arc<HealthPolicy> = Arc::new(|r| r.load < 800 && r.memory.rss < 1 << 30);
        assert!(policy(&HealthReport::default()));
        assert!(!policy(&HealthReport {
            load: 4_000,
            ..Default::default()
        }));
    }
}
