//! # Cluster configuration.
//!
//! [`Config`] defines the whole fleet: how many slots exist, where the
//! worker executable lives, the timing windows (health pulse, stop grace,
//! listener restart delay), the backlog bounds, and the pluggable callables
//! (environment factory, health policy, restart trigger).
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use nanny::{Config, HealthReport};
//!
//! let mut cfg = Config::default();
//! cfg.worker_path = "target/release/worker".into();
//! cfg.worker_count = 4;
//! cfg.pulse = Duration::from_secs(2);
//! cfg.grace = Duration::from_secs(10);
//! cfg.is_healthy = Arc::new(|r: &HealthReport| r.load < 1_500);
//!
//! assert_eq!(cfg.worker_count, 4);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::backlog::DropPolicy;
use crate::error::RuntimeError;
use crate::health::{always_healthy, HealthPolicy};
use crate::strategy::RespawnBackoff;
use crate::worker::LogicalId;

/// Builds the environment for one worker start, keyed by slot id.
pub type EnvFactory = dyn Fn(&LogicalId) -> HashMap<String, String> + Send + Sync;

/// Decides whether a slot that just reached standby is started again.
///
/// Only consulted while the cluster is active and the slot is not
/// administratively disabled. The second argument is `true` when the
/// preceding stop had to be forced.
pub type RestartPredicate = dyn Fn(&LogicalId, bool) -> bool + Send + Sync;

/// Fleet-wide configuration.
#[derive(Clone)]
pub struct Config {
    /// Path to the worker executable.
    pub worker_path: PathBuf,
    /// Arguments passed to each worker.
    pub worker_argv: Vec<String>,
    /// Number of slots when `logical_ids` is empty.
    pub worker_count: usize,
    /// Explicit slot ids; overrides `worker_count` when non-empty.
    pub logical_ids: Vec<LogicalId>,
    /// Health-pulse interval.
    pub pulse: Duration,
    /// Grace window between a stop request and forced termination.
    pub grace: Duration,
    /// Delay before a balancer re-listens after a latched restart
    /// (zero = next tick).
    pub restart_delay: Duration,
    /// Backlog depth cap (0 = unbounded).
    pub backlog_cap: usize,
    /// Eviction policy when the backlog is capped.
    pub drop_policy: DropPolicy,
    /// Per-worker backlog handoffs per drain pass (0 = unlimited).
    pub drain_burst: usize,
    /// Capacity of each diagnostic event tap.
    pub tap_capacity: usize,
    /// Pacing for slot respawns.
    pub respawn_backoff: RespawnBackoff,
    /// Per-slot environment factory (`None` = empty environment).
    pub create_environment: Option<Arc<EnvFactory>>,
    /// Health predicate; `false` requests a graceful stop of that worker.
    pub is_healthy: Arc<HealthPolicy>,
    /// Restart trigger for slots reaching standby while the cluster is
    /// active.
    pub should_restart: Arc<RestartPredicate>,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `worker_count = 1`, ids assigned from the slot index
    /// - `pulse = 5s`, `grace = 30s`, `restart_delay = 0` (next tick)
    /// - backlog unbounded, drain unlimited, `tap_capacity = 1024`
    /// - every worker healthy, every standby slot restarted
    fn default() -> Self {
        Self {
            worker_path: PathBuf::from("worker"),
            worker_argv: Vec::new(),
            worker_count: 1,
            logical_ids: Vec::new(),
            pulse: Duration::from_secs(5),
            grace: Duration::from_secs(30),
            restart_delay: Duration::ZERO,
            backlog_cap: 0,
            drop_policy: DropPolicy::default(),
            drain_burst: 0,
            tap_capacity: 1024,
            respawn_backoff: RespawnBackoff::default(),
            create_environment: None,
            is_healthy: always_healthy(),
            should_restart: Arc::new(|_, _| true),
        }
    }
}

impl Config {
    /// The slot ids this configuration describes, in creation order.
    ///
    /// `logical_ids` wins over `worker_count`; ids must be unique and the
    /// fleet non-empty.
    pub(crate) fn slot_ids(&self) -> Result<Vec<LogicalId>, RuntimeError> {
        if !self.logical_ids.is_empty() {
            let mut seen = HashSet::new();
            for id in &self.logical_ids {
                if !seen.insert(id.clone()) {
                    return Err(RuntimeError::InvalidConfig {
                        reason: format!("duplicate logical id '{id}'"),
                    });
                }
            }
            return Ok(self.logical_ids.clone());
        }
        if self.worker_count > 0 {
            return Ok((0..self.worker_count).map(LogicalId::from).collect());
        }
        Err(RuntimeError::InvalidConfig {
            reason: "worker_count is 0 and logical_ids is empty".into(),
        })
    }

    pub(crate) fn environment_for(&self, id: &LogicalId) -> HashMap<String, String> {
        match &self.create_environment {
            Some(factory) => factory(id),
            None => HashMap::new(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("worker_path", &self.worker_path)
            .field("worker_argv", &self.worker_argv)
            .field("worker_count", &self.worker_count)
            .field("logical_ids", &self.logical_ids)
            .field("pulse", &self.pulse)
            .field("grace", &self.grace)
            .field("restart_delay", &self.restart_delay)
            .field("backlog_cap", &self.backlog_cap)
            .field("drop_policy", &self.drop_policy)
            .field("drain_burst", &self.drain_burst)
            .field("tap_capacity", &self.tap_capacity)
            .field("respawn_backoff", &self.respawn_backoff)
            .field("create_environment", &self.create_environment.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_ids_come_from_the_count() {
        let mut cfg = Config::default();
        cfg.worker_count = 3;
        let ids = cfg.slot_ids().unwrap();
        assert_eq!(ids, vec!["0".into(), "1".into(), "2".into()]);
    }

    #[test]
    fn explicit_ids_win_over_the_count() {
        let mut cfg = Config::default();
        cfg.worker_count = 5;
        cfg.logical_ids = vec!["api".into(), "jobs".into()];
        let ids = cfg.slot_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].as_str(), "api");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut cfg = Config::default();
        cfg.logical_ids = vec!["a".into(), "a".into()];
        let err = cfg.slot_ids().unwrap_err();
        assert_eq!(err.as_label(), "runtime_invalid_config");
    }

    #[test]
    fn an_empty_fleet_is_rejected() {
        let mut cfg = Config::default();
        cfg.worker_count = 0;
        assert!(cfg.slot_ids().is_err());
    }

    #[test]
    fn environment_defaults_to_empty() {
        let cfg = Config::default();
        assert!(cfg.environment_for(&LogicalId::from(0)).is_empty());

        let mut cfg = Config::default();
        cfg.create_environment = Some(Arc::new(|id: &LogicalId| {
            HashMap::from([("WORKER_ID".to_string(), id.to_string())])
        }));
        let env = cfg.environment_for(&LogicalId::from(4));
        assert_eq!(env["WORKER_ID"], "4");
    }
}
