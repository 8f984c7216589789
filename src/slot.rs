use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::health::HealthReport;
use crate::strategy::RespawnBackoff;
use crate::worker::{LogicalId, WorkerRef};

/// Lifecycle of a worker slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Standby,
    Starting,
    Running,
    Stopping,
}

/// One worker slot: a logical identity occupied by successive children over
/// the supervisor's lifetime. Only touched on the supervisor loop.
pub(crate) struct Slot {
    pub id: LogicalId,
    pub state: SlotState,
    pub worker: Option<WorkerRef>,
    pub starting_at: Option<Instant>,
    pub stop_requested_at: Option<Instant>,
    pub force_stop_at: Option<Instant>,
    pub forced_stop: bool,
    pub health: Option<HealthReport>,
    pub disabled: bool,
    backoff_delay: Option<Duration>,
    pub force_guard: Option<CancellationToken>,
    pub respawn_guard: Option<CancellationToken>,
}

impl Slot {
    pub fn new(id: LogicalId) -> Self {
        Self {
            id,
            state: SlotState::Standby,
            worker: None,
            starting_at: None,
            stop_requested_at: None,
            force_stop_at: None,
            forced_stop: false,
            health: None,
            disabled: false,
            backoff_delay: None,
            force_guard: None,
            respawn_guard: None,
        }
    }

    pub fn mark_starting(&mut self, now: Instant) {
        self.state = SlotState::Starting;
        self.starting_at = Some(now);
        self.stop_requested_at = None;
        self.force_stop_at = None;
        self.forced_stop = false;
        self.health = None;
    }

    pub fn mark_running(&mut self) {
        self.state = SlotState::Running;
        self.backoff_delay = None;
    }

    pub fn mark_stopping(&mut self, now: Instant, grace: Duration) {
        self.state = SlotState::Stopping;
        self.stop_requested_at = Some(now);
        self.force_stop_at = Some(now + grace);
    }

    /// The child is gone. `starting_at` and the last health sample only
    /// describe an occupied slot and are cleared; the stop timestamps and
    /// the forced flag survive until the next start.
    pub fn mark_standby(&mut self) {
        self.state = SlotState::Standby;
        self.starting_at = None;
        self.health = None;
        self.worker = None;
        if let Some(guard) = self.force_guard.take() {
            guard.cancel();
        }
    }

    pub fn next_backoff(&mut self, strategy: RespawnBackoff) -> Duration {
        let delay = strategy.next(self.backoff_delay);
        self.backoff_delay = Some(delay);
        delay
    }

    pub fn cancel_respawn(&mut self) {
        if let Some(guard) = self.respawn_guard.take() {
            guard.cancel();
        }
    }

    pub fn view(&self) -> SlotView {
        SlotView {
            id: self.id.clone(),
            state: self.state,
            starting_at: self.starting_at,
            stop_requested_at: self.stop_requested_at,
            force_stop_at: self.force_stop_at,
            forced_stop: self.forced_stop,
            disabled: self.disabled,
            health: self.health.clone(),
        }
    }
}

/// Snapshot of one slot, captured on the supervisor loop.
#[derive(Clone, Debug)]
pub struct SlotView {
    pub id: LogicalId,
    pub state: SlotState,
    pub starting_at: Option<Instant>,
    pub stop_requested_at: Option<Instant>,
    pub force_stop_at: Option<Instant>,
    pub forced_stop: bool,
    pub disabled: bool,
    pub health: Option<HealthReport>,
}
