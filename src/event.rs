use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use crate::worker::LogicalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ClusterStarted,
    ClusterStopping,
    AllStandby,
    SlotStarting,
    SlotRunning,
    SlotStopping,
    SlotStandby,
    SlotUnhealthy,
    SlotForcedStop,
    SlotDisabled,
    SlotEnabled,
    SpawnFailed,
    RespawnScheduled,
    ListenerStarting,
    ListenerRunning,
    ListenerStopping,
    ListenerStandby,
    ListenerLost,
    ListenerError,
    RestartScheduled,
    ConnectionQueued,
    ConnectionDropped,
    DuplicateWorker,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub at: SystemTime,
    pub slot: Option<LogicalId>,
    pub port: Option<u16>,
    pub address: Option<SocketAddr>,
    pub backlog: Option<usize>,
    pub delay: Option<Duration>,
    pub error: Option<String>,
}

impl Event {
    pub fn now(kind: EventKind) -> Self {
        Self {
            kind,
            at: SystemTime::now(),
            slot: None,
            port: None,
            address: None,
            backlog: None,
            delay: None,
            error: None,
        }
    }

    pub fn with_slot(mut self, id: &LogicalId) -> Self {
        self.slot = Some(id.clone());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_backlog(mut self, depth: usize) -> Self {
        self.backlog = Some(depth);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_only_what_is_given() {
        let ev = Event::now(EventKind::ConnectionQueued)
            .with_port(8080)
            .with_backlog(3);

        assert_eq!(ev.kind, EventKind::ConnectionQueued);
        assert_eq!(ev.port, Some(8080));
        assert_eq!(ev.backlog, Some(3));
        assert!(ev.slot.is_none());
        assert!(ev.error.is_none());
    }
}
