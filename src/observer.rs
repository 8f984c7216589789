use async_trait::async_trait;

use crate::event::{Event, EventKind};

/// Sink for supervisor lifecycle events.
#[async_trait]
pub trait Observer {
    async fn on_event(&self, event: &Event);
}

/// Built-in observer that renders every event as one structured log line.
pub struct LoggerObserver;

impl LoggerObserver {
    fn level(kind: EventKind) -> &'static str {
        match kind {
            EventKind::ListenerError | EventKind::SpawnFailed => "error",
            EventKind::SlotUnhealthy
            | EventKind::SlotForcedStop
            | EventKind::ListenerLost
            | EventKind::ConnectionDropped
            | EventKind::DuplicateWorker => "warn",
            EventKind::ClusterStarted
            | EventKind::ClusterStopping
            | EventKind::AllStandby
            | EventKind::SlotRunning
            | EventKind::SlotStandby
            | EventKind::SlotDisabled
            | EventKind::SlotEnabled
            | EventKind::ConnectionQueued
            | EventKind::ListenerRunning => "info",
            _ => "debug",
        }
    }
}

#[async_trait]
impl Observer for LoggerObserver {
    async fn on_event(&self, e: &Event) {
        let mut line = format!("[{}] {:?}", Self::level(e.kind), e.kind);
        if let Some(slot) = &e.slot {
            line.push_str(&format!(" slot={slot}"));
        }
        if let Some(port) = e.port {
            line.push_str(&format!(" port={port}"));
        }
        if let Some(address) = e.address {
            line.push_str(&format!(" address={address}"));
        }
        if let Some(depth) = e.backlog {
            line.push_str(&format!(" backlog={depth}"));
        }
        if let Some(delay) = e.delay {
            line.push_str(&format!(" delay={delay:?}"));
        }
        if let Some(error) = &e.error {
            line.push_str(&format!(" error={error:?}"));
        }
        println!("{line}");
    }
}
