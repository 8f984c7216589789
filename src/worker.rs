//! # Worker capability surface.
//!
//! The supervisor never talks to child processes directly. The process
//! subsystem implements [`Worker`] for each spawned child and [`Spawner`] for
//! bringing children up; everything the core needs from a worker flows
//! through those two traits plus the [`WorkerEvent`] channel feeding back
//! into the supervisor loop.
//!
//! A [`Worker`] is held in two places at once: the supervisor owns it through
//! the slot record, and every balancer whose address the worker listens on
//! keeps a non-owning handle in its rotation ring. Removing the worker from
//! the rings is the only way the supervisor severs that second path.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::balancer::ListenSpec;
use crate::health::HealthReport;
use crate::socket::ConnRef;

/// Stable identifier of a worker slot.
///
/// A slot keeps its id across restarts of the child occupying it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalId(Arc<str>);

impl LogicalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for LogicalId {
    fn from(s: String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

impl From<usize> for LogicalId {
    fn from(n: usize) -> Self {
        Self(Arc::from(n.to_string().as_str()))
    }
}

/// Handle to one live worker child, implemented by the process subsystem.
///
/// All methods must return without blocking; delivery happens on whatever
/// channel the subsystem uses to reach the child.
pub trait Worker: Send + Sync {
    fn id(&self) -> &LogicalId;

    /// Tells the worker that `port` is now listening at `address`.
    ///
    /// Idempotent. Repeated on every re-listen of the same port.
    fn send_address(&self, port: u16, address: SocketAddr);

    /// Tells the worker the listener for `port` is gone.
    fn send_error(&self, port: u16, error: &str);

    /// Transfers ownership of an accepted connection to the worker.
    ///
    /// The caller must not touch the connection afterwards.
    fn handle_connection(&self, port: u16, conn: ConnRef);

    /// Asks the child to exit on its own terms.
    fn request_stop(&self);

    /// Terminates the child forcibly.
    fn terminate(&self);
}

/// Shared handle to a worker object.
pub type WorkerRef = Arc<dyn Worker>;

/// Sender half of the channel the worker subsystem reports through.
pub type WorkerSender = mpsc::UnboundedSender<WorkerEvent>;

/// Everything a [`Spawner`] needs to bring one child up.
#[derive(Clone, Debug)]
pub struct SpawnSpec {
    pub id: LogicalId,
    pub path: PathBuf,
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Brings worker children up. Implemented by the process subsystem.
pub trait Spawner: Send + Sync {
    /// Spawns a child for `spec.id`. Must not block; readiness, health and
    /// exit are reported through `events`.
    fn spawn(&self, spec: SpawnSpec, events: WorkerSender) -> io::Result<WorkerRef>;
}

/// Report from the worker subsystem to the supervisor loop.
#[derive(Clone, Debug)]
pub struct WorkerEvent {
    pub id: LogicalId,
    pub kind: WorkerEventKind,
}

#[derive(Clone, Debug)]
pub enum WorkerEventKind {
    /// The child wants to accept connections on the given address.
    Listen(ListenSpec),
    /// Health sample covering the last pulse window.
    Health(HealthReport),
    /// The child exited.
    Exited,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_id_from_index_and_str_agree() {
        assert_eq!(LogicalId::from(7), LogicalId::from("7"));
        assert_eq!(LogicalId::from("api").as_str(), "api");
        assert_eq!(LogicalId::from(3).to_string(), "3");
    }

    #[test]
    fn logical_id_is_stable_as_a_map_key() {
        use std::collections::HashMap;

        let mut m = HashMap::new();
        m.insert(LogicalId::from("a"), 1);
        m.insert(LogicalId::from("a"), 2);
        assert_eq!(m.len(), 1);
        assert_eq!(m[&LogicalId::from("a")], 2);
    }
}
