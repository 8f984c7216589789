//! # nanny
//!
//! **nanny** keeps a fixed fleet of homogeneous worker processes alive and
//! feeds them inbound TCP connections through per-address round-robin
//! balancers. Workers are spawned into stable slots, watched through a
//! periodic health pulse, stopped gracefully with a forced-stop escalation,
//! and restarted with backoff; each listening address a worker announces is
//! owned by one balancer that rotates connections across the workers behind
//! it and parks them in a backlog while nobody can take them.
//!
//! | Area | Description | Key types / traits |
//! |---|---|---|
//! | **Supervision** | Slot lifecycle, health pulse, graceful stop, restart policy. | [`Supervisor`], [`SupervisorHandle`] |
//! | **Balancing** | Per-address listener state machine, rotation ring, backlog. | [`Balancer`], [`BalancerView`], [`DropPolicy`] |
//! | **Worker capability** | The contract the worker-process subsystem implements. | [`Worker`], [`Spawner`], [`WorkerEvent`] |
//! | **Health** | Per-pulse reports and the pluggable policy. | [`HealthReport`], [`HealthPolicy`] |
//! | **Observer API** | Structured lifecycle events for logging and metrics. | [`Observer`], [`Journal`], [`Event`], [`EventKind`] |
//! | **Configuration** | Fleet size, timing windows, backlog bounds, callables. | [`Config`] |
//! | **Errors** | Typed runtime errors. | [`RuntimeError`] |
//!
//! The process subsystem is deliberately a plug-in point: the supervisor
//! only ever sees [`Spawner`] and [`Worker`]. The example below keeps the
//! "children" in-process.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nanny::{
//!     Config, ConnRef, ListenSpec, LoggerObserver, LogicalId, SpawnSpec, Spawner, Supervisor,
//!     Worker, WorkerEvent, WorkerEventKind, WorkerRef, WorkerSender,
//! };
//!
//! struct InProcess {
//!     id: LogicalId,
//!     events: WorkerSender,
//! }
//!
//! impl Worker for InProcess {
//!     fn id(&self) -> &LogicalId {
//!         &self.id
//!     }
//!     fn send_address(&self, _port: u16, _address: std::net::SocketAddr) {}
//!     fn send_error(&self, _port: u16, _error: &str) {}
//!     fn handle_connection(&self, _port: u16, conn: ConnRef) {
//!         drop(conn);
//!     }
//!     fn request_stop(&self) {
//!         let _ = self.events.send(WorkerEvent {
//!             id: self.id.clone(),
//!             kind: WorkerEventKind::Exited,
//!         });
//!     }
//!     fn terminate(&self) {
//!         self.request_stop();
//!     }
//! }
//!
//! struct InProcessSpawner;
//!
//! impl Spawner for InProcessSpawner {
//!     fn spawn(&self, spec: SpawnSpec, events: WorkerSender) -> std::io::Result<WorkerRef> {
//!         let listen = ListenSpec {
//!             address: [127, 0, 0, 1].into(),
//!             port: 0,
//!             backlog: 128,
//!         };
//!         let _ = events.send(WorkerEvent {
//!             id: spec.id.clone(),
//!             kind: WorkerEventKind::Listen(listen),
//!         });
//!         Ok(Arc::new(InProcess {
//!             id: spec.id,
//!             events,
//!         }))
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), nanny::RuntimeError> {
//!     let mut cfg = Config::default();
//!     cfg.worker_count = 2;
//!
//!     let supervisor = Supervisor::new(cfg, Arc::new(InProcessSpawner), LoggerObserver);
//!     let handle = supervisor.handle();
//!     tokio::spawn(supervisor.run());
//!
//!     handle.start()?;
//!     let view = handle.inspect().await?;
//!     println!("slots: {}", view.count_workers());
//!     handle.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod backlog;
mod balancer;
mod config;
mod error;
mod event;
mod health;
mod journal;
mod observer;
mod ring;
mod slot;
mod socket;
mod strategy;
mod supervisor;
mod timer;
mod worker;

// ---- Public re-exports ----

pub use backlog::DropPolicy;
pub use balancer::{Balancer, BalancerState, BalancerView, ListenKey, ListenSpec};
pub use config::{Config, EnvFactory, RestartPredicate};
pub use error::RuntimeError;
pub use event::{Event, EventKind};
pub use health::{HealthPolicy, HealthReport, MemoryUsage};
pub use journal::Journal;
pub use observer::{LoggerObserver, Observer};
pub use slot::{SlotState, SlotView};
pub use socket::{ConnRef, Connection, TcpConnection};
pub use strategy::RespawnBackoff;
pub use supervisor::{ClusterView, Supervisor, SupervisorHandle};
pub use worker::{
    LogicalId, SpawnSpec, Spawner, Worker, WorkerEvent, WorkerEventKind, WorkerRef, WorkerSender,
};
