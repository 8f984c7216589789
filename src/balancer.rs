//! # Per-address load balancer.
//!
//! One balancer owns one listening address, the rotation [`Ring`] of
//! workers eligible for it, and the [`Backlog`] of connections waiting for
//! a worker. It is a plain state machine; the supervisor loop feeds it both
//! its public operations and the socket events, so no two transitions ever
//! interleave.
//!
//! ```text
//!  standby ──start──► starting ──listening──► running
//!     ▲                   │                      │
//!     │                  stop                 stop/error
//!     │                   ▼                      ▼
//!     └──────close────  stopping  ◄──────────────┘
//! ```
//!
//! A `stop` during `starting` defers the close to the listening event; a
//! `start` during `stopping` latches a restart that is armed once the close
//! completes. A close or error with no listen outstanding is a defect in
//! the socket layer and aborts.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backlog::Backlog;
use crate::config::Config;
use crate::event::{Event, EventKind};
use crate::journal::Journal;
use crate::ring::Ring;
use crate::socket::{ConnRef, SocketDriver};
use crate::timer::{TimerEvent, Timers};
use crate::worker::{LogicalId, WorkerRef};

/// Identity of a balancer: the address a worker asked to listen on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenKey {
    pub address: IpAddr,
    pub port: u16,
}

/// Full listen request: the key plus the OS accept-queue depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenSpec {
    pub address: IpAddr,
    /// 0 lets the OS pick; the granted address is captured once listening.
    pub port: u16,
    pub backlog: u32,
}

impl ListenSpec {
    pub fn key(&self) -> ListenKey {
        ListenKey {
            address: self.address,
            port: self.port,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalancerState {
    Standby,
    Starting,
    Running,
    Stopping,
}

/// Snapshot of one balancer, captured on the supervisor loop.
#[derive(Clone, Debug)]
pub struct BalancerView {
    pub state: BalancerState,
    pub port: u16,
    pub address: Option<SocketAddr>,
    pub backlog: usize,
}

type StandbyHook = Box<dyn FnOnce() + Send>;

pub struct Balancer {
    spec: ListenSpec,
    state: BalancerState,
    /// Restart intent latched by a start that arrived during `stopping`.
    restart_latched: bool,
    bound: Option<SocketAddr>,
    ring: Ring,
    backlog: Backlog,
    driver: Box<dyn SocketDriver>,
    timers: Timers,
    journal: Journal,
    restart_delay: Duration,
    drain_burst: usize,
    restart_guard: Option<CancellationToken>,
    redrain_armed: bool,
    on_standby: Vec<StandbyHook>,
}

impl Balancer {
    pub(crate) fn new(
        spec: ListenSpec,
        driver: Box<dyn SocketDriver>,
        cfg: &Config,
        journal: Journal,
        timers: Timers,
    ) -> Self {
        Self {
            spec,
            state: BalancerState::Standby,
            restart_latched: false,
            bound: None,
            ring: Ring::new(),
            backlog: Backlog::new(cfg.backlog_cap, cfg.drop_policy),
            driver,
            timers,
            journal,
            restart_delay: cfg.restart_delay,
            drain_burst: cfg.drain_burst,
            restart_guard: None,
            redrain_armed: false,
            on_standby: Vec::new(),
        }
    }

    pub fn state(&self) -> BalancerState {
        self.state
    }

    pub fn inspect(&self) -> BalancerView {
        BalancerView {
            state: self.state,
            port: self.spec.port,
            address: self.bound,
            backlog: self.backlog.len(),
        }
    }

    pub fn for_each_worker(&self, mut f: impl FnMut(&WorkerRef)) {
        for worker in self.ring.iter() {
            f(worker);
        }
    }

    /// Begins listening. A start during `stopping` is latched and replayed
    /// once the close completes; in `starting`/`running` this is a no-op.
    pub(crate) fn start(&mut self) {
        match self.state {
            BalancerState::Standby => {
                self.cancel_restart_timer();
                self.state = BalancerState::Starting;
                self.record(Event::now(EventKind::ListenerStarting).with_port(self.spec.port));
                self.driver.open();
            }
            BalancerState::Stopping => {
                self.restart_latched = true;
            }
            BalancerState::Starting | BalancerState::Running => {}
        }
    }

    /// Requests a graceful close. `on_standby` fires the next time the
    /// balancer reaches `standby`, immediately when already there.
    pub(crate) fn stop(&mut self, on_standby: Option<StandbyHook>) {
        match self.state {
            BalancerState::Running => {
                self.state = BalancerState::Stopping;
                if let Some(hook) = on_standby {
                    self.on_standby.push(hook);
                }
                self.record(Event::now(EventKind::ListenerStopping).with_port(self.spec.port));
                self.driver.close();
            }
            BalancerState::Starting => {
                // The listener is still coming up; the close is issued on
                // the listening event.
                self.state = BalancerState::Stopping;
                if let Some(hook) = on_standby {
                    self.on_standby.push(hook);
                }
                self.record(Event::now(EventKind::ListenerStopping).with_port(self.spec.port));
            }
            BalancerState::Stopping => {
                self.restart_latched = false;
                if let Some(hook) = on_standby {
                    self.on_standby.push(hook);
                }
            }
            BalancerState::Standby => {
                self.cancel_restart_timer();
                if let Some(hook) = on_standby {
                    hook();
                }
            }
        }
    }

    /// Adds `worker` to the rotation. A balancer that is already running
    /// tells the worker the bound address right away and drains the backlog
    /// into the grown ring.
    pub(crate) fn add_worker(&mut self, worker: WorkerRef) {
        let id = worker.id().clone();
        if !self.ring.push(worker.clone()) {
            self.record(
                Event::now(EventKind::DuplicateWorker)
                    .with_slot(&id)
                    .with_port(self.spec.port),
            );
            return;
        }
        if self.state == BalancerState::Running {
            if let Some(addr) = self.bound {
                worker.send_address(self.spec.port, addr);
            }
            self.drain_backlog();
        }
    }

    /// Removes the worker from rotation. Tolerates absence: removal runs
    /// both on stop request and again on confirmed exit.
    pub(crate) fn remove_worker(&mut self, id: &LogicalId) {
        self.ring.remove(id);
    }

    // --- socket and timer events, delivered by the supervisor loop ---

    pub(crate) fn on_listening(&mut self, addr: SocketAddr) {
        match self.state {
            BalancerState::Starting => self.enter_running(addr),
            // A stop arrived while the listen was in flight; close now.
            BalancerState::Stopping => self.driver.close(),
            // A stale epoch reporting late. Nothing to do.
            BalancerState::Running | BalancerState::Standby => {}
        }
    }

    pub(crate) fn on_close(&mut self) {
        match self.state {
            BalancerState::Running => {
                self.record(
                    Event::now(EventKind::ListenerLost)
                        .with_port(self.spec.port)
                        .with_error("listener closed without a stop request"),
                );
                self.enter_standby();
            }
            BalancerState::Stopping => self.enter_standby(),
            BalancerState::Standby | BalancerState::Starting => panic!(
                "balancer {}:{}: close event with no listener outstanding",
                self.spec.address, self.spec.port
            ),
        }
    }

    pub(crate) fn on_error(&mut self, error: &str) {
        match self.state {
            BalancerState::Running => {
                self.record(
                    Event::now(EventKind::ListenerError)
                        .with_port(self.spec.port)
                        .with_error(error),
                );
                for worker in self.ring.iter() {
                    worker.send_error(self.spec.port, error);
                }
                self.stop(None);
            }
            BalancerState::Starting => {
                // Never became functional; no worker has anything to lose.
                self.record(
                    Event::now(EventKind::ListenerError)
                        .with_port(self.spec.port)
                        .with_error(error),
                );
                self.stop(None);
            }
            // Already tearing down; the close event follows.
            BalancerState::Stopping => {}
            BalancerState::Standby => panic!(
                "balancer {}:{}: error event with no listen outstanding: {error}",
                self.spec.address, self.spec.port
            ),
        }
    }

    pub(crate) fn on_connection(&mut self, conn: ConnRef) {
        if self.state == BalancerState::Running && !self.ring.is_empty() && self.backlog.is_empty()
        {
            self.dispatch(conn);
            return;
        }
        match self.backlog.push(conn) {
            Some(victim) => {
                drop(victim);
                self.record(
                    Event::now(EventKind::ConnectionDropped)
                        .with_port(self.spec.port)
                        .with_backlog(self.backlog.len()),
                );
            }
            None => {
                self.record(
                    Event::now(EventKind::ConnectionQueued)
                        .with_port(self.spec.port)
                        .with_backlog(self.backlog.len()),
                );
            }
        }
    }

    pub(crate) fn on_restart_due(&mut self) {
        self.restart_guard = None;
        self.start();
    }

    pub(crate) fn on_drain_due(&mut self) {
        self.redrain_armed = false;
        if self.state == BalancerState::Running {
            self.drain_backlog();
        }
    }

    fn enter_running(&mut self, addr: SocketAddr) {
        self.state = BalancerState::Running;
        self.bound = Some(addr);
        self.record(
            Event::now(EventKind::ListenerRunning)
                .with_port(self.spec.port)
                .with_address(addr),
        );
        // Address first, drain second: every ring member has seen the bound
        // address before any connection is handed anywhere.
        for worker in self.ring.iter() {
            worker.send_address(self.spec.port, addr);
        }
        self.drain_backlog();
    }

    fn enter_standby(&mut self) {
        self.state = BalancerState::Standby;
        self.bound = None;
        self.record(Event::now(EventKind::ListenerStandby).with_port(self.spec.port));
        let hooks = std::mem::take(&mut self.on_standby);
        for hook in hooks {
            hook();
        }
        if self.restart_latched {
            self.restart_latched = false;
            self.record(
                Event::now(EventKind::RestartScheduled)
                    .with_port(self.spec.port)
                    .with_delay(self.restart_delay),
            );
            self.restart_guard = Some(
                self.timers
                    .arm(self.restart_delay, TimerEvent::Restart(self.spec.key())),
            );
        }
    }

    fn dispatch(&mut self, conn: ConnRef) {
        let Some(worker) = self.ring.rotate() else {
            return;
        };
        worker.handle_connection(self.spec.port, conn);
    }

    /// One drain pass. With a configured burst the pass hands out at most
    /// `drain_burst` connections per ring member, then schedules a next-tick
    /// continuation so a lone fresh worker is not buried under the whole
    /// queue at once.
    fn drain_backlog(&mut self) {
        let quota = if self.drain_burst == 0 {
            usize::MAX
        } else {
            self.drain_burst.saturating_mul(self.ring.len())
        };
        let mut handed = 0usize;
        while handed < quota && !self.ring.is_empty() {
            let Some(conn) = self.backlog.pop_live() else {
                break;
            };
            self.dispatch(conn);
            handed += 1;
        }
        if !self.backlog.is_empty() && !self.ring.is_empty() && !self.redrain_armed {
            self.redrain_armed = true;
            let _ = self
                .timers
                .arm(Duration::ZERO, TimerEvent::Drain(self.spec.key()));
        }
    }

    fn cancel_restart_timer(&mut self) {
        if let Some(guard) = self.restart_guard.take() {
            guard.cancel();
        }
    }

    fn record(&self, ev: Event) {
        self.journal.record(ev);
    }
}
