use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::balancer::{Balancer, BalancerState, BalancerView, ListenKey, ListenSpec};
use crate::config::Config;
use crate::error::RuntimeError;
use crate::event::{Event, EventKind};
use crate::journal::{EventFeed, Journal};
use crate::observer::Observer;
use crate::slot::{Slot, SlotState, SlotView};
use crate::socket::{SocketEvent, SocketSender, TcpDriver};
use crate::timer::{TimerEvent, Timers};
use crate::worker::{LogicalId, SpawnSpec, Spawner, WorkerEvent, WorkerEventKind, WorkerSender};

enum Command {
    Start,
    Stop(oneshot::Sender<()>),
    StopWorker(LogicalId),
    Disable(LogicalId),
    Enable(LogicalId),
    Inspect(oneshot::Sender<ClusterView>),
}

/// Cloneable, non-blocking control surface for a running [`Supervisor`].
///
/// Every method hands a command to the supervisor loop and returns; the
/// `async` ones only wait for the loop's acknowledgement, never inside it.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SupervisorHandle {
    /// Spawns the fleet and starts the health pulse. Idempotent.
    pub fn start(&self) -> Result<(), RuntimeError> {
        self.send(Command::Start)
    }

    /// Stops every worker and balancer, then resolves once the whole
    /// cluster is standby.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Stop(ack_tx))?;
        ack_rx.await.map_err(|_| RuntimeError::Closed)
    }

    /// Requests a graceful stop of one slot. The normal restart path
    /// decides whether it comes back.
    pub fn stop_worker(&self, id: LogicalId) -> Result<(), RuntimeError> {
        self.send(Command::StopWorker(id))
    }

    /// Stops the slot and withholds it from automatic restart.
    pub fn disable(&self, id: LogicalId) -> Result<(), RuntimeError> {
        self.send(Command::Disable(id))
    }

    /// Makes the slot eligible again; an active cluster restarts it
    /// immediately.
    pub fn enable(&self, id: LogicalId) -> Result<(), RuntimeError> {
        self.send(Command::Enable(id))
    }

    /// Snapshot of every slot and balancer, captured on the loop.
    pub async fn inspect(&self) -> Result<ClusterView, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Inspect(reply_tx))?;
        reply_rx.await.map_err(|_| RuntimeError::Closed)
    }

    fn send(&self, cmd: Command) -> Result<(), RuntimeError> {
        self.tx.send(cmd).map_err(|_| RuntimeError::Closed)
    }
}

/// Cluster snapshot, returned by value.
#[derive(Clone, Debug)]
pub struct ClusterView {
    pub workers: Vec<SlotView>,
    pub balancers: Vec<BalancerView>,
}

impl ClusterView {
    pub fn count_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn count_running_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.state == SlotState::Running)
            .count()
    }

    /// Running, starting and stopping slots.
    pub fn count_active_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.state != SlotState::Standby)
            .count()
    }

    pub fn count_running_balancers(&self) -> usize {
        self.balancers
            .iter()
            .filter(|b| b.state == BalancerState::Running)
            .count()
    }

    pub fn count_active_balancers(&self) -> usize {
        self.balancers
            .iter()
            .filter(|b| b.state != BalancerState::Standby)
            .count()
    }
}

enum Tick {
    Cmd(Command),
    Worker(WorkerEvent),
    Socket(ListenKey, SocketEvent),
    Timer(TimerEvent),
    Pulse,
}

/// Owns the fleet: one slot per configured worker, one balancer per
/// listening address, and the single event loop that serializes every state
/// transition on them.
pub struct Supervisor<O: Observer + Send + Sync + 'static> {
    pub cfg: Config,
    pub obs: Arc<O>,
    pub journal: Journal,
    feed: Option<EventFeed>,
    spawner: Arc<dyn Spawner>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    worker_tx: WorkerSender,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    socket_tx: SocketSender,
    socket_rx: mpsc::UnboundedReceiver<(ListenKey, SocketEvent)>,
    timers: Timers,
    timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
    slots: HashMap<LogicalId, Slot>,
    /// Slot creation order, for stable spawn sequence and inspection.
    order: Vec<LogicalId>,
    balancers: HashMap<ListenKey, Balancer>,
    active: bool,
    done: bool,
    stop_waiters: Vec<oneshot::Sender<()>>,
}

impl<O: Observer + Send + Sync + 'static> Supervisor<O> {
    pub fn new(cfg: Config, spawner: Arc<dyn Spawner>, observer: O) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (journal, feed) = Journal::new(cfg.tap_capacity);
        Self {
            journal,
            feed: Some(feed),
            obs: Arc::new(observer),
            cfg,
            spawner,
            cmd_tx,
            cmd_rx,
            worker_tx,
            worker_rx,
            socket_tx,
            socket_rx,
            timers: Timers::new(timer_tx),
            timer_rx,
            slots: HashMap::new(),
            order: Vec::new(),
            balancers: HashMap::new(),
            active: false,
            done: false,
            stop_waiters: Vec::new(),
        }
    }

    /// Control surface for the loop. Clone freely; handles stay valid until
    /// [`run`](Supervisor::run) returns.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            tx: self.cmd_tx.clone(),
        }
    }

    /// Drives the cluster until a stop completes.
    ///
    /// Consumes the supervisor; each instance covers one standby-to-standby
    /// lifecycle of the fleet.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        if self.cfg.pulse.is_zero() {
            return Err(RuntimeError::InvalidConfig {
                reason: "pulse must be non-zero".into(),
            });
        }
        for id in self.cfg.slot_ids()? {
            self.order.push(id.clone());
            self.slots.insert(id.clone(), Slot::new(id));
        }
        // The observer drains its feed off the loop; a slow sink delays
        // log lines, never a state transition.
        if let Some(feed) = self.feed.take() {
            tokio::spawn(feed.forward(self.obs.clone()));
        }

        let mut pulse = time::interval(self.cfg.pulse);
        pulse.set_missed_tick_behavior(MissedTickBehavior::Delay);
        pulse.tick().await;

        loop {
            let tick = tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => Tick::Cmd(cmd),
                Some(ev) = self.worker_rx.recv() => Tick::Worker(ev),
                Some((key, ev)) = self.socket_rx.recv() => Tick::Socket(key, ev),
                Some(ev) = self.timer_rx.recv() => Tick::Timer(ev),
                _ = pulse.tick(), if self.active => Tick::Pulse,
                else => break,
            };
            match tick {
                Tick::Cmd(cmd) => self.on_command(cmd),
                Tick::Worker(ev) => self.on_worker_event(ev),
                Tick::Socket(key, ev) => self.on_socket_event(key, ev),
                Tick::Timer(ev) => self.on_timer(ev),
                Tick::Pulse => self.on_pulse(),
            }
            if self.done {
                break;
            }
        }
        Ok(())
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start => self.start_cluster(),
            Command::Stop(ack) => self.stop_cluster(ack),
            Command::StopWorker(id) => self.stop_worker(&id),
            Command::Disable(id) => self.disable_slot(&id),
            Command::Enable(id) => self.enable_slot(&id),
            Command::Inspect(reply) => {
                let _ = reply.send(self.view());
            }
        }
    }

    fn start_cluster(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        self.record(Event::now(EventKind::ClusterStarted));
        for id in self.order.clone() {
            self.start_worker(&id);
        }
    }

    fn stop_cluster(&mut self, ack: oneshot::Sender<()>) {
        self.stop_waiters.push(ack);
        if self.active {
            self.record(Event::now(EventKind::ClusterStopping));
        }
        self.active = false;
        for id in self.order.clone() {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.cancel_respawn();
            }
            self.stop_worker(&id);
        }
        for balancer in self.balancers.values_mut() {
            balancer.stop(None);
        }
        self.check_converged();
    }

    fn start_worker(&mut self, id: &LogicalId) {
        match self.slots.get(id) {
            Some(slot) if slot.state == SlotState::Standby && !slot.disabled => {}
            _ => return,
        }
        let now = Instant::now();
        if let Some(slot) = self.slots.get_mut(id) {
            slot.cancel_respawn();
            slot.mark_starting(now);
        }
        self.record(Event::now(EventKind::SlotStarting).with_slot(id));

        let spec = SpawnSpec {
            id: id.clone(),
            path: self.cfg.worker_path.clone(),
            argv: self.cfg.worker_argv.clone(),
            env: self.cfg.environment_for(id),
        };
        match self.spawner.spawn(spec, self.worker_tx.clone()) {
            Ok(worker) => {
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.worker = Some(worker);
                }
            }
            Err(e) => {
                self.record(
                    Event::now(EventKind::SpawnFailed)
                        .with_slot(id)
                        .with_error(e.to_string()),
                );
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.mark_standby();
                }
                self.schedule_respawn(id, false);
            }
        }
    }

    fn stop_worker(&mut self, id: &LogicalId) {
        match self.slots.get(id) {
            Some(slot) if matches!(slot.state, SlotState::Running | SlotState::Starting) => {}
            _ => return,
        }
        // Routing stops before the worker does: no balancer hands this slot
        // another connection once the stop request is in.
        for balancer in self.balancers.values_mut() {
            balancer.remove_worker(id);
        }
        let now = Instant::now();
        let grace = self.cfg.grace;
        let guard = self.timers.arm(grace, TimerEvent::ForceStop(id.clone()));
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        slot.mark_stopping(now, grace);
        if let Some(old) = slot.force_guard.replace(guard) {
            old.cancel();
        }
        if let Some(worker) = slot.worker.clone() {
            worker.request_stop();
        }
        self.record(Event::now(EventKind::SlotStopping).with_slot(id));
    }

    fn disable_slot(&mut self, id: &LogicalId) {
        let state = match self.slots.get_mut(id) {
            Some(slot) => {
                slot.disabled = true;
                slot.cancel_respawn();
                slot.state
            }
            None => return,
        };
        self.record(Event::now(EventKind::SlotDisabled).with_slot(id));
        if matches!(state, SlotState::Running | SlotState::Starting) {
            self.stop_worker(id);
        }
    }

    fn enable_slot(&mut self, id: &LogicalId) {
        let standby = match self.slots.get_mut(id) {
            Some(slot) if slot.disabled => {
                slot.disabled = false;
                slot.state == SlotState::Standby
            }
            _ => return,
        };
        self.record(Event::now(EventKind::SlotEnabled).with_slot(id));
        if self.active && standby {
            self.start_worker(id);
        }
    }

    fn on_worker_event(&mut self, ev: WorkerEvent) {
        match ev.kind {
            WorkerEventKind::Listen(spec) => self.on_worker_listen(&ev.id, spec),
            WorkerEventKind::Health(report) => {
                if let Some(slot) = self.slots.get_mut(&ev.id) {
                    if matches!(slot.state, SlotState::Running | SlotState::Stopping) {
                        slot.health = Some(report);
                    }
                }
            }
            WorkerEventKind::Exited => self.on_worker_exit(&ev.id),
        }
    }

    fn on_worker_listen(&mut self, id: &LogicalId, spec: ListenSpec) {
        match self.slots.get(id).map(|s| s.state) {
            Some(SlotState::Starting) => {
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.mark_running();
                }
                self.record(
                    Event::now(EventKind::SlotRunning)
                        .with_slot(id)
                        .with_port(spec.port),
                );
            }
            // Another listener from an already-running child.
            Some(SlotState::Running) => {}
            // A dying child reporting late never re-enters a ring.
            _ => return,
        }
        let Some(worker) = self.slots.get(id).and_then(|s| s.worker.clone()) else {
            return;
        };

        let socket_tx = self.socket_tx.clone();
        let journal = self.journal.clone();
        let timers = self.timers.clone();
        let cfg = &self.cfg;
        let balancer = self.balancers.entry(spec.key()).or_insert_with(|| {
            Balancer::new(
                spec,
                Box::new(TcpDriver::new(spec, socket_tx)),
                cfg,
                journal,
                timers,
            )
        });
        balancer.add_worker(worker);
        balancer.start();
    }

    fn on_worker_exit(&mut self, id: &LogicalId) {
        let (was_stopping, forced) = match self.slots.get_mut(id) {
            Some(slot) if slot.state != SlotState::Standby => {
                let was_stopping = slot.state == SlotState::Stopping;
                slot.mark_standby();
                (was_stopping, slot.forced_stop)
            }
            _ => return,
        };
        for balancer in self.balancers.values_mut() {
            balancer.remove_worker(id);
        }
        let mut ev = Event::now(EventKind::SlotStandby).with_slot(id);
        if !was_stopping {
            ev = ev.with_error("worker exited unexpectedly");
        }
        self.record(ev);

        if self.active {
            self.schedule_respawn(id, forced);
        } else {
            self.check_converged();
        }
    }

    fn schedule_respawn(&mut self, id: &LogicalId, forced: bool) {
        if !self.active {
            return;
        }
        match self.slots.get(id) {
            Some(slot) if !slot.disabled => {
                if !(self.cfg.should_restart)(id, forced) {
                    return;
                }
            }
            _ => return,
        }
        let strategy = self.cfg.respawn_backoff;
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        let delay = slot.next_backoff(strategy);
        let guard = self.timers.arm(delay, TimerEvent::Respawn(id.clone()));
        if let Some(slot) = self.slots.get_mut(id) {
            slot.respawn_guard = Some(guard);
        }
        self.record(
            Event::now(EventKind::RespawnScheduled)
                .with_slot(id)
                .with_delay(delay),
        );
    }

    fn on_socket_event(&mut self, key: ListenKey, ev: SocketEvent) {
        let Some(balancer) = self.balancers.get_mut(&key) else {
            return;
        };
        match ev {
            SocketEvent::Listening(addr) => balancer.on_listening(addr),
            SocketEvent::Connection(conn) => balancer.on_connection(conn),
            SocketEvent::Error(e) => balancer.on_error(&e),
            SocketEvent::Closed => {
                balancer.on_close();
                if !self.active {
                    self.check_converged();
                }
            }
        }
    }

    fn on_timer(&mut self, ev: TimerEvent) {
        match ev {
            TimerEvent::Restart(key) => {
                if let Some(balancer) = self.balancers.get_mut(&key) {
                    balancer.on_restart_due();
                }
            }
            TimerEvent::Drain(key) => {
                if let Some(balancer) = self.balancers.get_mut(&key) {
                    balancer.on_drain_due();
                }
            }
            TimerEvent::ForceStop(id) => self.on_force_stop(&id),
            TimerEvent::Respawn(id) => {
                if self.active {
                    self.start_worker(&id);
                }
            }
        }
    }

    fn on_force_stop(&mut self, id: &LogicalId) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        // A stale deadline for a child that exited in time.
        if slot.state != SlotState::Stopping {
            return;
        }
        slot.forced_stop = true;
        slot.force_guard = None;
        let worker = slot.worker.clone();
        self.record(Event::now(EventKind::SlotForcedStop).with_slot(id));
        if let Some(worker) = worker {
            worker.terminate();
        }
        // The slot reaches standby once the subsystem confirms the exit.
    }

    fn on_pulse(&mut self) {
        let policy = self.cfg.is_healthy.clone();
        let mut failing = Vec::new();
        for (id, slot) in &self.slots {
            if slot.state != SlotState::Running {
                continue;
            }
            let Some(report) = &slot.health else {
                continue;
            };
            if !policy(report) {
                failing.push(id.clone());
            }
        }
        for id in failing {
            self.record(Event::now(EventKind::SlotUnhealthy).with_slot(&id));
            self.stop_worker(&id);
        }
    }

    fn check_converged(&mut self) {
        if self.active {
            return;
        }
        let slots_idle = self.slots.values().all(|s| s.state == SlotState::Standby);
        let balancers_idle = self
            .balancers
            .values()
            .all(|b| b.state() == BalancerState::Standby);
        if slots_idle && balancers_idle {
            if !self.done {
                self.record(Event::now(EventKind::AllStandby));
                self.done = true;
            }
            for ack in self.stop_waiters.drain(..) {
                let _ = ack.send(());
            }
        }
    }

    fn view(&self) -> ClusterView {
        ClusterView {
            workers: self
                .order
                .iter()
                .filter_map(|id| self.slots.get(id))
                .map(Slot::view)
                .collect(),
            balancers: self.balancers.values().map(Balancer::inspect).collect(),
        }
    }

    fn record(&self, ev: Event) {
        self.journal.record(ev);
    }
}
