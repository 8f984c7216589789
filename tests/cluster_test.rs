//! End-to-end tests: a mock worker subsystem wired into the supervisor,
//! real ephemeral listeners, real client connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::sleep;

use nanny::{
    ClusterView, Config, ConnRef, EventKind, ListenSpec, LoggerObserver, LogicalId, RespawnBackoff,
    RuntimeError, SlotState, SpawnSpec, Spawner, Supervisor, SupervisorHandle, Worker, WorkerEvent,
    WorkerEventKind, WorkerRef, WorkerSender,
};

#[derive(Default)]
struct Shared {
    spawns: Mutex<Vec<String>>,
    dispatches: Mutex<Vec<String>>,
    addresses: Mutex<Vec<(String, SocketAddr)>>,
    senders: Mutex<HashMap<String, WorkerSender>>,
    ignore_stop: AtomicBool,
}

struct MockWorker {
    id: LogicalId,
    shared: Arc<Shared>,
    events: WorkerSender,
}

impl Worker for MockWorker {
    fn id(&self) -> &LogicalId {
        &self.id
    }

    fn send_address(&self, _port: u16, address: SocketAddr) {
        self.shared
            .addresses
            .lock()
            .unwrap()
            .push((self.id.to_string(), address));
    }

    fn send_error(&self, _port: u16, _error: &str) {}

    fn handle_connection(&self, _port: u16, conn: ConnRef) {
        self.shared
            .dispatches
            .lock()
            .unwrap()
            .push(self.id.to_string());
        drop(conn);
    }

    fn request_stop(&self) {
        if self.shared.ignore_stop.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.events.send(WorkerEvent {
            id: self.id.clone(),
            kind: WorkerEventKind::Exited,
        });
    }

    fn terminate(&self) {
        let _ = self.events.send(WorkerEvent {
            id: self.id.clone(),
            kind: WorkerEventKind::Exited,
        });
    }
}

struct MockSpawner {
    shared: Arc<Shared>,
}

impl Spawner for MockSpawner {
    fn spawn(&self, spec: SpawnSpec, events: WorkerSender) -> std::io::Result<WorkerRef> {
        self.shared
            .spawns
            .lock()
            .unwrap()
            .push(spec.id.to_string());
        self.shared
            .senders
            .lock()
            .unwrap()
            .insert(spec.id.to_string(), events.clone());
        let _ = events.send(WorkerEvent {
            id: spec.id.clone(),
            kind: WorkerEventKind::Listen(ListenSpec {
                address: [127, 0, 0, 1].into(),
                port: 0,
                backlog: 16,
            }),
        });
        Ok(Arc::new(MockWorker {
            id: spec.id,
            shared: self.shared.clone(),
            events,
        }))
    }
}

fn fleet(cfg: Config) -> (SupervisorHandle, Arc<Shared>) {
    let shared = Arc::new(Shared::default());
    let supervisor = Supervisor::new(
        cfg,
        Arc::new(MockSpawner {
            shared: shared.clone(),
        }),
        LoggerObserver,
    );
    let handle = supervisor.handle();
    tokio::spawn(supervisor.run());
    (handle, shared)
}

async fn wait_for(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_view(
    handle: &SupervisorHandle,
    cond: impl Fn(&ClusterView) -> bool,
    what: &str,
) -> ClusterView {
    for _ in 0..300 {
        if let Ok(view) = handle.inspect().await {
            if cond(&view) {
                return view;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn fast_backoff() -> RespawnBackoff {
    RespawnBackoff {
        first: Duration::from_millis(50),
        max: Duration::from_millis(200),
        factor: 2.0,
    }
}

#[tokio::test]
async fn connections_rotate_across_the_fleet() {
    let mut cfg = Config::default();
    cfg.worker_count = 2;
    let (handle, shared) = fleet(cfg);
    handle.start().unwrap();

    let view = wait_view(
        &handle,
        |v| v.count_running_workers() == 2 && v.count_running_balancers() == 1,
        "fleet up",
    )
    .await;
    let addr = view.balancers[0].address.unwrap();

    // Both workers learned the bound address before anything was dispatched.
    assert_eq!(shared.addresses.lock().unwrap().len(), 2);

    let mut streams = Vec::new();
    for _ in 0..6 {
        streams.push(TcpStream::connect(addr).await.unwrap());
    }
    {
        let shared = shared.clone();
        wait_for(
            move || shared.dispatches.lock().unwrap().len() == 6,
            "six dispatches",
        )
        .await;
    }
    assert_eq!(
        *shared.dispatches.lock().unwrap(),
        ["0", "1", "0", "1", "0", "1"]
    );

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn a_crashed_worker_is_respawned_into_its_slot() {
    let mut cfg = Config::default();
    cfg.worker_count = 1;
    cfg.respawn_backoff = fast_backoff();
    let (handle, shared) = fleet(cfg);
    handle.start().unwrap();
    wait_view(&handle, |v| v.count_running_workers() == 1, "worker up").await;

    let sender = shared.senders.lock().unwrap().get("0").unwrap().clone();
    sender
        .send(WorkerEvent {
            id: LogicalId::from(0),
            kind: WorkerEventKind::Exited,
        })
        .unwrap();

    {
        let shared = shared.clone();
        wait_for(
            move || shared.spawns.lock().unwrap().len() == 2,
            "a respawn",
        )
        .await;
    }
    wait_view(&handle, |v| v.count_running_workers() == 1, "worker back").await;
    assert_eq!(*shared.spawns.lock().unwrap(), ["0", "0"]);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn an_unhealthy_worker_is_stopped_and_replaced() {
    let mut cfg = Config::default();
    cfg.worker_count = 1;
    cfg.pulse = Duration::from_millis(50);
    cfg.respawn_backoff = fast_backoff();
    cfg.is_healthy = Arc::new(|report: &nanny::HealthReport| report.load < 100);

    let shared = Arc::new(Shared::default());
    let supervisor = Supervisor::new(
        cfg,
        Arc::new(MockSpawner {
            shared: shared.clone(),
        }),
        LoggerObserver,
    );
    let handle = supervisor.handle();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut tap = supervisor.journal.tap();
    let seen_writer = seen.clone();
    tokio::spawn(async move {
        while let Ok(ev) = tap.recv().await {
            seen_writer.lock().unwrap().push(ev.kind);
        }
    });
    tokio::spawn(supervisor.run());

    handle.start().unwrap();
    wait_view(&handle, |v| v.count_running_workers() == 1, "worker up").await;

    let sender = shared.senders.lock().unwrap().get("0").unwrap().clone();
    sender
        .send(WorkerEvent {
            id: LogicalId::from(0),
            kind: WorkerEventKind::Health(nanny::HealthReport {
                load: 500,
                ..Default::default()
            }),
        })
        .unwrap();

    {
        let shared = shared.clone();
        wait_for(
            move || shared.spawns.lock().unwrap().len() == 2,
            "the replacement",
        )
        .await;
    }
    assert_eq!(*shared.spawns.lock().unwrap(), ["0", "0"]);
    {
        let seen = seen.clone();
        wait_for(
            move || seen.lock().unwrap().contains(&EventKind::SlotUnhealthy),
            "the unhealthy verdict",
        )
        .await;
    }

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn a_stuck_worker_is_terminated_after_the_grace_window() {
    let mut cfg = Config::default();
    cfg.worker_count = 1;
    cfg.grace = Duration::from_millis(100);
    cfg.should_restart = Arc::new(|_, _| false);
    let (handle, shared) = fleet(cfg);
    handle.start().unwrap();
    wait_view(&handle, |v| v.count_running_workers() == 1, "worker up").await;

    shared.ignore_stop.store(true, Ordering::SeqCst);
    let requested = std::time::Instant::now();
    handle.stop_worker(LogicalId::from(0)).unwrap();

    let view = wait_view(
        &handle,
        |v| v.workers[0].state == SlotState::Standby,
        "forced exit",
    )
    .await;
    assert!(requested.elapsed() >= Duration::from_millis(100));
    assert!(view.workers[0].forced_stop);

    // With restarts vetoed the slot stays down.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(shared.spawns.lock().unwrap().len(), 1);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn the_backlog_survives_a_worker_bounce() {
    let mut cfg = Config::default();
    cfg.worker_count = 1;
    cfg.respawn_backoff = RespawnBackoff {
        first: Duration::from_millis(300),
        max: Duration::from_millis(300),
        factor: 1.0,
    };
    let (handle, shared) = fleet(cfg);
    handle.start().unwrap();

    let view = wait_view(
        &handle,
        |v| v.count_running_workers() == 1 && v.count_running_balancers() == 1,
        "fleet up",
    )
    .await;
    let addr = view.balancers[0].address.unwrap();

    handle.stop_worker(LogicalId::from(0)).unwrap();
    wait_view(
        &handle,
        |v| v.workers[0].state == SlotState::Standby,
        "worker down",
    )
    .await;

    // The listener stays up while the slot is empty; connections queue.
    let mut streams = Vec::new();
    for _ in 0..3 {
        streams.push(TcpStream::connect(addr).await.unwrap());
    }
    wait_view(&handle, |v| v.balancers[0].backlog == 3, "a full backlog").await;
    assert!(shared.dispatches.lock().unwrap().is_empty());

    // The respawned occupant of the same slot inherits the queue.
    {
        let shared = shared.clone();
        wait_for(
            move || shared.dispatches.lock().unwrap().len() == 3,
            "the drain",
        )
        .await;
    }
    assert!(shared
        .dispatches
        .lock()
        .unwrap()
        .iter()
        .all(|id| id == "0"));
    assert_eq!(shared.spawns.lock().unwrap().len(), 2);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn a_disabled_slot_stays_down_until_enabled() {
    let mut cfg = Config::default();
    cfg.worker_count = 1;
    cfg.respawn_backoff = fast_backoff();
    let (handle, shared) = fleet(cfg);
    handle.start().unwrap();
    wait_view(&handle, |v| v.count_running_workers() == 1, "worker up").await;

    handle.disable(LogicalId::from(0)).unwrap();
    let view = wait_view(
        &handle,
        |v| v.workers[0].state == SlotState::Standby,
        "worker down",
    )
    .await;
    assert!(view.workers[0].disabled);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(shared.spawns.lock().unwrap().len(), 1);

    handle.enable(LogicalId::from(0)).unwrap();
    {
        let shared = shared.clone();
        wait_for(
            move || shared.spawns.lock().unwrap().len() == 2,
            "the comeback",
        )
        .await;
    }
    wait_view(&handle, |v| v.count_running_workers() == 1, "worker back").await;

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn graceful_stop_brings_everything_to_standby() {
    let mut cfg = Config::default();
    cfg.worker_count = 2;
    let (handle, _shared) = fleet(cfg);
    handle.start().unwrap();
    wait_view(
        &handle,
        |v| v.count_running_workers() == 2 && v.count_running_balancers() == 1,
        "fleet up",
    )
    .await;

    handle.stop().await.unwrap();

    // The loop has wound down; the handle is dead.
    assert!(matches!(handle.inspect().await, Err(RuntimeError::Closed)));
}

#[tokio::test]
async fn stop_resolves_even_before_start() {
    let (handle, _shared) = fleet(Config::default());
    handle.stop().await.unwrap();
    assert!(matches!(handle.inspect().await, Err(RuntimeError::Closed)));
}

#[tokio::test]
async fn explicit_ids_name_the_slots() {
    let mut cfg = Config::default();
    cfg.logical_ids = vec!["api".into(), "jobs".into()];
    let (handle, shared) = fleet(cfg);
    handle.start().unwrap();

    wait_view(&handle, |v| v.count_running_workers() == 2, "fleet up").await;
    let mut spawned = shared.spawns.lock().unwrap().clone();
    spawned.sort();
    assert_eq!(spawned, ["api", "jobs"]);

    handle.stop().await.unwrap();
}
