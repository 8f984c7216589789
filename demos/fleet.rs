//! # Fleet demo
//!
//! Runs three in-process "workers" behind one round-robin listener. Each
//! worker greets the connections it is handed, reports a health sample per
//! pulse, and the middle one is deliberately reported unhealthy so the
//! supervisor recycles it while traffic keeps flowing.
//!
//! ## Run
//! ```bash
//! cargo run --example fleet
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

use nanny::{
    Config, ConnRef, Connection, HealthReport, ListenSpec, LoggerObserver, LogicalId, SpawnSpec,
    Spawner, Supervisor, Worker, WorkerEvent, WorkerEventKind, WorkerRef, WorkerSender,
};

/// A "child process" that never leaves the demo binary: it greets every
/// connection it is handed and feeds health samples back per pulse.
struct GreeterWorker {
    id: LogicalId,
    events: WorkerSender,
}

impl Worker for GreeterWorker {
    fn id(&self) -> &LogicalId {
        &self.id
    }

    fn send_address(&self, port: u16, address: SocketAddr) {
        println!("      worker {} sees port {port} at {address}", self.id);
    }

    fn send_error(&self, port: u16, error: &str) {
        println!("      worker {} lost port {port}: {error}", self.id);
    }

    fn handle_connection(&self, _port: u16, mut conn: ConnRef) {
        let Some(mut stream) = conn.take_stream() else {
            return;
        };
        let greeting = format!("hello from worker {}\n", self.id);
        tokio::spawn(async move {
            let _ = stream.write_all(greeting.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }

    fn request_stop(&self) {
        let _ = self.events.send(WorkerEvent {
            id: self.id.clone(),
            kind: WorkerEventKind::Exited,
        });
    }

    fn terminate(&self) {
        self.request_stop();
    }
}

struct GreeterSpawner;

impl Spawner for GreeterSpawner {
    fn spawn(&self, spec: SpawnSpec, events: WorkerSender) -> io::Result<WorkerRef> {
        let _ = events.send(WorkerEvent {
            id: spec.id.clone(),
            kind: WorkerEventKind::Listen(ListenSpec {
                address: [127, 0, 0, 1].into(),
                port: 0,
                backlog: 64,
            }),
        });

        // One health sample per pulse; worker "1" reports itself busy far
        // beyond the window so the policy below recycles it.
        let reporter = events.clone();
        let id = spec.id.clone();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(400)).await;
                let load = if id.as_str() == "1" { 9_000 } else { 12 };
                if reporter
                    .send(WorkerEvent {
                        id: id.clone(),
                        kind: WorkerEventKind::Health(HealthReport {
                            load,
                            ..Default::default()
                        }),
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(Arc::new(GreeterWorker {
            id: spec.id,
            events,
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cfg = Config::default();
    cfg.worker_count = 3;
    cfg.pulse = Duration::from_millis(500);
    cfg.grace = Duration::from_secs(2);
    cfg.is_healthy = Arc::new(|report: &HealthReport| report.load < 1_000);

    let supervisor = Supervisor::new(cfg, Arc::new(GreeterSpawner), LoggerObserver);
    let handle = supervisor.handle();
    tokio::spawn(supervisor.run());

    handle.start()?;

    // Wait for the fleet and grab the OS-granted address.
    let addr = loop {
        let view = handle.inspect().await?;
        if view.count_running_workers() == 3 {
            if let Some(addr) = view.balancers.first().and_then(|b| b.address) {
                break addr;
            }
        }
        sleep(Duration::from_millis(50)).await;
    };
    println!("fleet is up at {addr}");

    for round in 1..=3 {
        println!("round {round}");
        for _ in 0..3 {
            let mut stream = TcpStream::connect(addr).await?;
            let mut reply = String::new();
            use tokio::io::AsyncReadExt;
            stream.read_to_string(&mut reply).await?;
            print!("  -> {reply}");
        }
        // Give the pulse a chance to catch the unhealthy worker between
        // rounds; its replacement joins the rotation seamlessly.
        sleep(Duration::from_millis(700)).await;
    }

    handle.stop().await?;
    println!("all standby");
    Ok(())
}
