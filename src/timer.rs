use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::balancer::ListenKey;
use crate::worker::LogicalId;

/// One-shot deadlines routed back into the supervisor loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum TimerEvent {
    /// A balancer's latched restart is due.
    Restart(ListenKey),
    /// Continue a quota-capped backlog drain.
    Drain(ListenKey),
    /// A stopping worker's grace window elapsed.
    ForceStop(LogicalId),
    /// A standby slot is due to be started again.
    Respawn(LogicalId),
}

/// Arms cancellable one-shot timers as spawned tasks.
///
/// The timer races its sleep against the returned token; a cancelled timer
/// delivers nothing. Firing strictly trails whatever event armed the timer,
/// because delivery goes through the same loop channel.
#[derive(Clone)]
pub(crate) struct Timers {
    tx: mpsc::UnboundedSender<TimerEvent>,
}

impl Timers {
    pub(crate) fn new(tx: mpsc::UnboundedSender<TimerEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn arm(&self, delay: Duration, event: TimerEvent) -> CancellationToken {
        let token = CancellationToken::new();
        let guard = token.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {
                    let _ = tx.send(event);
                }
                _ = token.cancelled() => {}
            }
        });
        guard
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;

    fn key() -> ListenKey {
        ListenKey {
            address: IpAddr::from([127, 0, 0, 1]),
            port: 9000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_the_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = Timers::new(tx);
        timers.arm(Duration::from_millis(250), TimerEvent::Restart(key()));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, TimerEvent::Restart(key()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_stays_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = Timers::new(tx);
        let guard = timers.arm(Duration::from_millis(50), TimerEvent::Drain(key()));
        guard.cancel();

        let raced = time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(raced.is_err());
    }
}
