//! Event journal.
//!
//! Every lifecycle event the supervisor or a balancer records goes two
//! ways. The configured [`Observer`] gets a lossless, ordered feed over an
//! unbounded channel, so a slow log sink can fall behind but never miss a
//! transition. Diagnostic taps get a bounded broadcast mirror that may lag
//! and drop events without ever slowing the loop down.
//!
//! [`Journal`] is the cheap-to-clone sender half, held by the supervisor
//! and every balancer. The matching [`EventFeed`] is consumed once, by the
//! delivery task the supervisor spawns for its observer.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::event::Event;
use crate::observer::Observer;

/// Records lifecycle events for the observer and any open taps.
#[derive(Clone)]
pub struct Journal {
    observer_q: mpsc::UnboundedSender<Event>,
    taps: broadcast::Sender<Event>,
}

/// The observer's private side of a [`Journal`].
pub(crate) struct EventFeed {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Journal {
    /// Creates a journal plus the feed its observer will drain.
    pub(crate) fn new(tap_capacity: usize) -> (Self, EventFeed) {
        let (observer_q, rx) = mpsc::unbounded_channel();
        // Taps are best-effort; a zero capacity still gets a live channel.
        let (taps, _) = broadcast::channel(tap_capacity.max(1));
        (Self { observer_q, taps }, EventFeed { rx })
    }

    /// Records one event. Never blocks; a dropped feed or an empty tap
    /// list is not an error.
    pub(crate) fn record(&self, ev: Event) {
        if self.taps.receiver_count() > 0 {
            let _ = self.taps.send(ev.clone());
        }
        let _ = self.observer_q.send(ev);
    }

    /// Opens a diagnostic tap on the event stream.
    pub fn tap(&self) -> broadcast::Receiver<Event> {
        self.taps.subscribe()
    }
}

impl EventFeed {
    /// Hands every recorded event to `observer`, one at a time, in record
    /// order. Returns once the last [`Journal`] clone is gone.
    pub(crate) async fn forward<O: Observer + Send + Sync>(mut self, observer: Arc<O>) {
        while let Some(ev) = self.rx.recv().await {
            observer.on_event(&ev).await;
        }
    }
}
