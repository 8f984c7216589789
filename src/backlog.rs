//! # FIFO of accepted connections awaiting a worker.
//!
//! Connections land here whenever the balancer cannot dispatch immediately:
//! before the listener is up, while the ring is empty, or while a capped
//! drain pass is still working through older entries. The queue can be
//! bounded; overflow evicts according to [`DropPolicy`]. Popping filters out
//! connections the local stack already tore down, so a stale backlog does
//! not waste rotation steps on dead sockets.

use std::collections::VecDeque;

use crate::socket::ConnRef;

/// What to evict when a bounded backlog overflows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DropPolicy {
    /// Evict the head, keep the incoming connection.
    #[default]
    Oldest,
    /// Refuse the incoming connection, keep the queue.
    Newest,
}

pub struct Backlog {
    queue: VecDeque<ConnRef>,
    /// 0 means unbounded.
    cap: usize,
    policy: DropPolicy,
}

impl Backlog {
    pub fn new(cap: usize, policy: DropPolicy) -> Self {
        Self {
            queue: VecDeque::new(),
            cap,
            policy,
        }
    }

    /// Enqueues `conn`; a full bounded backlog yields the evicted connection.
    pub fn push(&mut self, conn: ConnRef) -> Option<ConnRef> {
        if self.cap > 0 && self.queue.len() >= self.cap {
            return match self.policy {
                DropPolicy::Oldest => {
                    let victim = self.queue.pop_front();
                    self.queue.push_back(conn);
                    victim
                }
                DropPolicy::Newest => Some(conn),
            };
        }
        self.queue.push_back(conn);
        None
    }

    /// FIFO pop that discards connections the peer already abandoned.
    pub fn pop_live(&mut self) -> Option<ConnRef> {
        while let Some(conn) = self.queue.pop_front() {
            if conn.is_open() {
                return Some(conn);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
