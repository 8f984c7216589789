use std::collections::VecDeque;

use crate::worker::{LogicalId, WorkerRef};

/// Rotating sequence of the workers eligible for the next connection.
///
/// Rotation pops the head, re-appends it and hands it back, so dispatch
/// order is the order of registration. Membership is unique per worker id.
#[derive(Default)]
pub struct Ring {
    members: VecDeque<WorkerRef>,
}

impl Ring {
    pub fn new() -> Self {
        Self {
            members: VecDeque::new(),
        }
    }

    /// Appends `worker` unless a member with the same id is already present.
    pub fn push(&mut self, worker: WorkerRef) -> bool {
        if self.contains(worker.id()) {
            return false;
        }
        self.members.push_back(worker);
        true
    }

    /// Removes the member with `id`. Absence is not an error.
    pub fn remove(&mut self, id: &LogicalId) -> bool {
        let before = self.members.len();
        self.members.retain(|w| w.id() != id);
        self.members.len() != before
    }

    /// Pops the head, re-appends it and returns it. `None` on an empty ring.
    pub fn rotate(&mut self) -> Option<WorkerRef> {
        let head = self.members.pop_front()?;
        self.members.push_back(head.clone());
        Some(head)
    }

    pub fn contains(&self, id: &LogicalId) -> bool {
        self.members.iter().any(|w| w.id() == id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRef> {
        self.members.iter()
    }
}
