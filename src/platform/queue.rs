//! Action Queues - one FIFO queue per priority level

use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

use super::types::ActionPriority;

/// Priority queues holding the ids of pending actions.
///
/// Queues are drained strictly in priority order (critical, high, medium, low),
/// first-in-first-out within a level.
#[derive(Debug, Default)]
pub struct ActionQueues {
    queues: [VecDeque<Uuid>; 4],
    /// Stats: ids ever enqueued
    enqueued_count: u64,
    /// Stats: ids handed out for execution
    dequeued_count: u64,
    /// Stats: ids removed by conflict resolution
    removed_count: u64,
    /// Stats: ids evicted for capacity
    evicted_count: u64,
}

impl ActionQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action id to the back of its priority queue
    pub fn enqueue(&mut self, priority: ActionPriority, id: Uuid) {
        debug!("Enqueuing action {} at priority {}", id, priority);
        self.queues[priority.index()].push_back(id);
        self.enqueued_count += 1;
    }

    /// Take the next id in strict priority order
    pub fn dequeue(&mut self) -> Option<Uuid> {
        for queue in self.queues.iter_mut() {
            if let Some(id) = queue.pop_front() {
                self.dequeued_count += 1;
                return Some(id);
            }
        }
        None
    }

    /// Remove an id wherever it is queued. Returns whether it was found.
    pub fn remove(&mut self, id: &Uuid) -> bool {
        for queue in self.queues.iter_mut() {
            if let Some(pos) = queue.iter().position(|queued| queued == id) {
                queue.remove(pos);
                self.removed_count += 1;
                return true;
            }
        }
        false
    }

    /// Pop the oldest id from the lowest non-empty evictable queue (low, then medium).
    ///
    /// Critical and high priority actions are never evicted.
    pub fn evict_oldest_evictable(&mut self) -> Option<(ActionPriority, Uuid)> {
        for priority in [ActionPriority::Low, ActionPriority::Medium] {
            if let Some(id) = self.queues[priority.index()].pop_front() {
                self.evicted_count += 1;
                return Some((priority, id));
            }
        }
        None
    }

    /// The id [`ActionQueues::evict_oldest_evictable`] would pop next
    pub fn peek_evictable(&self) -> Option<Uuid> {
        [ActionPriority::Low, ActionPriority::Medium]
            .into_iter()
            .find_map(|priority| self.queues[priority.index()].front().copied())
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.queues.iter().any(|q| q.contains(id))
    }

    /// Total number of queued ids
    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    pub fn depth(&self, priority: ActionPriority) -> usize {
        self.queues[priority.index()].len()
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            critical: self.depth(ActionPriority::Critical),
            high: self.depth(ActionPriority::High),
            medium: self.depth(ActionPriority::Medium),
            low: self.depth(ActionPriority::Low),
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depths: self.depths(),
            enqueued_total: self.enqueued_count,
            dequeued_total: self.dequeued_count,
            removed_total: self.removed_count,
            evicted_total: self.evicted_count,
        }
    }
}

/// Current depth of each priority queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub depths: QueueDepths,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub removed_total: u64,
    pub evicted_total: u64,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queues[{}, enq={}, deq={}, rm={}, evict={}, C={}/H={}/M={}/L={}]",
            self.depths.total(),
            self.enqueued_total,
            self.dequeued_total,
            self.removed_total,
            self.evicted_total,
            self.depths.critical,
            self.depths.high,
            self.depths.medium,
            self.depths.low
        )
    }
}
