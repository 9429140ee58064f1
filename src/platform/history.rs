//! Bounded log of terminal action transitions

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

use super::types::{Action, ActionPriority, ActionType, AgentId};

/// How an action left the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Completed,
    Failed,
    /// Lost a conflict
    Rejected,
    /// Dropped to admit a newer action under the pending cap
    Evicted,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub action_id: Uuid,
    pub source: AgentId,
    pub action_type: ActionType,
    pub priority: ActionPriority,
    pub outcome: HistoryOutcome,
    pub attempts: u32,
    pub details: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        action: &Action,
        outcome: HistoryOutcome,
        details: serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action_id: action.id,
            source: action.source,
            action_type: action.action_type,
            priority: action.priority,
            outcome,
            attempts: action.attempts,
            details,
            recorded_at,
        }
    }

    pub fn success(&self) -> bool {
        self.outcome == HistoryOutcome::Completed
    }
}

/// Ring buffer of history entries; the oldest entry is dropped past capacity
#[derive(Debug)]
pub struct ActionHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    total_recorded: u64,
}

impl ActionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            total_recorded: 0,
        }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        self.total_recorded += 1;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The most recent `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn find(&self, action_id: &Uuid) -> Option<&HistoryEntry> {
        self.entries.iter().rev().find(|e| e.action_id == *action_id)
    }

    pub fn count(&self, outcome: HistoryOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(seq: u64) -> HistoryEntry {
        let action = Action::admit(
            seq,
            AgentId::Guardian,
            ActionType::Rebalance,
            ActionPriority::Medium,
            json!({}),
            Utc::now(),
        );
        HistoryEntry::new(
            &action,
            HistoryOutcome::Completed,
            json!({ "seq": seq }),
            action.submitted_at + chrono::Duration::seconds(seq as i64),
        )
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let mut history = ActionHistory::new(3);
        for seq in 0..5 {
            history.record(entry(seq));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.total_recorded(), 5);

        let recent = history.recent(10);
        assert_eq!(recent[0].details["seq"], 2);
        assert_eq!(recent[2].details["seq"], 4);
    }

    #[test]
    fn recent_returns_tail() {
        let mut history = ActionHistory::new(10);
        for seq in 0..4 {
            history.record(entry(seq));
        }
        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].details["seq"], 3);
        assert!(recent[0].recorded_at < recent[1].recorded_at);
        assert_eq!(history.count(HistoryOutcome::Completed), 4);
    }
}
