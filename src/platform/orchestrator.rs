//! Conflict Orchestrator - single decision authority over proposed actions
//!
//! Admission, conflict resolution and queueing happen in `submit_action`;
//! execution happens in `process_tick`. Both take the state lock for their
//! bookkeeping only, so handlers run without blocking new submissions.
//! Actions picked by a tick are marked executing first and can never be
//! rejected afterwards.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::conflict::ConflictRuleTable;
use super::handlers::HandlerRegistry;
use super::history::{ActionHistory, HistoryEntry, HistoryOutcome};
use super::queue::{ActionQueues, QueueDepths};
use super::types::{
    Action, ActionPriority, ActionProposal, ActionStatus, ActionType, AgentId, OrchestratorEvent,
};
use crate::clock::SharedClock;
use crate::config::OrchestratorConfig;
use crate::error::{ActionError, GuardError, Result};

/// Orchestrator counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStats {
    pub submitted: u64,
    /// Handler invocations, retries included
    pub executed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub timed_out: u64,
    pub pending: usize,
    pub depths: QueueDepths,
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub executed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

struct OrchestratorState {
    /// Live actions (pending or executing)
    actions: HashMap<Uuid, Action>,
    queues: ActionQueues,
    history: ActionHistory,
    next_sequence: u64,
    stats: OrchestratorStats,
}

impl OrchestratorState {
    fn pending_count(&self) -> usize {
        self.actions.values().filter(|a| a.is_pending()).count()
    }
}

pub struct ConflictOrchestrator {
    config: OrchestratorConfig,
    rules: ConflictRuleTable,
    handlers: HandlerRegistry,
    state: Mutex<OrchestratorState>,
    /// Keeps ticks from overlapping
    tick_lock: Mutex<()>,
    events: broadcast::Sender<OrchestratorEvent>,
    clock: SharedClock,
}

impl ConflictOrchestrator {
    /// Fails if the conflict rule table cannot be built
    pub fn new(config: OrchestratorConfig, handlers: HandlerRegistry, clock: SharedClock) -> Result<Self> {
        let rules = ConflictRuleTable::with_hierarchy(config.source_hierarchy.clone())?;
        Self::with_rules(config, rules, handlers, clock)
    }

    pub fn with_rules(
        config: OrchestratorConfig,
        rules: ConflictRuleTable,
        handlers: HandlerRegistry,
        clock: SharedClock,
    ) -> Result<Self> {
        if config.batch_size == 0 || config.max_pending_actions == 0 {
            return Err(GuardError::Validation(
                "batch size and pending cap must be positive".into(),
            ));
        }
        let missing = handlers.missing();
        if !missing.is_empty() {
            warn!("No handler registered for {:?}; those actions will fail", missing);
        }

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        info!(
            "Orchestrator ready: {} rules, hierarchy {:?}, cap {}, batch {}",
            rules.rules().len(),
            rules.hierarchy(),
            config.max_pending_actions,
            config.batch_size
        );

        Ok(Self {
            state: Mutex::new(OrchestratorState {
                actions: HashMap::new(),
                queues: ActionQueues::new(),
                history: ActionHistory::new(config.history_limit),
                next_sequence: 0,
                stats: OrchestratorStats::default(),
            }),
            config,
            rules,
            handlers,
            tick_lock: Mutex::new(()),
            events,
            clock,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: OrchestratorEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub async fn submit(&self, proposal: ActionProposal) -> Result<Uuid> {
        self.submit_action(
            proposal.source,
            proposal.action_type,
            proposal.priority,
            proposal.payload,
        )
        .await
    }

    /// Admit a new action.
    ///
    /// An out-of-range priority is a validation error and nothing is queued.
    /// An action that loses a conflict on arrival still gets an id; it is
    /// recorded as rejected, never executes and evicts nothing.
    pub async fn submit_action(
        &self,
        source: AgentId,
        action_type: ActionType,
        priority: u8,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        let priority = ActionPriority::try_from(priority)?;
        let now = self.clock.now();

        let mut events = Vec::new();
        let id = {
            let mut state = self.state.lock().await;

            let over_cap = state.pending_count() >= self.config.max_pending_actions;
            let victim = if over_cap {
                state.queues.peek_evictable()
            } else {
                None
            };

            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let mut action = Action::admit(sequence, source, action_type, priority, payload, now);
            let id = action.id;
            state.stats.submitted += 1;
            debug!(
                "Submitted action {} ({} {} from {})",
                id, priority, action_type, source
            );
            events.push(OrchestratorEvent::ActionSubmitted {
                action: action.clone(),
            });

            // the eviction victim is gone by the time the newcomer is queued
            let window = self.config.conflict_window();
            let mut candidates: Vec<&Action> = state
                .actions
                .values()
                .filter(|existing| Some(existing.id) != victim)
                .filter(|existing| now - existing.submitted_at <= window)
                .collect();
            candidates.sort_by_key(|a| a.sequence);

            let mut losers = Vec::new();
            let mut incoming_reason = None;
            for existing in candidates {
                let Some(rule) = self.rules.detect(&action, existing) else {
                    continue;
                };
                let resolution = self.rules.resolve(rule, &action, existing);
                if resolution.loser == id {
                    info!(
                        "Conflict {}: rejecting incoming {} ({})",
                        resolution.rule, id, resolution.reason
                    );
                    incoming_reason = Some(resolution.reason);
                    break;
                }
                if existing.is_executing() {
                    warn!(
                        "Conflict {}: {} is already executing, admitting {} alongside",
                        resolution.rule, existing.id, id
                    );
                    continue;
                }
                info!(
                    "Conflict {}: rejecting pending {} ({})",
                    resolution.rule, existing.id, resolution.reason
                );
                losers.push((existing.id, resolution.reason));
            }

            if let Some(reason) = incoming_reason {
                // nothing is evicted for an action that is never queued
                action.status = ActionStatus::Rejected;
                action.rejection_reason = Some(reason.clone());
                state.history.record(HistoryEntry::new(
                    &action,
                    HistoryOutcome::Rejected,
                    serde_json::json!({ "reason": reason }),
                    now,
                ));
                state.stats.rejected += 1;
                events.push(OrchestratorEvent::ActionRejected { action, reason });
            } else {
                if over_cap {
                    match state.queues.evict_oldest_evictable() {
                        Some((_, evicted_id)) => {
                            if let Some(mut evicted) = state.actions.remove(&evicted_id) {
                                let reason = format!(
                                    "Evicted: pending cap of {} reached",
                                    self.config.max_pending_actions
                                );
                                warn!(
                                    "Evicting action {} ({} {})",
                                    evicted.id, evicted.priority, evicted.action_type
                                );
                                evicted.status = ActionStatus::Rejected;
                                evicted.rejection_reason = Some(reason.clone());
                                state.history.record(HistoryEntry::new(
                                    &evicted,
                                    HistoryOutcome::Evicted,
                                    serde_json::json!({ "reason": reason }),
                                    now,
                                ));
                                state.stats.evicted += 1;
                                events.push(OrchestratorEvent::ActionRejected {
                                    action: evicted,
                                    reason,
                                });
                            }
                        }
                        None => warn!(
                            "Pending cap reached with only critical/high actions queued; admitting {} anyway",
                            action_type
                        ),
                    }
                }

                for (loser_id, reason) in losers {
                    state.queues.remove(&loser_id);
                    if let Some(mut loser) = state.actions.remove(&loser_id) {
                        loser.status = ActionStatus::Rejected;
                        loser.rejection_reason = Some(reason.clone());
                        state.history.record(HistoryEntry::new(
                            &loser,
                            HistoryOutcome::Rejected,
                            serde_json::json!({ "reason": reason, "overridden_by": id }),
                            now,
                        ));
                        state.stats.rejected += 1;
                        events.push(OrchestratorEvent::ActionRejected {
                            action: loser,
                            reason,
                        });
                    }
                }
                state.queues.enqueue(priority, id);
                state.actions.insert(id, action);
            }

            id
        };

        for event in events {
            self.publish(event);
        }
        Ok(id)
    }

    /// Execute up to `batch_size` pending actions in strict priority order
    pub async fn process_tick(&self) -> TickSummary {
        let _tick = self.tick_lock.lock().await;
        let mut summary = TickSummary::default();

        let batch: Vec<Action> = {
            let mut state = self.state.lock().await;
            let mut batch = Vec::with_capacity(self.config.batch_size);
            while batch.len() < self.config.batch_size {
                let Some(id) = state.queues.dequeue() else {
                    break;
                };
                match state.actions.get_mut(&id) {
                    Some(action) if action.is_pending() => {
                        action.status = ActionStatus::Executing;
                        action.attempts += 1;
                        batch.push(action.clone());
                    }
                    _ => debug!("Skipping stale queue entry {}", id),
                }
            }
            state.stats.executed += batch.len() as u64;
            batch
        };

        if batch.is_empty() {
            return summary;
        }
        summary.executed = batch.len();

        let mut outcomes = Vec::with_capacity(batch.len());
        for action in batch {
            let outcome = self.execute(&action).await;
            outcomes.push((action, outcome));
        }

        let now = self.clock.now();
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            let mut retries = Vec::new();

            for (action, outcome) in outcomes {
                match outcome {
                    Ok(result) => {
                        let Some(mut done) = state.actions.remove(&action.id) else {
                            continue;
                        };
                        done.status = ActionStatus::Completed;
                        done.result = Some(result.clone());
                        info!(
                            "Action {} ({} from {}) completed on attempt {}",
                            done.id, done.action_type, done.source, done.attempts
                        );
                        state.history.record(HistoryEntry::new(
                            &done,
                            HistoryOutcome::Completed,
                            result.clone(),
                            now,
                        ));
                        state.stats.completed += 1;
                        summary.completed += 1;
                        events.push(OrchestratorEvent::ActionCompleted {
                            action: done,
                            result,
                        });
                    }
                    Err(err) => {
                        if matches!(err, ActionError::Timeout { .. }) {
                            state.stats.timed_out += 1;
                        }
                        let retryable = action.priority.value() <= self.config.retry_max_priority;

                        if retryable && action.attempts < self.config.max_attempts {
                            let Some(live) = state.actions.get_mut(&action.id) else {
                                continue;
                            };
                            live.status = ActionStatus::Pending;
                            live.last_error = Some(err.to_string());
                            warn!(
                                "Action {} failed on attempt {}, will retry: {}",
                                live.id, live.attempts, err
                            );
                            retries.push((live.priority, live.id));
                            state.stats.retried += 1;
                            summary.retried += 1;
                            let snapshot = state.actions.get(&action.id).cloned();
                            if let Some(snapshot) = snapshot {
                                events.push(OrchestratorEvent::ActionRetrying {
                                    attempt: snapshot.attempts,
                                    action: snapshot,
                                    error: err.to_string(),
                                });
                            }
                            continue;
                        }

                        let final_error = if retryable {
                            ActionError::MaxAttemptsExceeded {
                                attempts: action.attempts,
                                last: err.to_string(),
                            }
                        } else {
                            err
                        };
                        let Some(mut failed) = state.actions.remove(&action.id) else {
                            continue;
                        };
                        failed.status = ActionStatus::Failed;
                        failed.last_error = Some(final_error.to_string());
                        error!(
                            "Action {} ({} from {}) failed: {}",
                            failed.id, failed.action_type, failed.source, final_error
                        );
                        state.history.record(HistoryEntry::new(
                            &failed,
                            HistoryOutcome::Failed,
                            serde_json::json!({ "error": final_error.to_string() }),
                            now,
                        ));
                        state.stats.failed += 1;
                        summary.failed += 1;
                        events.push(OrchestratorEvent::ActionFailed {
                            action: failed,
                            error: final_error.to_string(),
                        });
                    }
                }
            }

            // re-admitted after the batch so an action runs at most once per tick
            for (priority, id) in retries {
                state.queues.enqueue(priority, id);
            }
        }

        for event in events {
            self.publish(event);
        }
        summary
    }

    /// Reject every pending action of `action_type`. Executing actions are
    /// left to finish. Returns the ids that were rejected.
    pub async fn reject_pending(&self, action_type: ActionType, reason: &str) -> Vec<Uuid> {
        let now = self.clock.now();
        let mut events = Vec::new();
        let rejected = {
            let mut state = self.state.lock().await;
            let mut ids: Vec<(u64, Uuid)> = state
                .actions
                .values()
                .filter(|a| a.action_type == action_type && a.is_pending())
                .map(|a| (a.sequence, a.id))
                .collect();
            ids.sort_unstable();

            let mut rejected = Vec::with_capacity(ids.len());
            for (_, id) in ids {
                state.queues.remove(&id);
                let Some(mut action) = state.actions.remove(&id) else {
                    continue;
                };
                action.status = ActionStatus::Rejected;
                action.rejection_reason = Some(reason.to_string());
                state.history.record(HistoryEntry::new(
                    &action,
                    HistoryOutcome::Rejected,
                    serde_json::json!({ "reason": reason }),
                    now,
                ));
                state.stats.rejected += 1;
                rejected.push(id);
                events.push(OrchestratorEvent::ActionRejected {
                    action,
                    reason: reason.to_string(),
                });
            }
            rejected
        };

        if !rejected.is_empty() {
            warn!(
                "Rejected {} pending {} action(s): {}",
                rejected.len(),
                action_type,
                reason
            );
        }
        for event in events {
            self.publish(event);
        }
        rejected
    }

    async fn execute(&self, action: &Action) -> std::result::Result<serde_json::Value, ActionError> {
        let Some(handler) = self.handlers.get(action.action_type) else {
            return Err(ActionError::failed(
                GuardError::HandlerMissing(action.action_type.to_string()).to_string(),
            ));
        };

        debug!(
            "Executing action {} ({}), attempt {}",
            action.id, action.action_type, action.attempts
        );
        let started = Instant::now();
        match timeout(self.config.handler_timeout(), handler.execute(action)).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    // ==================== Queries ====================

    pub async fn queue_depths(&self) -> QueueDepths {
        self.state.lock().await.queues.depths()
    }

    /// Live actions (pending or executing), oldest first
    pub async fn pending_actions(&self) -> Vec<Action> {
        let state = self.state.lock().await;
        let mut actions: Vec<Action> = state.actions.values().cloned().collect();
        actions.sort_by_key(|a| a.sequence);
        actions
    }

    pub async fn action(&self, id: &Uuid) -> Option<Action> {
        self.state.lock().await.actions.get(id).cloned()
    }

    pub async fn action_history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.state.lock().await.history.recent(limit)
    }

    pub async fn history_entry(&self, id: &Uuid) -> Option<HistoryEntry> {
        self.state.lock().await.history.find(id).cloned()
    }

    pub async fn stats(&self) -> OrchestratorStats {
        let state = self.state.lock().await;
        OrchestratorStats {
            pending: state.pending_count(),
            depths: state.queues.depths(),
            ..state.stats.clone()
        }
    }
}
