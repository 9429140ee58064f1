//! Action platform - conflict-aware execution of agent proposals
//!
//! Agents submit proposals; the orchestrator queues them by priority,
//! resolves conflicts, executes them through registered handlers and keeps
//! a bounded history of every terminal transition.

mod conflict;
pub mod handlers;
mod history;
mod orchestrator;
mod queue;
mod ticker;
pub mod traits;
pub mod types;

pub use conflict::{ConflictRule, ConflictRuleTable, ConflictTrigger, Resolution, ResolutionBasis};
pub use handlers::HandlerRegistry;
pub use history::{ActionHistory, HistoryEntry, HistoryOutcome};
pub use orchestrator::{ConflictOrchestrator, OrchestratorStats, TickSummary};
pub use queue::{ActionQueues, QueueDepths, QueueStats};
pub use ticker::{CycleReport, InboundMessage, OrchestratorHandle, Ticker};
pub use traits::{ActionHandler, ActionSink, RecordingSink};
pub use types::{
    Action, ActionPriority, ActionProposal, ActionStatus, ActionType, AgentId, OrchestratorEvent,
};
