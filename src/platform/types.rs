//! Core types for the action orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::GuardError;

/// Policy agent that proposes actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    /// Behavioral anomaly detector
    Watchdog,
    /// Market-driven rebalancer
    Guardian,
    /// Per-user risk profiler
    Profiler,
}

impl AgentId {
    pub const ALL: [AgentId; 3] = [AgentId::Watchdog, AgentId::Guardian, AgentId::Profiler];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Watchdog => "watchdog",
            AgentId::Guardian => "guardian",
            AgentId::Profiler => "profiler",
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentId {
    type Err = GuardError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "watchdog" => Ok(AgentId::Watchdog),
            "guardian" => Ok(AgentId::Guardian),
            "profiler" => Ok(AgentId::Profiler),
            other => Err(GuardError::Validation(format!(
                "unknown source agent '{}'; expected watchdog|guardian|profiler",
                other
            ))),
        }
    }
}

/// Kind of side effect an action performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Freeze,
    Rebalance,
    Alert,
    CriticalAlert,
    Challenge,
    ProfileAlert,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        ActionType::Freeze,
        ActionType::Rebalance,
        ActionType::Alert,
        ActionType::CriticalAlert,
        ActionType::Challenge,
        ActionType::ProfileAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Freeze => "freeze",
            ActionType::Rebalance => "rebalance",
            ActionType::Alert => "alert",
            ActionType::CriticalAlert => "critical_alert",
            ActionType::Challenge => "challenge",
            ActionType::ProfileAlert => "profile_alert",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = GuardError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        ActionType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| GuardError::Validation(format!("unknown action type '{}'", raw)))
    }
}

/// Action priority. Lower numeric value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ActionPriority {
    /// Freezes and critical alerts
    Critical = 1,
    /// Alerts and admin challenges
    High = 2,
    /// Rebalances
    Medium = 3,
    /// Profile alerts
    Low = 4,
}

impl ActionPriority {
    /// Drain order of the priority queues
    pub const ALL: [ActionPriority; 4] = [
        ActionPriority::Critical,
        ActionPriority::High,
        ActionPriority::Medium,
        ActionPriority::Low,
    ];

    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn index(&self) -> usize {
        (*self as usize) - 1
    }
}

impl TryFrom<u8> for ActionPriority {
    type Error = GuardError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(ActionPriority::Critical),
            2 => Ok(ActionPriority::High),
            3 => Ok(ActionPriority::Medium),
            4 => Ok(ActionPriority::Low),
            other => Err(GuardError::Validation(format!(
                "priority {} out of range 1..=4",
                other
            ))),
        }
    }
}

impl From<ActionPriority> for u8 {
    fn from(priority: ActionPriority) -> Self {
        priority.value()
    }
}

impl std::fmt::Display for ActionPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionPriority::Critical => write!(f, "critical"),
            ActionPriority::High => write!(f, "high"),
            ActionPriority::Medium => write!(f, "medium"),
            ActionPriority::Low => write!(f, "low"),
        }
    }
}

/// Lifecycle state of an action
///
/// `Pending -> Executing -> {Completed | Failed}`, `Failed -> Pending` on retry,
/// `Pending -> Rejected` on conflict loss or eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executing,
    Completed,
    Rejected,
    Failed,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::Executing => write!(f, "executing"),
            ActionStatus::Completed => write!(f, "completed"),
            ActionStatus::Rejected => write!(f, "rejected"),
            ActionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Proposal submitted by an agent. Validated before it becomes an [`Action`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionProposal {
    pub source: AgentId,
    pub action_type: ActionType,
    /// Raw numeric priority, 1 (critical) to 4 (low)
    pub priority: u8,
    pub payload: serde_json::Value,
}

impl ActionProposal {
    pub fn new(
        source: AgentId,
        action_type: ActionType,
        priority: u8,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            source,
            action_type,
            priority,
            payload,
        }
    }

    /// Build a proposal from untyped input, e.g. a request decoded by a transport layer
    pub fn parse(
        source: &str,
        action_type: &str,
        priority: u8,
        payload: serde_json::Value,
    ) -> crate::error::Result<Self> {
        Ok(Self::new(
            source.parse()?,
            action_type.parse()?,
            priority,
            payload,
        ))
    }
}

/// Action owned by the orchestrator from submission to a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    /// Monotonic admission order, used for "oldest" and "newer" decisions
    pub sequence: u64,
    pub source: AgentId,
    pub action_type: ActionType,
    pub priority: ActionPriority,
    pub payload: serde_json::Value,
    pub submitted_at: DateTime<Utc>,
    pub status: ActionStatus,
    pub attempts: u32,
    pub rejection_reason: Option<String>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Action {
    pub(crate) fn admit(
        sequence: u64,
        source: AgentId,
        action_type: ActionType,
        priority: ActionPriority,
        payload: serde_json::Value,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            source,
            action_type,
            priority,
            payload,
            submitted_at,
            status: ActionStatus::Pending,
            attempts: 0,
            rejection_reason: None,
            last_error: None,
            result: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ActionStatus::Pending
    }

    pub fn is_executing(&self) -> bool {
        self.status == ActionStatus::Executing
    }
}

/// Notifications published by the orchestrator for transport layers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    ActionSubmitted { action: Action },
    ActionRejected { action: Action, reason: String },
    ActionCompleted { action: Action, result: serde_json::Value },
    ActionFailed { action: Action, error: String },
    ActionRetrying { action: Action, attempt: u32, error: String },
}

impl OrchestratorEvent {
    pub fn action(&self) -> &Action {
        match self {
            OrchestratorEvent::ActionSubmitted { action }
            | OrchestratorEvent::ActionRejected { action, .. }
            | OrchestratorEvent::ActionCompleted { action, .. }
            | OrchestratorEvent::ActionFailed { action, .. }
            | OrchestratorEvent::ActionRetrying { action, .. } => action,
        }
    }
}
