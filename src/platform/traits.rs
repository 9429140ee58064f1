//! Core traits for the action orchestrator

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::types::{Action, ActionProposal, ActionType};
use crate::error::{ActionError, Result};

/// Executes the side effect of one action type.
///
/// Called by the orchestrator with a bounded timeout. A returned error is an
/// execution failure and may be retried depending on the action's priority.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Perform the side effect, returning a result document
    async fn execute(&self, action: &Action) -> std::result::Result<serde_json::Value, ActionError>;
}

/// Destination for action proposals produced by agents.
///
/// Agents never hold a reference to the orchestrator itself; they push
/// proposals through a sink which is drained on every tick.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn propose(&self, proposal: ActionProposal) -> Result<()>;

    /// Ask for every still-pending action of `action_type` to be rejected.
    /// Actions already executing are left alone.
    async fn withdraw(&self, action_type: ActionType, reason: &str) -> Result<()>;
}

/// Sink that keeps every proposal in memory. Used when an agent runs
/// detached from an orchestrator (simulation, tests).
#[derive(Debug, Default)]
pub struct RecordingSink {
    proposals: Mutex<Vec<ActionProposal>>,
    withdrawals: Mutex<Vec<(ActionType, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn proposals(&self) -> Vec<ActionProposal> {
        self.proposals.lock().await.clone()
    }

    pub async fn of_type(&self, action_type: ActionType) -> Vec<ActionProposal> {
        self.proposals
            .lock()
            .await
            .iter()
            .filter(|p| p.action_type == action_type)
            .cloned()
            .collect()
    }

    pub async fn take(&self) -> Vec<ActionProposal> {
        std::mem::take(&mut *self.proposals.lock().await)
    }

    pub async fn withdrawals(&self) -> Vec<(ActionType, String)> {
        self.withdrawals.lock().await.clone()
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn propose(&self, proposal: ActionProposal) -> Result<()> {
        self.proposals.lock().await.push(proposal);
        Ok(())
    }

    async fn withdraw(&self, action_type: ActionType, reason: &str) -> Result<()> {
        self.withdrawals
            .lock()
            .await
            .push((action_type, reason.to_string()));
        Ok(())
    }
}
