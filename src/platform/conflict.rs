//! Conflict Rules - mutual exclusion between live actions
//!
//! The rule table is built once at startup and never mutated. A table that
//! does not rank every agent exactly once is rejected, which keeps the
//! orchestrator from starting.

use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

use super::types::{Action, ActionType, AgentId};
use crate::error::{GuardError, Result};

/// Condition under which two actions are mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictTrigger {
    /// Actions of these two types conflict (order-insensitive)
    TypePair(ActionType, ActionType),
    /// An action of this type conflicts with any action currently executing
    AgainstExecuting(ActionType),
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictRule {
    pub id: u32,
    pub name: &'static str,
    pub trigger: ConflictTrigger,
}

impl ConflictRule {
    fn matches(&self, a: &Action, b: &Action) -> bool {
        match self.trigger {
            ConflictTrigger::TypePair(x, y) => {
                (a.action_type == x && b.action_type == y)
                    || (a.action_type == y && b.action_type == x)
            }
            ConflictTrigger::AgainstExecuting(t) => {
                (a.action_type == t && b.is_executing()) || (b.action_type == t && a.is_executing())
            }
        }
    }
}

/// What decided a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionBasis {
    /// Lower numeric priority won outright
    Priority,
    /// Equal priority, decided by the source hierarchy
    SourceHierarchy,
    /// Equal priority and source, the newer action loses
    Recency,
}

/// Outcome of resolving a conflict between two actions
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub rule: &'static str,
    pub winner: Uuid,
    pub loser: Uuid,
    pub basis: ResolutionBasis,
    pub reason: String,
}

/// Static conflict rules plus the source hierarchy used for tie-breaks
#[derive(Debug, Clone)]
pub struct ConflictRuleTable {
    rules: Vec<ConflictRule>,
    /// Index 0 has the highest authority
    hierarchy: Vec<AgentId>,
}

impl ConflictRuleTable {
    /// Standard rules: freeze vs rebalance, rebalance vs rebalance, critical alert vs execution
    pub fn standard_rules() -> Vec<ConflictRule> {
        vec![
            ConflictRule {
                id: 1,
                name: "freeze_vs_rebalance",
                trigger: ConflictTrigger::TypePair(ActionType::Freeze, ActionType::Rebalance),
            },
            ConflictRule {
                id: 2,
                name: "rebalance_vs_rebalance",
                trigger: ConflictTrigger::TypePair(ActionType::Rebalance, ActionType::Rebalance),
            },
            ConflictRule {
                id: 3,
                name: "critical_alert_vs_execution",
                trigger: ConflictTrigger::AgainstExecuting(ActionType::CriticalAlert),
            },
        ]
    }

    pub fn standard() -> Result<Self> {
        Self::new(Self::standard_rules(), AgentId::ALL.to_vec())
    }

    pub fn with_hierarchy(hierarchy: Vec<AgentId>) -> Result<Self> {
        Self::new(Self::standard_rules(), hierarchy)
    }

    pub fn new(rules: Vec<ConflictRule>, hierarchy: Vec<AgentId>) -> Result<Self> {
        if rules.is_empty() {
            return Err(GuardError::RuleTable("no conflict rules defined".into()));
        }

        let mut ids = HashSet::new();
        for rule in &rules {
            if !ids.insert(rule.id) {
                return Err(GuardError::RuleTable(format!(
                    "duplicate rule id {}",
                    rule.id
                )));
            }
        }

        let mut seen = HashSet::new();
        for agent in &hierarchy {
            if !seen.insert(*agent) {
                return Err(GuardError::RuleTable(format!(
                    "agent {} ranked more than once",
                    agent
                )));
            }
        }
        if let Some(missing) = AgentId::ALL.iter().find(|a| !seen.contains(a)) {
            return Err(GuardError::RuleTable(format!(
                "agent {} missing from source hierarchy",
                missing
            )));
        }

        Ok(Self { rules, hierarchy })
    }

    pub fn rules(&self) -> &[ConflictRule] {
        &self.rules
    }

    pub fn hierarchy(&self) -> &[AgentId] {
        &self.hierarchy
    }

    /// Hierarchy rank, lower wins
    pub fn rank(&self, agent: AgentId) -> usize {
        self.hierarchy
            .iter()
            .position(|a| *a == agent)
            .unwrap_or(usize::MAX)
    }

    /// First rule under which `a` and `b` conflict
    pub fn detect(&self, a: &Action, b: &Action) -> Option<&ConflictRule> {
        if a.id == b.id {
            return None;
        }
        self.rules.iter().find(|rule| rule.matches(a, b))
    }

    /// Decide which of two conflicting actions survives
    pub fn resolve(&self, rule: &ConflictRule, incoming: &Action, existing: &Action) -> Resolution {
        let (winner, loser, basis) = if incoming.priority != existing.priority {
            if incoming.priority < existing.priority {
                (incoming, existing, ResolutionBasis::Priority)
            } else {
                (existing, incoming, ResolutionBasis::Priority)
            }
        } else {
            let incoming_rank = self.rank(incoming.source);
            let existing_rank = self.rank(existing.source);
            if incoming_rank < existing_rank {
                (incoming, existing, ResolutionBasis::SourceHierarchy)
            } else if existing_rank < incoming_rank {
                (existing, incoming, ResolutionBasis::SourceHierarchy)
            } else if incoming.sequence > existing.sequence {
                (existing, incoming, ResolutionBasis::Recency)
            } else {
                (incoming, existing, ResolutionBasis::Recency)
            }
        };

        let reason = match basis {
            ResolutionBasis::Priority => format!(
                "Overridden by higher priority action {} ({} {})",
                winner.id, winner.priority, winner.action_type
            ),
            ResolutionBasis::SourceHierarchy => format!(
                "Overridden by {} under source hierarchy ({})",
                winner.source, rule.name
            ),
            ResolutionBasis::Recency => {
                format!("Superseded by existing action {} ({})", winner.id, rule.name)
            }
        };

        Resolution {
            rule: rule.name,
            winner: winner.id,
            loser: loser.id,
            basis,
            reason,
        }
    }
}
