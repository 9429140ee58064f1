//! Action handlers - the side effects behind each action type

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::traits::ActionHandler;
use super::types::{Action, ActionType};
use crate::agents::anomaly::AnomalyScorer;
use crate::agents::rebalancer::{MarketRebalancer, RebalancePlan};
use crate::error::ActionError;

fn payload_str<'a>(action: &'a Action, key: &str) -> Result<&'a str, ActionError> {
    action
        .payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ActionError::InvalidPayload(format!("missing string field '{}'", key)))
}

/// Handlers by action type
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard handlers wired to the watchdog and guardian
    pub fn defaults(scorer: Arc<AnomalyScorer>, rebalancer: Arc<MarketRebalancer>) -> Self {
        let alert: Arc<dyn ActionHandler> = Arc::new(AlertHandler {
            rebalancer: rebalancer.clone(),
        });
        let mut registry = Self::new();
        registry.register(
            ActionType::Freeze,
            Arc::new(FreezeHandler {
                rebalancer: rebalancer.clone(),
            }),
        );
        registry.register(ActionType::Rebalance, Arc::new(RebalanceHandler { rebalancer }));
        registry.register(ActionType::Alert, alert.clone());
        registry.register(ActionType::CriticalAlert, alert);
        registry.register(ActionType::Challenge, Arc::new(ChallengeHandler));
        registry.register(ActionType::ProfileAlert, Arc::new(ProfileAlertHandler { scorer }));
        registry
    }

    /// Replaces any handler already registered for the type
    pub fn register(&mut self, action_type: ActionType, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type, handler);
    }

    pub fn get(&self, action_type: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type).cloned()
    }

    pub fn missing(&self) -> Vec<ActionType> {
        ActionType::ALL
            .into_iter()
            .filter(|t| !self.handlers.contains_key(t))
            .collect()
    }
}

/// Freezing an actor halts automated rebalancing until an operator resumes it
pub struct FreezeHandler {
    rebalancer: Arc<MarketRebalancer>,
}

#[async_trait]
impl ActionHandler for FreezeHandler {
    async fn execute(&self, action: &Action) -> Result<Value, ActionError> {
        let actor_id = payload_str(action, "actor_id")?;
        warn!("Executing freeze for {}", actor_id);
        self.rebalancer
            .pause(&format!("actor {} frozen", actor_id))
            .await;
        Ok(json!({
            "frozen": true,
            "actor_id": actor_id,
            "timestamp": action.submitted_at,
        }))
    }
}

pub struct RebalanceHandler {
    rebalancer: Arc<MarketRebalancer>,
}

#[async_trait]
impl ActionHandler for RebalanceHandler {
    async fn execute(&self, action: &Action) -> Result<Value, ActionError> {
        let plan: RebalancePlan = serde_json::from_value(action.payload.clone())
            .map_err(|e| ActionError::InvalidPayload(e.to_string()))?;

        match self.rebalancer.execute_plan(&plan).await {
            Ok(Some(record)) => {
                info!(
                    "Rebalance {} applied: {}% -> {}% stablecoin",
                    plan.id, record.from.stablecoin_percent, record.to.stablecoin_percent
                );
                Ok(json!({ "rebalanced": true, "record": record }))
            }
            Ok(None) => Ok(json!({
                "rebalanced": false,
                "reason": "cooldown, pause or already at target",
            })),
            Err(e) => Err(ActionError::failed(e.to_string())),
        }
    }
}

/// Handles both alert and critical_alert; critical ones also pause rebalancing
pub struct AlertHandler {
    rebalancer: Arc<MarketRebalancer>,
}

#[async_trait]
impl ActionHandler for AlertHandler {
    async fn execute(&self, action: &Action) -> Result<Value, ActionError> {
        let alert_id = action.payload.get("alert_id").cloned().unwrap_or(Value::Null);
        let actor_id = action
            .payload
            .get("actor_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        if action.action_type == ActionType::CriticalAlert {
            error!("CRITICAL alert {} for {}", alert_id, actor_id);
            self.rebalancer
                .pause(&format!("critical alert for {}", actor_id))
                .await;
        } else {
            info!("Alert {} for {}", alert_id, actor_id);
        }

        Ok(json!({
            "alerted": true,
            "alert_id": alert_id,
            "critical": action.action_type == ActionType::CriticalAlert,
        }))
    }
}

/// Admin challenges are recorded by the watchdog; delivery is out of band
pub struct ChallengeHandler;

#[async_trait]
impl ActionHandler for ChallengeHandler {
    async fn execute(&self, action: &Action) -> Result<Value, ActionError> {
        let challenge_id = action
            .payload
            .get("challenge_id")
            .cloned()
            .ok_or_else(|| ActionError::InvalidPayload("missing 'challenge_id'".into()))?;
        info!("Challenge {} issued", challenge_id);
        Ok(json!({ "challenged": true, "challenge_id": challenge_id }))
    }
}

/// Puts the flagged user under closer watchdog scrutiny
pub struct ProfileAlertHandler {
    scorer: Arc<AnomalyScorer>,
}

#[async_trait]
impl ActionHandler for ProfileAlertHandler {
    async fn execute(&self, action: &Action) -> Result<Value, ActionError> {
        let user_id = payload_str(action, "user_id")?;
        let newly_watched = self.scorer.watch(user_id).await;
        Ok(json!({
            "processed": true,
            "alert_id": action.payload.get("alert_id").cloned().unwrap_or(Value::Null),
            "watched": newly_watched,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::config::{GuardianConfig, WatchdogConfig};
    use crate::platform::traits::RecordingSink;
    use crate::platform::types::{ActionPriority, AgentId};
    use chrono::Utc;

    fn registry() -> (HandlerRegistry, Arc<AnomalyScorer>, Arc<MarketRebalancer>) {
        let sink = Arc::new(RecordingSink::new());
        let scorer = Arc::new(AnomalyScorer::new(
            WatchdogConfig::default(),
            sink.clone(),
            system_clock(),
        ));
        let rebalancer =
            Arc::new(MarketRebalancer::new(GuardianConfig::default(), sink, system_clock()).unwrap());
        (
            HandlerRegistry::defaults(scorer.clone(), rebalancer.clone()),
            scorer,
            rebalancer,
        )
    }

    fn action(t: ActionType, payload: Value) -> Action {
        Action::admit(1, AgentId::Watchdog, t, ActionPriority::Critical, payload, Utc::now())
    }

    #[test]
    fn defaults_cover_every_action_type() {
        let (registry, _, _) = registry();
        assert!(registry.missing().is_empty());
        assert!(HandlerRegistry::new().get(ActionType::Freeze).is_none());
    }

    #[tokio::test]
    async fn freeze_pauses_rebalancing() {
        let (registry, _, rebalancer) = registry();
        let handler = registry.get(ActionType::Freeze).unwrap();
        let result = handler
            .execute(&action(ActionType::Freeze, json!({ "actor_id": "0xabc" })))
            .await
            .unwrap();
        assert_eq!(result["frozen"], true);
        assert!(rebalancer.is_paused().await);
    }

    #[tokio::test]
    async fn freeze_without_actor_is_invalid() {
        let (registry, _, _) = registry();
        let err = registry
            .get(ActionType::Freeze)
            .unwrap()
            .execute(&action(ActionType::Freeze, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn plain_alert_does_not_pause() {
        let (registry, _, rebalancer) = registry();
        let handler = registry.get(ActionType::Alert).unwrap();
        handler
            .execute(&action(ActionType::Alert, json!({ "alert_id": "a1", "actor_id": "x" })))
            .await
            .unwrap();
        assert!(!rebalancer.is_paused().await);

        handler
            .execute(&action(ActionType::CriticalAlert, json!({ "alert_id": "a2" })))
            .await
            .unwrap();
        assert!(rebalancer.is_paused().await);
    }

    #[tokio::test]
    async fn rebalance_rejects_garbage_payload() {
        let (registry, _, _) = registry();
        let err = registry
            .get(ActionType::Rebalance)
            .unwrap()
            .execute(&action(ActionType::Rebalance, json!({ "target": "lots" })))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn profile_alert_watches_user() {
        let (registry, scorer, _) = registry();
        let result = registry
            .get(ActionType::ProfileAlert)
            .unwrap()
            .execute(&action(ActionType::ProfileAlert, json!({ "user_id": "u1" })))
            .await
            .unwrap();
        assert_eq!(result["processed"], true);
        assert!(scorer.behavior_profile("u1").unwrap().watched);
    }
}
