//! TreasuryEngine - wires the three agents to the orchestrator
//!
//! Every component is constructed once here and handed its collaborators
//! explicitly. Agents only see an [`OrchestratorHandle`]; handlers only see
//! the agents they act on.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::agents::anomaly::{AlertSeverity, AnomalyScorer, BehaviorProfile, WatchdogStats};
use crate::agents::profiler::{ProfilerStats, RiskProfile, RiskProfiler};
use crate::agents::rebalancer::{GuardianStats, MarketRebalancer, TreasuryAllocation};
use crate::clock::{system_clock, SharedClock};
use crate::config::AppConfig;
use crate::error::{GuardError, Result};
use crate::platform::{
    Action, ActionSink, ConflictOrchestrator, CycleReport, HandlerRegistry, HistoryEntry,
    OrchestratorEvent, OrchestratorHandle, OrchestratorStats, QueueDepths, Ticker,
};

/// Point-in-time view of every component
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub orchestrator: OrchestratorStats,
    pub watchdog: WatchdogStats,
    pub guardian: GuardianStats,
    pub profiler: ProfilerStats,
    pub allocation: TreasuryAllocation,
}

pub struct TreasuryEngine {
    config: AppConfig,
    scorer: Arc<AnomalyScorer>,
    rebalancer: Arc<MarketRebalancer>,
    profiler: Arc<RiskProfiler>,
    orchestrator: Arc<ConflictOrchestrator>,
    handle: OrchestratorHandle,
    /// Taken by `run`; `tick` drives it manually otherwise
    ticker: Mutex<Option<Ticker>>,
}

impl TreasuryEngine {
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: AppConfig, clock: SharedClock) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| GuardError::Validation(errors.join("; ")))?;

        let (handle, inbound) = OrchestratorHandle::channel(config.orchestrator.inbound_capacity);
        let sink: Arc<dyn ActionSink> = Arc::new(handle.clone());

        let scorer = Arc::new(AnomalyScorer::new(
            config.watchdog.clone(),
            sink.clone(),
            clock.clone(),
        ));
        let rebalancer = Arc::new(MarketRebalancer::new(
            config.guardian.clone(),
            sink.clone(),
            clock.clone(),
        )?);
        let profiler = Arc::new(RiskProfiler::new(config.profiler.clone(), sink, clock.clone()));

        let handlers = HandlerRegistry::defaults(scorer.clone(), rebalancer.clone());
        let orchestrator = Arc::new(ConflictOrchestrator::new(
            config.orchestrator.clone(),
            handlers,
            clock,
        )?);
        let ticker = Ticker::new(orchestrator.clone(), inbound);

        info!("Treasury engine assembled");
        Ok(Self {
            config,
            scorer,
            rebalancer,
            profiler,
            orchestrator,
            handle,
            ticker: Mutex::new(Some(ticker)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scorer(&self) -> &Arc<AnomalyScorer> {
        &self.scorer
    }

    pub fn rebalancer(&self) -> &Arc<MarketRebalancer> {
        &self.rebalancer
    }

    pub fn profiler(&self) -> &Arc<RiskProfiler> {
        &self.profiler
    }

    pub fn orchestrator(&self) -> &Arc<ConflictOrchestrator> {
        &self.orchestrator
    }

    /// Sink for external proposers (e.g. a transport layer)
    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.orchestrator.subscribe()
    }

    /// One manual cycle. Fails once `run` owns the ticker.
    pub async fn tick(&self) -> Result<CycleReport> {
        let mut guard = self.ticker.lock().await;
        let ticker = guard
            .as_mut()
            .ok_or_else(|| GuardError::Internal("ticker is owned by the run loop".into()))?;
        Ok(ticker.run_once().await)
    }

    /// Run the ticker loop until `shutdown` flips to true
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let ticker = self
            .ticker
            .lock()
            .await
            .take()
            .ok_or_else(|| GuardError::Internal("engine is already running".into()))?;
        ticker.run(shutdown).await;
        Ok(())
    }

    // ==================== Operator ====================

    /// Unfreeze an actor. Rebalancing resumes once no actor is frozen and no
    /// critical alert is active.
    pub async fn unfreeze_actor(&self, actor_id: &str) -> bool {
        let unfrozen = self.scorer.unfreeze(actor_id).await;
        if unfrozen {
            self.resume_if_clear().await;
        }
        unfrozen
    }

    /// Dismiss a watchdog alert, resuming rebalancing under the same rule as
    /// [`TreasuryEngine::unfreeze_actor`]
    pub async fn dismiss_alert(&self, alert_id: Uuid) -> bool {
        let dismissed = self.scorer.dismiss_alert(alert_id).await;
        if dismissed {
            self.resume_if_clear().await;
        }
        dismissed
    }

    /// Lift a pause regardless of outstanding freezes or alerts
    pub async fn resume_rebalancing(&self) {
        self.rebalancer.resume().await;
    }

    async fn resume_if_clear(&self) {
        let frozen = self.scorer.stats().await.frozen_accounts;
        let critical = self
            .scorer
            .active_alerts()
            .await
            .iter()
            .filter(|a| a.severity == AlertSeverity::Critical)
            .count();
        if frozen == 0 && critical == 0 {
            self.rebalancer.resume().await;
        } else {
            info!(
                frozen,
                critical, "Rebalancing stays paused while freezes or critical alerts remain"
            );
        }
    }

    // ==================== Queries ====================

    pub async fn queue_depths(&self) -> QueueDepths {
        self.orchestrator.queue_depths().await
    }

    pub async fn pending_actions(&self) -> Vec<Action> {
        self.orchestrator.pending_actions().await
    }

    pub async fn action_history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.orchestrator.action_history(limit).await
    }

    pub async fn history_entry(&self, action_id: &Uuid) -> Option<HistoryEntry> {
        self.orchestrator.history_entry(action_id).await
    }

    pub async fn current_allocation(&self) -> TreasuryAllocation {
        self.rebalancer.current_allocation().await
    }

    pub fn user_profile(&self, user_id: &str) -> Option<RiskProfile> {
        self.profiler.user_profile(user_id)
    }

    pub fn behavior_profile(&self, actor_id: &str) -> Option<BehaviorProfile> {
        self.scorer.behavior_profile(actor_id)
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            orchestrator: self.orchestrator.stats().await,
            watchdog: self.scorer.stats().await,
            guardian: self.rebalancer.stats().await,
            profiler: self.profiler.stats().await,
            allocation: self.rebalancer.current_allocation().await,
        }
    }
}
