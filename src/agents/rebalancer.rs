//! MarketRebalancer - market-driven treasury allocation (guardian)
//!
//! Tracks a weighted set of assets, folds their trend directions into a
//! single market score and moves the stablecoin share of the treasury toward
//! a tier target in volatility-sized steps.
//!
//! The rebalancer never moves the allocation on its own: when a tier is
//! crossed it proposes a rebalance action carrying a [`RebalancePlan`], and
//! the allocation changes only when the orchestrator executes that plan.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::{AssetWeight, GuardianConfig, RebalanceTier, RiskAppetite};
use crate::error::{GuardError, Result};
use crate::platform::traits::ActionSink;
use crate::platform::types::{ActionPriority, ActionProposal, ActionType, AgentId};

/// Latest market reading for one tracked asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub asset: String,
    pub price_usd: Decimal,
    pub volume_24h: Decimal,
    /// 0-100
    pub volatility_index: f64,
    /// -100 (strong down) to 100 (strong up)
    pub trend_direction: i32,
    /// 0-100, derived from volume and volatility
    pub confidence: u32,
    pub last_update: DateTime<Utc>,
}

/// Confidence in a reading: base 50, raised by deep volume and calm markets
pub fn market_confidence(volume_24h: Decimal, volatility: f64) -> u32 {
    let mut confidence = 50;

    if volume_24h > dec!(1_000_000_000) {
        confidence += 25;
    } else if volume_24h > dec!(100_000_000) {
        confidence += 15;
    }

    if volatility < 30.0 {
        confidence += 25;
    } else if volatility < 50.0 {
        confidence += 10;
    }

    confidence.min(100)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryAllocation {
    pub stablecoin_percent: u32,
    pub risk_asset_percent: u32,
    pub last_rebalance: Option<DateTime<Utc>>,
    pub rebalance_count: u64,
}

impl TreasuryAllocation {
    fn new(stablecoin_percent: u32) -> Self {
        Self {
            stablecoin_percent,
            risk_asset_percent: 100 - stablecoin_percent,
            last_rebalance: None,
            rebalance_count: 0,
        }
    }

    fn set_stablecoin(&mut self, percent: u32) {
        self.stablecoin_percent = percent;
        self.risk_asset_percent = 100 - percent;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskSettings {
    pub risk_appetite: RiskAppetite,
    pub min_stablecoin: u32,
    pub max_stablecoin: u32,
    pub rebalance_cooldown_secs: i64,
    pub circuit_breaker_enabled: bool,
}

impl RiskSettings {
    pub fn clamp(&self, stablecoin: u32) -> u32 {
        stablecoin.clamp(self.min_stablecoin, self.max_stablecoin)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.rebalance_cooldown_secs)
    }
}

/// Rebalance proposed to the orchestrator, carried as the action payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub id: Uuid,
    /// Already clamped to the risk bounds at planning time
    pub target_stablecoin: u32,
    pub speed: u32,
    pub volatility: f64,
    pub market_score: i32,
    pub tier_threshold: i32,
    pub planned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceRecord {
    pub id: Uuid,
    pub plan_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub from: TreasuryAllocation,
    pub to: TreasuryAllocation,
    pub market_score: i32,
    pub volatility: f64,
    pub reason: String,
}

/// Outcome of evaluating whether a rebalance is due
#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceCheck {
    Ready(RebalancePlan),
    CoolingDown { remaining_secs: i64 },
    Paused { reason: String },
    CircuitBreaker { volatility: f64, confidence: f64 },
    NoTier { market_score: i32 },
    /// A tier matched but the allocation already sits at its clamped target
    AtTarget { market_score: i32, target: u32 },
}

impl RebalanceCheck {
    pub fn is_ready(&self) -> bool {
        matches!(self, RebalanceCheck::Ready(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RebalanceSimulation {
    pub current_allocation: u32,
    pub recommended_allocation: u32,
    pub change: i32,
    /// Allocation after one step at the given volatility
    pub projected_allocation: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardianStats {
    pub allocation: TreasuryAllocation,
    pub market_score: i32,
    pub volatility: f64,
    pub confidence: f64,
    pub rebalance_count: u64,
    pub last_rebalance: Option<DateTime<Utc>>,
    pub paused: bool,
    pub circuit_breaker_trips: u64,
}

/// Reason text for a shift from `current` toward `target`
pub fn rebalance_reason(current: u32, target: u32) -> &'static str {
    let delta = target as i64 - current as i64;
    if delta > 20 {
        "Severe market downturn detected"
    } else if delta > 10 {
        "Market weakness detected"
    } else if delta < -20 {
        "Strong bull market detected"
    } else if delta < -10 {
        "Market strength detected"
    } else {
        "Minor market adjustment"
    }
}

/// Step size in percentage points: smaller in turbulent markets, scaled by tier speed
pub fn step_size(volatility: f64, speed: u32) -> u32 {
    let base: u32 = if volatility > 70.0 {
        5
    } else if volatility < 30.0 {
        15
    } else {
        10
    };
    // round(base * speed / 2)
    (base * speed + 1) / 2
}

/// Next stablecoin share when stepping from `current` toward `target`
pub fn step_toward(current: u32, target: u32, step: u32) -> u32 {
    if target > current {
        (current + step).min(target)
    } else {
        current.saturating_sub(step).max(target)
    }
}

struct Pause {
    reason: String,
    /// `None` holds until `resume`
    until: Option<DateTime<Utc>>,
}

struct GuardianState {
    market: HashMap<String, MarketSnapshot>,
    allocation: TreasuryAllocation,
    settings: RiskSettings,
    history: VecDeque<RebalanceRecord>,
    paused: Option<Pause>,
}

impl GuardianState {
    /// Reason of the pause in force at `now`, if any
    fn pause_reason(&self, now: DateTime<Utc>) -> Option<&str> {
        self.paused
            .as_ref()
            .filter(|p| p.until.map_or(true, |until| now < until))
            .map(|p| p.reason.as_str())
    }
}

/// Market-driven rebalancer
pub struct MarketRebalancer {
    assets: Vec<AssetWeight>,
    tiers: Vec<RebalanceTier>,
    breaker_volatility: f64,
    breaker_confidence: f64,
    pause_for: Option<Duration>,
    history_limit: usize,
    state: RwLock<GuardianState>,
    sink: Arc<dyn ActionSink>,
    clock: SharedClock,
    circuit_breaker_trips: AtomicU64,
}

impl MarketRebalancer {
    pub fn new(config: GuardianConfig, sink: Arc<dyn ActionSink>, clock: SharedClock) -> Result<Self> {
        if config.assets.is_empty() || config.assets.iter().any(|a| a.weight == 0) {
            return Err(GuardError::Validation(
                "guardian needs at least one asset with a positive weight".into(),
            ));
        }
        if config.min_stablecoin > config.max_stablecoin || config.max_stablecoin > 100 {
            return Err(GuardError::Validation(format!(
                "invalid stablecoin bounds {}..={}",
                config.min_stablecoin, config.max_stablecoin
            )));
        }

        let settings = RiskSettings {
            risk_appetite: config.risk_appetite,
            min_stablecoin: config.min_stablecoin,
            max_stablecoin: config.max_stablecoin,
            rebalance_cooldown_secs: config.rebalance_cooldown_secs,
            circuit_breaker_enabled: config.circuit_breaker_enabled,
        };
        let allocation = TreasuryAllocation::new(settings.clamp(config.initial_stablecoin_percent));

        Ok(Self {
            assets: config.assets,
            tiers: config.tiers,
            breaker_volatility: config.circuit_breaker_volatility,
            breaker_confidence: config.circuit_breaker_confidence,
            pause_for: (config.pause_secs > 0).then(|| Duration::seconds(config.pause_secs)),
            history_limit: config.history_limit.max(1),
            state: RwLock::new(GuardianState {
                market: HashMap::new(),
                allocation,
                settings,
                history: VecDeque::new(),
                paused: None,
            }),
            sink,
            clock,
            circuit_breaker_trips: AtomicU64::new(0),
        })
    }

    pub fn is_tracked(&self, asset: &str) -> bool {
        self.assets.iter().any(|a| a.symbol == asset)
    }

    pub fn tiers(&self) -> &[RebalanceTier] {
        &self.tiers
    }

    /// First tier matching the score, in configured order
    pub fn select_tier(&self, market_score: i32) -> Option<&RebalanceTier> {
        self.tiers.iter().find(|tier| tier.matches(market_score))
    }

    fn market_score_of(&self, market: &HashMap<String, MarketSnapshot>) -> i32 {
        let mut total = 0.0;
        let mut total_weight = 0.0;
        for asset in &self.assets {
            if let Some(data) = market.get(&asset.symbol) {
                let w = f64::from(asset.weight);
                total += f64::from(data.trend_direction) * w;
                total_weight += w;
            }
        }
        if total_weight > 0.0 {
            (total / total_weight).round() as i32
        } else {
            0
        }
    }

    fn mean_of(market: &HashMap<String, MarketSnapshot>, f: impl Fn(&MarketSnapshot) -> f64) -> f64 {
        if market.is_empty() {
            return 50.0;
        }
        market.values().map(f).sum::<f64>() / market.len() as f64
    }

    /// Weight-normalized trend of the tracked assets
    pub async fn compute_market_score(&self) -> i32 {
        self.market_score_of(&self.state.read().await.market)
    }

    pub async fn average_volatility(&self) -> f64 {
        Self::mean_of(&self.state.read().await.market, |m| m.volatility_index)
    }

    pub async fn average_confidence(&self) -> f64 {
        Self::mean_of(&self.state.read().await.market, |m| f64::from(m.confidence))
    }

    fn evaluate_locked(&self, state: &GuardianState, now: DateTime<Utc>) -> RebalanceCheck {
        if let Some(last) = state.allocation.last_rebalance {
            let elapsed = now - last;
            if elapsed < state.settings.cooldown() {
                return RebalanceCheck::CoolingDown {
                    remaining_secs: (state.settings.cooldown() - elapsed).num_seconds(),
                };
            }
        }

        if let Some(reason) = state.pause_reason(now) {
            return RebalanceCheck::Paused {
                reason: reason.to_string(),
            };
        }

        let volatility = Self::mean_of(&state.market, |m| m.volatility_index);
        if state.settings.circuit_breaker_enabled {
            let confidence = Self::mean_of(&state.market, |m| f64::from(m.confidence));
            if volatility > self.breaker_volatility && confidence < self.breaker_confidence {
                self.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
                return RebalanceCheck::CircuitBreaker {
                    volatility,
                    confidence,
                };
            }
        }

        let market_score = self.market_score_of(&state.market);
        let Some(tier) = self.select_tier(market_score) else {
            return RebalanceCheck::NoTier { market_score };
        };

        let target = state.settings.clamp(tier.stablecoin_target);
        if target == state.allocation.stablecoin_percent {
            return RebalanceCheck::AtTarget {
                market_score,
                target,
            };
        }

        RebalanceCheck::Ready(RebalancePlan {
            id: Uuid::new_v4(),
            target_stablecoin: target,
            speed: tier.speed,
            volatility,
            market_score,
            tier_threshold: tier.threshold,
            planned_at: now,
        })
    }

    pub async fn evaluate(&self) -> RebalanceCheck {
        let state = self.state.read().await;
        self.evaluate_locked(&state, self.clock.now())
    }

    /// False inside the cooldown, while paused, when the circuit breaker trips,
    /// when no tier matches, or when the allocation already sits at the target
    pub async fn should_rebalance(&self) -> bool {
        self.evaluate().await.is_ready()
    }

    /// Replace an asset's snapshot and propose a rebalance if one is due
    pub async fn update_market_data(
        &self,
        asset: &str,
        price_usd: Decimal,
        volume_24h: Decimal,
        volatility: f64,
        trend: i32,
    ) -> Result<MarketSnapshot> {
        if !self.is_tracked(asset) {
            return Err(GuardError::Validation(format!("asset {} is not tracked", asset)));
        }
        if price_usd < Decimal::ZERO || volume_24h < Decimal::ZERO {
            return Err(GuardError::Validation(
                "price and volume must not be negative".into(),
            ));
        }
        if !(0.0..=100.0).contains(&volatility) {
            return Err(GuardError::Validation(format!(
                "volatility {} out of range 0..=100",
                volatility
            )));
        }
        if !(-100..=100).contains(&trend) {
            return Err(GuardError::Validation(format!(
                "trend {} out of range -100..=100",
                trend
            )));
        }

        let now = self.clock.now();
        let snapshot = MarketSnapshot {
            asset: asset.to_string(),
            price_usd,
            volume_24h,
            volatility_index: volatility,
            trend_direction: trend,
            confidence: market_confidence(volume_24h, volatility),
            last_update: now,
        };

        let spike = volatility > self.breaker_volatility;
        let check = {
            let mut state = self.state.write().await;
            state.market.insert(asset.to_string(), snapshot.clone());
            if spike && state.settings.circuit_breaker_enabled {
                None
            } else {
                Some(self.evaluate_locked(&state, now))
            }
        };
        debug!(asset, trend, volatility, "Market data updated: {:?}", check);

        let Some(check) = check else {
            warn!(asset, volatility, "Market too volatile, withdrawing queued rebalances");
            if let Err(e) = self
                .sink
                .withdraw(ActionType::Rebalance, "Market too volatile")
                .await
            {
                error!("Failed to withdraw pending rebalances: {}", e);
            }
            return Ok(snapshot);
        };

        match check {
            RebalanceCheck::Ready(plan) => {
                info!(
                    market_score = plan.market_score,
                    target = plan.target_stablecoin,
                    speed = plan.speed,
                    "Tier {} crossed, proposing rebalance",
                    plan.tier_threshold
                );
                let proposal = ActionProposal::new(
                    AgentId::Guardian,
                    ActionType::Rebalance,
                    ActionPriority::Medium.value(),
                    serde_json::to_value(&plan)?,
                );
                if let Err(e) = self.sink.propose(proposal).await {
                    error!("Failed to propose rebalance: {}", e);
                }
            }
            RebalanceCheck::CircuitBreaker {
                volatility,
                confidence,
            } => {
                warn!(
                    volatility,
                    confidence, "Circuit breaker active - market too unstable to rebalance"
                );
            }
            _ => {}
        }

        Ok(snapshot)
    }

    /// Move the allocation one step toward `target_stablecoin`.
    ///
    /// Returns `None` without touching the allocation inside the cooldown
    /// window or while rebalancing is paused.
    pub async fn execute_rebalance(
        &self,
        target_stablecoin: u32,
        volatility: f64,
        speed: u32,
    ) -> Result<Option<RebalanceRecord>> {
        self.execute(None, target_stablecoin, volatility, speed).await
    }

    /// Execute a plan produced by [`MarketRebalancer::update_market_data`]
    pub async fn execute_plan(&self, plan: &RebalancePlan) -> Result<Option<RebalanceRecord>> {
        self.execute(Some(plan.id), plan.target_stablecoin, plan.volatility, plan.speed)
            .await
    }

    async fn execute(
        &self,
        plan_id: Option<Uuid>,
        target_stablecoin: u32,
        volatility: f64,
        speed: u32,
    ) -> Result<Option<RebalanceRecord>> {
        if speed == 0 {
            return Err(GuardError::Validation("rebalance speed must be positive".into()));
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;

        if let Some(last) = state.allocation.last_rebalance {
            if now - last < state.settings.cooldown() {
                info!("Rebalance skipped: inside cooldown window");
                return Ok(None);
            }
        }
        if let Some(reason) = state.pause_reason(now) {
            info!("Rebalance skipped: paused ({})", reason);
            return Ok(None);
        }

        // bounds may have changed since the plan was made
        let target = state.settings.clamp(target_stablecoin);
        let current = state.allocation.stablecoin_percent;
        let next = step_toward(current, target, step_size(volatility, speed));

        let from = state.allocation;
        state.allocation.set_stablecoin(next);
        state.allocation.last_rebalance = Some(now);
        state.allocation.rebalance_count += 1;

        let record = RebalanceRecord {
            id: Uuid::new_v4(),
            plan_id,
            timestamp: now,
            from,
            to: state.allocation,
            market_score: self.market_score_of(&state.market),
            volatility,
            reason: rebalance_reason(current, target).to_string(),
        };
        state.history.push_back(record.clone());
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }

        info!(
            "Rebalanced: {}% -> {}% stablecoins ({})",
            current, next, record.reason
        );
        Ok(Some(record))
    }

    /// Halt rebalancing for the configured pause window. A new pause while
    /// one is in force restarts the window.
    pub async fn pause(&self, reason: &str) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.pause_reason(now).is_none() {
            warn!("Pausing rebalancing: {}", reason);
        }
        state.paused = Some(Pause {
            reason: reason.to_string(),
            until: self.pause_for.map(|d| now + d),
        });
    }

    pub async fn resume(&self) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if let Some(pause) = state.paused.take() {
            if pause.until.map_or(true, |until| now < until) {
                info!("Rebalancing resumed");
            }
        }
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.pause_reason(self.clock.now()).is_some()
    }

    /// Recommended allocation under hypothetical conditions; nothing changes
    pub async fn simulate_rebalance(
        &self,
        trend: Option<i32>,
        volatility: Option<f64>,
    ) -> RebalanceSimulation {
        let state = self.state.read().await;
        let market_score = trend.unwrap_or_else(|| self.market_score_of(&state.market));
        let volatility =
            volatility.unwrap_or_else(|| Self::mean_of(&state.market, |m| m.volatility_index));

        let current = state.allocation.stablecoin_percent;
        let tier = self.select_tier(market_score);
        let recommended = state
            .settings
            .clamp(tier.map(|t| t.stablecoin_target).unwrap_or(current));
        let speed = tier.map(|t| t.speed).unwrap_or(1);

        RebalanceSimulation {
            current_allocation: current,
            recommended_allocation: recommended,
            change: recommended as i32 - current as i32,
            projected_allocation: step_toward(current, recommended, step_size(volatility, speed)),
            reason: rebalance_reason(current, recommended).to_string(),
        }
    }

    /// Switch risk appetite. The current allocation is clamped into the new bounds.
    pub async fn update_risk_settings(
        &self,
        risk_appetite: RiskAppetite,
        rebalance_cooldown_secs: i64,
    ) -> Result<RiskSettings> {
        if rebalance_cooldown_secs < 0 {
            return Err(GuardError::Validation(
                "rebalance cooldown must not be negative".into(),
            ));
        }

        let mut state = self.state.write().await;
        let (min, max) = risk_appetite.bounds();
        state.settings.risk_appetite = risk_appetite;
        state.settings.min_stablecoin = min;
        state.settings.max_stablecoin = max;
        state.settings.rebalance_cooldown_secs = rebalance_cooldown_secs;

        let current = state.allocation.stablecoin_percent;
        let clamped = state.settings.clamp(current);
        if clamped != current {
            info!(
                "Allocation {}% outside new bounds {}..={}, clamped to {}%",
                current, min, max, clamped
            );
            state.allocation.set_stablecoin(clamped);
        }

        info!("Risk settings updated: {:?}", risk_appetite);
        Ok(state.settings)
    }

    pub async fn verify_allocation_compliance(&self, min_stable: u32, max_stable: u32) -> bool {
        let current = self.state.read().await.allocation.stablecoin_percent;
        current >= min_stable && current <= max_stable
    }

    pub async fn current_allocation(&self) -> TreasuryAllocation {
        self.state.read().await.allocation
    }

    pub async fn risk_settings(&self) -> RiskSettings {
        self.state.read().await.settings
    }

    pub async fn market_data(&self, asset: &str) -> Option<MarketSnapshot> {
        self.state.read().await.market.get(asset).cloned()
    }

    pub async fn all_market_data(&self) -> HashMap<String, MarketSnapshot> {
        self.state.read().await.market.clone()
    }

    /// Most recent `limit` records, oldest first
    pub async fn rebalance_history(&self, limit: usize) -> Vec<RebalanceRecord> {
        let state = self.state.read().await;
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub async fn stats(&self) -> GuardianStats {
        let state = self.state.read().await;
        GuardianStats {
            allocation: state.allocation,
            market_score: self.market_score_of(&state.market),
            volatility: Self::mean_of(&state.market, |m| m.volatility_index),
            confidence: Self::mean_of(&state.market, |m| f64::from(m.confidence)),
            rebalance_count: state.allocation.rebalance_count,
            last_rebalance: state.allocation.last_rebalance,
            paused: state.pause_reason(self.clock.now()).is_some(),
            circuit_breaker_trips: self.circuit_breaker_trips.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::platform::traits::RecordingSink;

    fn rebalancer() -> (MarketRebalancer, Arc<RecordingSink>, ManualClock) {
        let sink = Arc::new(RecordingSink::new());
        let clock = ManualClock::new(Utc::now());
        let guardian = MarketRebalancer::new(
            GuardianConfig::default(),
            sink.clone(),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (guardian, sink, clock)
    }

    async fn set_trend(guardian: &MarketRebalancer, trend: i32, volatility: f64) {
        for asset in ["BTC", "ETH", "SOL"] {
            guardian
                .update_market_data(asset, dec!(100), dec!(2_000_000_000), volatility, trend)
                .await
                .unwrap();
        }
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(market_confidence(dec!(2_000_000_000), 20.0), 100);
        assert_eq!(market_confidence(dec!(500_000_000), 40.0), 75);
        assert_eq!(market_confidence(dec!(1_000), 80.0), 50);
    }

    #[test]
    fn step_size_depends_on_volatility_and_speed() {
        assert_eq!(step_size(50.0, 2), 10);
        assert_eq!(step_size(80.0, 1), 3);
        assert_eq!(step_size(20.0, 1), 8);
        assert_eq!(step_size(20.0, 3), 23);
    }

    #[test]
    fn step_never_overshoots() {
        assert_eq!(step_toward(30, 35, 10), 35);
        assert_eq!(step_toward(30, 70, 10), 40);
        assert_eq!(step_toward(60, 20, 15), 45);
        assert_eq!(step_toward(25, 20, 15), 20);
    }

    #[test]
    fn reason_ordering() {
        assert_eq!(rebalance_reason(30, 70), "Severe market downturn detected");
        assert_eq!(rebalance_reason(30, 45), "Market weakness detected");
        assert_eq!(rebalance_reason(50, 20), "Strong bull market detected");
        assert_eq!(rebalance_reason(50, 35), "Market strength detected");
        assert_eq!(rebalance_reason(50, 45), "Minor market adjustment");
    }

    #[tokio::test]
    async fn market_score_is_weight_normalized() {
        let (guardian, _sink, _clock) = rebalancer();
        assert_eq!(guardian.compute_market_score().await, 0);
        assert_eq!(guardian.average_volatility().await, 50.0);

        guardian
            .update_market_data("BTC", dec!(45000), dec!(1), 35.0, 15)
            .await
            .unwrap();
        guardian
            .update_market_data("ETH", dec!(2800), dec!(1), 40.0, 20)
            .await
            .unwrap();
        guardian
            .update_market_data("SOL", dec!(120), dec!(1), 55.0, -10)
            .await
            .unwrap();

        // (15*40 + 20*30 - 10*30) / 100 = 9
        assert_eq!(guardian.compute_market_score().await, 9);
    }

    #[tokio::test]
    async fn untracked_asset_is_rejected() {
        let (guardian, _sink, _clock) = rebalancer();
        let err = guardian
            .update_market_data("DOGE", dec!(1), dec!(1), 10.0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Validation(_)));
    }

    #[tokio::test]
    async fn severe_downturn_target_clamps_to_max() {
        let (guardian, sink, _clock) = rebalancer();
        set_trend(&guardian, -65, 50.0).await;

        assert_eq!(guardian.compute_market_score().await, -65);
        let RebalanceCheck::Ready(plan) = guardian.evaluate().await else {
            panic!("expected a rebalance to be due");
        };
        assert_eq!(plan.target_stablecoin, 70);
        assert_eq!(plan.speed, 3);

        let proposals = sink.of_type(ActionType::Rebalance).await;
        assert!(!proposals.is_empty());
        assert_eq!(proposals[0].priority, 3);
        let payload: RebalancePlan = serde_json::from_value(proposals[0].payload.clone()).unwrap();
        assert!(payload.target_stablecoin <= 70);
    }

    #[tokio::test]
    async fn bull_tier_compares_at_or_above() {
        let (guardian, _sink, _clock) = rebalancer();
        set_trend(&guardian, 45, 50.0).await;
        let RebalanceCheck::Ready(plan) = guardian.evaluate().await else {
            panic!("expected bull tier");
        };
        assert_eq!(plan.target_stablecoin, 20);

        set_trend(&guardian, 10, 50.0).await;
        assert!(matches!(
            guardian.evaluate().await,
            RebalanceCheck::NoTier { market_score: 10 }
        ));
    }

    #[tokio::test]
    async fn circuit_breaker_blocks_rebalance() {
        // computed confidence never drops below 50, so trip on a stricter floor
        let sink = Arc::new(RecordingSink::new());
        let config = GuardianConfig {
            circuit_breaker_confidence: 60.0,
            ..GuardianConfig::default()
        };
        let guardian =
            MarketRebalancer::new(config, sink.clone(), Arc::new(ManualClock::new(Utc::now())))
                .unwrap();
        for asset in ["BTC", "ETH", "SOL"] {
            guardian
                .update_market_data(asset, dec!(1), dec!(1_000), 95.0, -80)
                .await
                .unwrap();
        }
        assert!(matches!(
            guardian.evaluate().await,
            RebalanceCheck::CircuitBreaker { .. }
        ));
        assert!(sink.proposals().await.is_empty());
        assert!(guardian.stats().await.circuit_breaker_trips > 0);
    }

    #[tokio::test]
    async fn second_rebalance_inside_cooldown_is_noop() {
        let (guardian, _sink, clock) = rebalancer();
        set_trend(&guardian, -65, 50.0).await;
        let RebalanceCheck::Ready(plan) = guardian.evaluate().await else {
            panic!("expected a rebalance to be due");
        };

        let record = guardian.execute_plan(&plan).await.unwrap().unwrap();
        assert_eq!(record.from.stablecoin_percent, 30);
        // volatility 50 -> base 10, speed 3 -> 15
        assert_eq!(record.to.stablecoin_percent, 45);
        assert_eq!(record.reason, "Severe market downturn detected");

        let before = guardian.current_allocation().await;
        assert!(guardian.execute_plan(&plan).await.unwrap().is_none());
        assert_eq!(guardian.current_allocation().await, before);
        assert!(!guardian.should_rebalance().await);

        clock.advance(Duration::seconds(1801));
        assert!(guardian.should_rebalance().await);
        let record = guardian.execute_plan(&plan).await.unwrap().unwrap();
        assert_eq!(record.to.stablecoin_percent, 60);
        assert_eq!(guardian.rebalance_history(10).await.len(), 2);
    }

    #[tokio::test]
    async fn paused_rebalancer_does_not_move() {
        let (guardian, _sink, _clock) = rebalancer();
        guardian.pause("critical alert").await;
        assert!(guardian.execute_rebalance(70, 50.0, 1).await.unwrap().is_none());
        assert!(matches!(guardian.evaluate().await, RebalanceCheck::Paused { .. }));

        guardian.resume().await;
        assert!(guardian.execute_rebalance(70, 50.0, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pause_expires_after_window() {
        let (guardian, _sink, clock) = rebalancer();
        guardian.pause("actor 0xabc frozen").await;
        assert!(guardian.is_paused().await);
        assert!(guardian.stats().await.paused);

        clock.advance(Duration::seconds(3599));
        assert!(guardian.is_paused().await);
        clock.advance(Duration::seconds(1));
        assert!(!guardian.is_paused().await);
        assert!(guardian.execute_rebalance(70, 50.0, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_pause_window_holds_until_resumed() {
        let sink = Arc::new(RecordingSink::new());
        let clock = ManualClock::new(Utc::now());
        let config = GuardianConfig {
            pause_secs: 0,
            ..GuardianConfig::default()
        };
        let guardian = MarketRebalancer::new(config, sink, Arc::new(clock.clone())).unwrap();

        guardian.pause("critical alert").await;
        clock.advance(Duration::days(30));
        assert!(guardian.is_paused().await);
        guardian.resume().await;
        assert!(!guardian.is_paused().await);
    }

    #[tokio::test]
    async fn volatility_spike_withdraws_instead_of_proposing() {
        let (guardian, sink, _clock) = rebalancer();
        guardian
            .update_market_data("BTC", dec!(100), dec!(2_000_000_000), 95.0, -80)
            .await
            .unwrap();

        assert!(sink.of_type(ActionType::Rebalance).await.is_empty());
        assert_eq!(
            sink.withdrawals().await,
            vec![(ActionType::Rebalance, "Market too volatile".to_string())]
        );
        // the reading itself is still kept
        assert_eq!(guardian.market_data("BTC").await.unwrap().volatility_index, 95.0);
    }

    #[tokio::test]
    async fn risk_settings_clamp_current_allocation() {
        let (guardian, _sink, _clock) = rebalancer();
        let settings = guardian
            .update_risk_settings(RiskAppetite::Conservative, 600)
            .await
            .unwrap();
        assert_eq!((settings.min_stablecoin, settings.max_stablecoin), (40, 80));

        let allocation = guardian.current_allocation().await;
        assert_eq!(allocation.stablecoin_percent, 40);
        assert_eq!(allocation.risk_asset_percent, 60);
        assert!(guardian.verify_allocation_compliance(40, 80).await);
    }

    #[tokio::test]
    async fn simulation_leaves_state_untouched() {
        let (guardian, _sink, _clock) = rebalancer();
        let sim = guardian.simulate_rebalance(Some(-45), None).await;
        assert_eq!(sim.current_allocation, 30);
        assert_eq!(sim.recommended_allocation, 60);
        assert_eq!(sim.change, 30);
        // no market data -> volatility 50, tier speed 2 -> step 10
        assert_eq!(sim.projected_allocation, 40);
        assert_eq!(guardian.current_allocation().await.stablecoin_percent, 30);
    }

    #[tokio::test]
    async fn allocation_always_sums_to_hundred() {
        let (guardian, _sink, clock) = rebalancer();
        for (target, vol, speed) in [(70, 80.0, 1), (20, 20.0, 3), (55, 50.0, 2), (0, 10.0, 3)] {
            clock.advance(Duration::hours(1));
            guardian.execute_rebalance(target, vol, speed).await.unwrap();
            let a = guardian.current_allocation().await;
            assert_eq!(a.stablecoin_percent + a.risk_asset_percent, 100);
            assert!((20..=70).contains(&a.stablecoin_percent));
        }
    }
}
