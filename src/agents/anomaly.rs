//! AnomalyScorer - behavioral security agent (watchdog)
//!
//! Keeps a behavior profile per actor and scores every transaction-like
//! event from three deviation signals:
//! - amount far from the actor's moving average
//! - activity in a three-hour block the actor has never used
//! - rapid back-to-back activity
//!
//! An optional [`SecondaryScorer`] can blend in an independent estimate once
//! the actor has enough history. High scores raise alerts and freezes, which
//! are proposed to the orchestrator through an [`ActionSink`].

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::{SecondaryScorerKind, WatchdogConfig};
use crate::error::{GuardError, Result};
use crate::persistence::{MemoryStore, SharedStore};
use crate::platform::traits::ActionSink;
use crate::platform::types::{ActionPriority, ActionProposal, ActionType, AgentId};

/// Alerts kept in memory; older ones are dropped first
const MAX_ALERTS: usize = 1000;

/// Per-actor behavior profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    pub actor_id: String,
    pub average_amount: Decimal,
    pub max_amount: Decimal,
    pub transaction_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
    /// Bit `n` set when the actor was ever active in UTC hours `3n..3n+3`
    pub active_hours: u8,
    /// Score of the most recent event
    pub risk_score: u32,
    pub is_admin: bool,
    pub frozen: bool,
    /// Flagged for closer review by another agent
    pub watched: bool,
}

impl BehaviorProfile {
    pub fn new(actor_id: &str) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            average_amount: Decimal::ZERO,
            max_amount: Decimal::ZERO,
            transaction_count: 0,
            last_activity: None,
            active_hours: 0,
            risk_score: 0,
            is_admin: false,
            frozen: false,
            watched: false,
        }
    }

    /// Index of the three-hour block containing `ts` (0..8)
    pub fn hour_block(ts: DateTime<Utc>) -> u32 {
        ts.hour() / 3
    }

    pub fn has_seen_block(&self, block: u32) -> bool {
        self.active_hours & (1u8 << block) != 0
    }

    /// Fold an event into the moving statistics
    fn absorb(&mut self, amount: Decimal, ts: DateTime<Utc>, score: u32) {
        self.average_amount = if self.transaction_count == 0 {
            amount
        } else {
            let count = Decimal::from(self.transaction_count);
            (self.average_amount * count + amount) / (count + Decimal::ONE)
        };
        self.max_amount = self.max_amount.max(amount);
        self.active_hours |= 1u8 << Self::hour_block(ts);
        self.transaction_count += 1;
        self.last_activity = Some(ts);
        self.risk_score = score;
    }
}

/// Per-signal contributions of a single score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub amount_points: f64,
    pub timing_points: f64,
    pub frequency_points: f64,
    /// Secondary estimate, when one was blended in
    pub secondary: Option<f64>,
    /// Final clamped 0-100 score
    pub score: u32,
}

impl ScoreBreakdown {
    pub fn rule_points(&self) -> f64 {
        self.amount_points + self.timing_points + self.frequency_points
    }
}

/// Inputs handed to a secondary scorer:
/// amount ratio, hour/24, weekday/7, ln(gap+1)/10, count/1000, risk/100
pub type FeatureVector = [f64; 6];

/// Independent 0-100 anomaly estimate blended into the rule score
pub trait SecondaryScorer: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, features: &FeatureVector) -> f64;
}

/// Stand-in estimator returning a uniform random score.
///
/// Carries no statistical meaning; it only exercises the blending path.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomizedScorer;

impl SecondaryScorer for RandomizedScorer {
    fn name(&self) -> &str {
        "randomized"
    }

    fn score(&self, _features: &FeatureVector) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }
}

pub fn secondary_scorer_for(kind: SecondaryScorerKind) -> Option<Arc<dyn SecondaryScorer>> {
    match kind {
        SecondaryScorerKind::None => None,
        SecondaryScorerKind::Randomized => Some(Arc::new(RandomizedScorer)),
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Rule-based score of an event against a profile, before any secondary blend
pub fn rule_score(
    config: &WatchdogConfig,
    profile: &BehaviorProfile,
    amount: Decimal,
    ts: DateTime<Utc>,
) -> ScoreBreakdown {
    let mut breakdown = ScoreBreakdown {
        amount_points: 0.0,
        timing_points: 0.0,
        frequency_points: 0.0,
        secondary: None,
        score: 0,
    };

    if profile.average_amount > Decimal::ZERO {
        let avg = to_f64(profile.average_amount);
        let deviation = (to_f64(amount) - avg).abs() / avg;
        if deviation > 2.0 {
            // 30 points at 2x deviation, capped at 60
            breakdown.amount_points = 30.0 * (deviation / 2.0).min(2.0);
        }
    }

    let block = BehaviorProfile::hour_block(ts);
    if !profile.has_seen_block(block) && profile.transaction_count > config.min_history_for_timing {
        breakdown.timing_points = 20.0;
    }

    if let Some(last) = profile.last_activity {
        let gap = (ts - last).num_seconds();
        if gap < config.rapid_gap_secs
            && profile.transaction_count > config.min_history_for_frequency
        {
            breakdown.frequency_points = 25.0;
        }
    }

    breakdown.score = clamp_score(breakdown.rule_points());
    breakdown
}

fn clamp_score(raw: f64) -> u32 {
    raw.round().clamp(0.0, 100.0) as u32
}

pub fn extract_features(profile: &BehaviorProfile, amount: Decimal, ts: DateTime<Utc>) -> FeatureVector {
    let amount_ratio = if profile.average_amount > Decimal::ZERO {
        to_f64(amount) / to_f64(profile.average_amount)
    } else {
        1.0
    };
    let gap_secs = profile
        .last_activity
        .map(|last| (ts - last).num_seconds().max(0) as f64)
        .unwrap_or(3600.0);

    [
        amount_ratio,
        f64::from(ts.hour()) / 24.0,
        f64::from(ts.weekday().num_days_from_sunday()) / 7.0,
        (gap_secs + 1.0).ln() / 10.0,
        profile.transaction_count as f64 / 1000.0,
        f64::from(profile.risk_score) / 100.0,
    ]
}

/// Alert category, derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    UnusualAmount,
    UnusualTiming,
    RapidTransactions,
    SuspiciousAdminAction,
}

impl AlertType {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 80 => AlertType::SuspiciousAdminAction,
            s if s >= 60 => AlertType::RapidTransactions,
            s if s >= 40 => AlertType::UnusualTiming,
            _ => AlertType::UnusualAmount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 90 => AlertSeverity::Critical,
            s if s >= 75 => AlertSeverity::High,
            s if s >= 60 => AlertSeverity::Medium,
            _ => AlertSeverity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub actor_id: String,
    pub score: u32,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub details: String,
    pub status: AlertStatus,
}

/// Multi-approval request raised for an oversized admin action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub admin_id: String,
    pub action: String,
    pub target: String,
    pub amount: Decimal,
    pub required_approvals: u32,
    pub current_approvals: u32,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminValidation {
    pub valid: bool,
    pub reason: Option<String>,
    pub challenge: Option<Challenge>,
}

impl AdminValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
            challenge: None,
        }
    }

    fn denied(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
            challenge: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WatchdogStats {
    pub total_profiles: usize,
    pub frozen_accounts: usize,
    pub watched_accounts: usize,
    pub active_alerts: usize,
    pub critical_alerts: usize,
    pub challenges: usize,
    pub events_recorded: u64,
}

/// Behavioral anomaly detector
pub struct AnomalyScorer {
    config: WatchdogConfig,
    profiles: SharedStore<String, BehaviorProfile>,
    alerts: RwLock<Vec<Alert>>,
    challenges: RwLock<Vec<Challenge>>,
    secondary: Option<Arc<dyn SecondaryScorer>>,
    sink: Arc<dyn ActionSink>,
    clock: SharedClock,
    /// Serializes read-score-write of profiles
    record_lock: Mutex<()>,
    events_recorded: AtomicU64,
}

impl AnomalyScorer {
    pub fn new(config: WatchdogConfig, sink: Arc<dyn ActionSink>, clock: SharedClock) -> Self {
        Self::with_store(config, MemoryStore::shared(), sink, clock)
    }

    pub fn with_store(
        config: WatchdogConfig,
        profiles: SharedStore<String, BehaviorProfile>,
        sink: Arc<dyn ActionSink>,
        clock: SharedClock,
    ) -> Self {
        let secondary = secondary_scorer_for(config.secondary_scorer);
        for admin in &config.admins {
            let mut profile = profiles
                .get(admin)
                .unwrap_or_else(|| BehaviorProfile::new(admin));
            profile.is_admin = true;
            profiles.put(admin.clone(), profile);
        }

        Self {
            config,
            profiles,
            alerts: RwLock::new(Vec::new()),
            challenges: RwLock::new(Vec::new()),
            secondary,
            sink,
            clock,
            record_lock: Mutex::new(()),
            events_recorded: AtomicU64::new(0),
        }
    }

    /// Replace the secondary scorer
    pub fn with_secondary(mut self, scorer: Option<Arc<dyn SecondaryScorer>>) -> Self {
        self.secondary = scorer;
        self
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Score of an event against the current profile, without recording it
    pub fn score(&self, profile: &BehaviorProfile, amount: Decimal, ts: DateTime<Utc>) -> ScoreBreakdown {
        let mut breakdown = rule_score(&self.config, profile, amount, ts);

        if let Some(secondary) = &self.secondary {
            if profile.transaction_count > self.config.min_history_for_secondary {
                let features = extract_features(profile, amount, ts);
                let estimate = secondary.score(&features).clamp(0.0, 100.0);
                let w = self.config.secondary_weight;
                breakdown.secondary = Some(estimate);
                breakdown.score = clamp_score(breakdown.rule_points() * (1.0 - w) + estimate * w);
            }
        }

        breakdown
    }

    /// Score an event, update the actor's profile and raise alerts/freezes
    pub async fn record_event(
        &self,
        actor_id: &str,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<u32> {
        if actor_id.trim().is_empty() {
            return Err(GuardError::Validation("actor id must not be empty".into()));
        }
        if amount < Decimal::ZERO {
            return Err(GuardError::Validation(format!(
                "amount must not be negative, got {}",
                amount
            )));
        }

        let mut proposals = Vec::new();
        let score = {
            let _guard = self.record_lock.lock().await;

            let mut profile = self
                .profiles
                .get(&actor_id.to_string())
                .unwrap_or_else(|| BehaviorProfile::new(actor_id));
            let breakdown = self.score(&profile, amount, timestamp);
            let score = breakdown.score;
            let was_frozen = profile.frozen;
            let alert_threshold = if profile.watched {
                self.config.watched_alert_threshold
            } else {
                self.config.alert_threshold
            };

            profile.absorb(amount, timestamp, score);

            if score >= self.config.freeze_threshold && !was_frozen {
                profile.frozen = true;
            }
            self.profiles.put(actor_id.to_string(), profile);
            self.events_recorded.fetch_add(1, Ordering::Relaxed);

            debug!(
                actor = actor_id,
                score,
                amount = %amount,
                amount_points = breakdown.amount_points,
                timing_points = breakdown.timing_points,
                frequency_points = breakdown.frequency_points,
                "Scored event"
            );

            if score >= alert_threshold {
                let alert = self.create_alert(actor_id, score, amount, timestamp).await;
                let (action_type, priority) = if alert.severity == AlertSeverity::Critical {
                    (ActionType::CriticalAlert, ActionPriority::Critical)
                } else {
                    (ActionType::Alert, ActionPriority::High)
                };
                proposals.push(ActionProposal::new(
                    AgentId::Watchdog,
                    action_type,
                    priority.value(),
                    json!({
                        "alert_id": alert.id,
                        "actor_id": actor_id,
                        "score": score,
                        "amount": amount,
                        "alert_type": alert.alert_type,
                        "severity": alert.severity,
                    }),
                ));
            }

            if score >= self.config.freeze_threshold {
                if was_frozen {
                    debug!(actor = actor_id, score, "Actor already frozen, not re-proposing freeze");
                } else {
                    warn!(actor = actor_id, score, "Freezing account due to high anomaly score");
                    proposals.push(ActionProposal::new(
                        AgentId::Watchdog,
                        ActionType::Freeze,
                        ActionPriority::Critical.value(),
                        json!({
                            "actor_id": actor_id,
                            "score": score,
                            "reason": format!("Anomaly score {} at or above freeze threshold", score),
                        }),
                    ));
                }
            }

            score
        };

        self.dispatch(proposals).await;
        Ok(score)
    }

    async fn dispatch(&self, proposals: Vec<ActionProposal>) {
        for proposal in proposals {
            let action_type = proposal.action_type;
            if let Err(e) = self.sink.propose(proposal).await {
                error!("Failed to propose {} action: {}", action_type, e);
            }
        }
    }

    async fn create_alert(
        &self,
        actor_id: &str,
        score: u32,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Alert {
        let alert = Alert {
            id: Uuid::new_v4(),
            actor_id: actor_id.to_string(),
            score,
            amount,
            timestamp,
            alert_type: AlertType::from_score(score),
            severity: AlertSeverity::from_score(score),
            details: format!("Anomaly detected with score {}", score),
            status: AlertStatus::Active,
        };

        if alert.severity == AlertSeverity::Critical {
            error!("CRITICAL ALERT: {} for actor {}", alert.details, actor_id);
        } else {
            warn!("Alert raised: {} for actor {}", alert.details, actor_id);
        }

        let mut alerts = self.alerts.write().await;
        alerts.push(alert.clone());
        if alerts.len() > MAX_ALERTS {
            let excess = alerts.len() - MAX_ALERTS;
            alerts.drain(..excess);
        }
        alert
    }

    /// Check an admin-initiated action against the admin's behavior profile
    pub async fn validate_admin_action(
        &self,
        admin_id: &str,
        action: &str,
        target: &str,
        amount: Decimal,
    ) -> Result<AdminValidation> {
        let Some(profile) = self.profiles.get(&admin_id.to_string()) else {
            return Ok(AdminValidation::denied("Not an admin"));
        };
        if !profile.is_admin {
            return Ok(AdminValidation::denied("Not an admin"));
        }
        if profile.frozen {
            return Ok(AdminValidation::denied("Admin account is frozen"));
        }

        let limit = profile.average_amount * Decimal::from(self.config.admin_challenge_multiplier);
        if amount > limit {
            let challenge = self.create_challenge(admin_id, action, target, amount).await;
            let mut result = AdminValidation::denied("Amount requires challenge");
            result.challenge = Some(challenge);
            return Ok(result);
        }

        let now = self.clock.now();
        let window = Duration::seconds(self.config.recent_alert_window_secs);
        let recent = self.alerts.read().await.iter().any(|a| {
            a.actor_id == admin_id && a.status == AlertStatus::Active && now - a.timestamp < window
        });
        if recent {
            return Ok(AdminValidation::denied("Recent suspicious activity"));
        }

        Ok(AdminValidation::ok())
    }

    async fn create_challenge(
        &self,
        admin_id: &str,
        action: &str,
        target: &str,
        amount: Decimal,
    ) -> Challenge {
        let now = self.clock.now();
        let challenge = Challenge {
            id: Uuid::new_v4(),
            admin_id: admin_id.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            amount,
            required_approvals: self.config.challenge_required_approvals,
            current_approvals: 0,
            deadline: now + Duration::seconds(self.config.challenge_deadline_secs),
            created_at: now,
        };
        info!(
            admin = admin_id,
            action, target, amount = %amount, "Admin action challenged"
        );
        self.challenges.write().await.push(challenge.clone());

        self.dispatch(vec![ActionProposal::new(
            AgentId::Watchdog,
            ActionType::Challenge,
            ActionPriority::High.value(),
            json!({
                "challenge_id": challenge.id,
                "admin_id": admin_id,
                "action": action,
                "target": target,
                "amount": amount,
                "required_approvals": challenge.required_approvals,
                "deadline": challenge.deadline,
            }),
        )])
        .await;

        challenge
    }

    pub async fn register_admin(&self, actor_id: &str) {
        let _guard = self.record_lock.lock().await;
        let mut profile = self
            .profiles
            .get(&actor_id.to_string())
            .unwrap_or_else(|| BehaviorProfile::new(actor_id));
        profile.is_admin = true;
        self.profiles.put(actor_id.to_string(), profile);
        info!(actor = actor_id, "Registered admin");
    }

    /// Mark an actor for closer review: its events alert at
    /// `watched_alert_threshold`. Returns false if it was already watched.
    pub async fn watch(&self, actor_id: &str) -> bool {
        let _guard = self.record_lock.lock().await;
        let mut profile = self
            .profiles
            .get(&actor_id.to_string())
            .unwrap_or_else(|| BehaviorProfile::new(actor_id));
        if profile.watched {
            return false;
        }
        profile.watched = true;
        self.profiles.put(actor_id.to_string(), profile);
        info!(actor = actor_id, "Actor placed under watch");
        true
    }

    /// Returns false when the actor is unknown or not frozen
    pub async fn unfreeze(&self, actor_id: &str) -> bool {
        let _guard = self.record_lock.lock().await;
        match self.profiles.get(&actor_id.to_string()) {
            Some(mut profile) if profile.frozen => {
                profile.frozen = false;
                self.profiles.put(actor_id.to_string(), profile);
                info!(actor = actor_id, "Account unfrozen");
                true
            }
            _ => false,
        }
    }

    pub async fn dismiss_alert(&self, alert_id: Uuid) -> bool {
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.status = AlertStatus::Dismissed;
                true
            }
            None => false,
        }
    }

    pub fn behavior_profile(&self, actor_id: &str) -> Option<BehaviorProfile> {
        self.profiles.get(&actor_id.to_string())
    }

    pub fn is_frozen(&self, actor_id: &str) -> bool {
        self.behavior_profile(actor_id)
            .map(|p| p.frozen)
            .unwrap_or(false)
    }

    pub async fn active_alerts(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| a.status == AlertStatus::Active)
            .cloned()
            .collect()
    }

    pub async fn challenges(&self) -> Vec<Challenge> {
        self.challenges.read().await.clone()
    }

    pub async fn stats(&self) -> WatchdogStats {
        let profiles = self.profiles.scan();
        let alerts = self.alerts.read().await;
        WatchdogStats {
            total_profiles: profiles.len(),
            frozen_accounts: profiles.iter().filter(|(_, p)| p.frozen).count(),
            watched_accounts: profiles.iter().filter(|(_, p)| p.watched).count(),
            active_alerts: alerts.iter().filter(|a| a.status == AlertStatus::Active).count(),
            critical_alerts: alerts
                .iter()
                .filter(|a| a.severity == AlertSeverity::Critical)
                .count(),
            challenges: self.challenges.read().await.len(),
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::platform::traits::RecordingSink;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    fn scorer(sink: Arc<RecordingSink>) -> (AnomalyScorer, ManualClock) {
        let clock = ManualClock::new(noon());
        let scorer = AnomalyScorer::new(WatchdogConfig::default(), sink, Arc::new(clock.clone()));
        (scorer, clock)
    }

    fn seasoned_profile() -> BehaviorProfile {
        let mut profile = BehaviorProfile::new("0xuser");
        profile.average_amount = dec!(100);
        profile.max_amount = dec!(150);
        profile.transaction_count = 20;
        profile.last_activity = Some(noon() - Duration::hours(2));
        profile.active_hours = 1 << BehaviorProfile::hour_block(noon());
        profile
    }

    /// Record `n` ordinary events an hour apart, ending at `end`
    async fn warm_up(scorer: &AnomalyScorer, actor: &str, n: i64, end: DateTime<Utc>) {
        for i in (1..=n).rev() {
            scorer
                .record_event(actor, dec!(100), end - Duration::hours(i * 24))
                .await
                .unwrap();
        }
    }

    #[test]
    fn amount_signal_caps_at_sixty() {
        let cfg = WatchdogConfig::default();
        let profile = seasoned_profile();

        // within 2x deviation: nothing
        assert_eq!(rule_score(&cfg, &profile, dec!(250), noon()).score, 0);
        // deviation 3 -> 45 points
        assert_eq!(rule_score(&cfg, &profile, dec!(400), noon()).score, 45);
        // deviation 9 -> capped at 60
        assert_eq!(rule_score(&cfg, &profile, dec!(1000), noon()).score, 60);
    }

    #[test]
    fn timing_signal_requires_history() {
        let cfg = WatchdogConfig::default();
        let mut profile = seasoned_profile();
        let night = noon() - Duration::hours(10); // 02:00, block 0

        assert_eq!(rule_score(&cfg, &profile, dec!(100), night).timing_points, 20.0);

        profile.transaction_count = 10;
        assert_eq!(rule_score(&cfg, &profile, dec!(100), night).timing_points, 0.0);
    }

    #[test]
    fn frequency_signal_on_rapid_events() {
        let cfg = WatchdogConfig::default();
        let mut profile = seasoned_profile();
        profile.last_activity = Some(noon() - Duration::seconds(30));

        assert_eq!(rule_score(&cfg, &profile, dec!(100), noon()).score, 25);

        profile.transaction_count = 5;
        assert_eq!(rule_score(&cfg, &profile, dec!(100), noon()).score, 0);
    }

    #[test]
    fn severity_and_type_bands() {
        assert_eq!(AlertSeverity::from_score(90), AlertSeverity::Critical);
        assert_eq!(AlertSeverity::from_score(75), AlertSeverity::High);
        assert_eq!(AlertSeverity::from_score(74), AlertSeverity::Medium);
        assert_eq!(AlertType::from_score(85), AlertType::SuspiciousAdminAction);
        assert_eq!(AlertType::from_score(39), AlertType::UnusualAmount);
    }

    struct FixedScorer(f64);

    impl SecondaryScorer for FixedScorer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn score(&self, _features: &FeatureVector) -> f64 {
            self.0
        }
    }

    #[tokio::test]
    async fn secondary_scorer_blends_sixty_forty() {
        let sink = Arc::new(RecordingSink::new());
        let (scorer, _clock) = scorer(sink);
        let scorer = scorer.with_secondary(Some(Arc::new(FixedScorer(100.0))));

        let profile = seasoned_profile();
        // rule 45, secondary 100 -> 45*0.6 + 40 = 67
        let breakdown = scorer.score(&profile, dec!(400), noon());
        assert_eq!(breakdown.secondary, Some(100.0));
        assert_eq!(breakdown.score, 67);

        let mut young = seasoned_profile();
        young.transaction_count = 10;
        assert_eq!(scorer.score(&young, dec!(400), noon()).secondary, None);
    }

    #[tokio::test]
    async fn first_event_creates_profile() {
        let sink = Arc::new(RecordingSink::new());
        let (scorer, _clock) = scorer(sink.clone());

        let score = scorer.record_event("0xnew", dec!(500), noon()).await.unwrap();
        assert_eq!(score, 0);

        let profile = scorer.behavior_profile("0xnew").unwrap();
        assert_eq!(profile.transaction_count, 1);
        assert_eq!(profile.average_amount, dec!(500));
        assert!(profile.has_seen_block(4));
        assert!(sink.proposals().await.is_empty());
    }

    #[tokio::test]
    async fn rejects_negative_amount() {
        let sink = Arc::new(RecordingSink::new());
        let (scorer, _clock) = scorer(sink);
        let err = scorer.record_event("0xa", dec!(-1), noon()).await.unwrap_err();
        assert!(matches!(err, GuardError::Validation(_)));
    }

    #[tokio::test]
    async fn high_score_freezes_once_and_proposes_actions() {
        let sink = Arc::new(RecordingSink::new());
        let (scorer, _clock) = scorer(sink.clone());
        warm_up(&scorer, "0xwhale", 12, noon()).await;

        // 03:00 block never seen, huge amount, 10s after the previous event
        let ts = (noon() - Duration::hours(24)).with_hour(3).unwrap();
        let mut profile = scorer.behavior_profile("0xwhale").unwrap();
        profile.last_activity = Some(ts - Duration::seconds(10));
        scorer.profiles.put("0xwhale".into(), profile);

        let score = scorer.record_event("0xwhale", dec!(5000), ts).await.unwrap();
        assert!(score >= 90, "score {}", score);
        assert!(scorer.is_frozen("0xwhale"));

        assert_eq!(sink.of_type(ActionType::Freeze).await.len(), 1);
        let critical = sink.of_type(ActionType::CriticalAlert).await;
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].priority, 1);

        // frozen actor keeps being scored but is not frozen again
        let ts2 = ts.with_hour(6).unwrap();
        let mut profile = scorer.behavior_profile("0xwhale").unwrap();
        profile.last_activity = Some(ts2 - Duration::seconds(5));
        scorer.profiles.put("0xwhale".into(), profile);
        let again = scorer.record_event("0xwhale", dec!(500000), ts2).await.unwrap();
        assert!(again >= 90, "score {}", again);
        assert_eq!(sink.of_type(ActionType::Freeze).await.len(), 1);
        assert_eq!(sink.of_type(ActionType::CriticalAlert).await.len(), 2);
        assert_eq!(scorer.stats().await.frozen_accounts, 1);
    }

    #[tokio::test]
    async fn admin_validation_paths() {
        let sink = Arc::new(RecordingSink::new());
        let (scorer, _clock) = scorer(sink.clone());

        let denied = scorer
            .validate_admin_action("0xnobody", "withdraw", "0xt", dec!(1))
            .await
            .unwrap();
        assert!(!denied.valid);

        scorer.register_admin("0xadmin").await;
        scorer.record_event("0xadmin", dec!(1000), noon()).await.unwrap();

        let ok = scorer
            .validate_admin_action("0xadmin", "withdraw", "0xt", dec!(4000))
            .await
            .unwrap();
        assert!(ok.valid);

        let challenged = scorer
            .validate_admin_action("0xadmin", "withdraw", "0xt", dec!(6000))
            .await
            .unwrap();
        assert!(!challenged.valid);
        assert_eq!(challenged.reason.as_deref(), Some("Amount requires challenge"));
        let challenge = challenged.challenge.unwrap();
        assert_eq!(challenge.required_approvals, 2);
        assert_eq!(challenge.deadline - challenge.created_at, Duration::hours(1));

        let proposals = sink.of_type(ActionType::Challenge).await;
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].priority, 2);
    }

    #[tokio::test]
    async fn recent_alert_blocks_admin_until_dismissed() {
        let sink = Arc::new(RecordingSink::new());
        let (scorer, clock) = scorer(sink);
        scorer.register_admin("0xadmin").await;
        scorer.record_event("0xadmin", dec!(1000), noon()).await.unwrap();

        let alert = scorer
            .create_alert("0xadmin", 80, dec!(1000), clock.now())
            .await;
        let blocked = scorer
            .validate_admin_action("0xadmin", "withdraw", "0xt", dec!(10))
            .await
            .unwrap();
        assert_eq!(blocked.reason.as_deref(), Some("Recent suspicious activity"));

        clock.advance(Duration::minutes(61));
        let ok = scorer
            .validate_admin_action("0xadmin", "withdraw", "0xt", dec!(10))
            .await
            .unwrap();
        assert!(ok.valid);

        assert!(scorer.dismiss_alert(alert.id).await);
        assert!(scorer.active_alerts().await.is_empty());
    }

    #[tokio::test]
    async fn watch_and_unfreeze() {
        let sink = Arc::new(RecordingSink::new());
        let (scorer, _clock) = scorer(sink);

        assert!(scorer.watch("0xuser").await);
        assert!(!scorer.watch("0xuser").await);
        assert!(scorer.behavior_profile("0xuser").unwrap().watched);

        assert!(!scorer.unfreeze("0xuser").await);
        let mut profile = scorer.behavior_profile("0xuser").unwrap();
        profile.frozen = true;
        scorer.profiles.put("0xuser".into(), profile);
        assert!(scorer.unfreeze("0xuser").await);
        assert!(!scorer.is_frozen("0xuser"));
    }

    #[tokio::test]
    async fn watched_actor_alerts_at_lower_threshold() {
        let sink = Arc::new(RecordingSink::new());
        let (scorer, _clock) = scorer(sink.clone());
        scorer.watch("0xwatched").await;

        for actor in ["0xwatched", "0xplain"] {
            scorer
                .record_event(actor, dec!(100), noon() - Duration::days(1))
                .await
                .unwrap();
            // 4x deviation -> 60 points, under the normal threshold of 75
            let score = scorer.record_event(actor, dec!(500), noon()).await.unwrap();
            assert_eq!(score, 60);
        }

        let alerts = sink.of_type(ActionType::Alert).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].payload["actor_id"], "0xwatched");
        let active = scorer.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].actor_id, "0xwatched");
    }

    proptest! {
        #[test]
        fn score_is_monotonic_in_amount_above_average(
            a in 100u32..100_000,
            delta in 0u32..100_000,
            count in 0u64..50,
            gap_secs in 0i64..7200,
            hour in 0u32..24,
        ) {
            let cfg = WatchdogConfig::default();
            let mut profile = seasoned_profile();
            profile.transaction_count = count;
            let ts = noon().with_hour(hour).unwrap();
            profile.last_activity = Some(ts - Duration::seconds(gap_secs));

            let low = Decimal::from(a);
            let high = Decimal::from(a + delta);
            let s1 = rule_score(&cfg, &profile, low, ts).score;
            let s2 = rule_score(&cfg, &profile, high, ts).score;
            prop_assert!(s2 >= s1, "score({}) = {} < score({}) = {}", high, s2, low, s1);
        }

        #[test]
        fn score_stays_within_bounds(amount in 0u64..10_000_000, count in 0u64..100) {
            let cfg = WatchdogConfig::default();
            let mut profile = seasoned_profile();
            profile.transaction_count = count;
            let breakdown = rule_score(&cfg, &profile, Decimal::from(amount), noon());
            prop_assert!(breakdown.score <= 100);
        }
    }
}
