//! RiskProfiler - questionnaire scoring and per-user allocation
//!
//! Converts quiz answers into category sub-scores and a composite score,
//! maps the composite onto an allocation band and flags profiles that look
//! inconsistent (elderly with high risk, very young at maximum risk, sharp
//! score changes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::ProfilerConfig;
use crate::error::{GuardError, Result};
use crate::persistence::{MemoryStore, SharedStore};
use crate::platform::traits::ActionSink;
use crate::platform::types::{ActionPriority, ActionProposal, ActionType, AgentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    RiskTolerance,
    InvestmentGoals,
    Experience,
    TimeHorizon,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizQuestion {
    pub id: u32,
    pub category: QuestionCategory,
    pub question: &'static str,
    pub options: [&'static str; 4],
    pub weight: u32,
}

static QUIZ: [QuizQuestion; 8] = [
    QuizQuestion {
        id: 1,
        category: QuestionCategory::RiskTolerance,
        question: "How would you react to a 20% drop in your portfolio value?",
        options: [
            "Sell everything immediately",
            "Sell some to reduce losses",
            "Hold and wait for recovery",
            "Buy more at lower prices",
        ],
        weight: 3,
    },
    QuizQuestion {
        id: 2,
        category: QuestionCategory::RiskTolerance,
        question: "What percentage of your portfolio would you allocate to high-risk assets?",
        options: ["0-10%", "10-30%", "30-50%", "More than 50%"],
        weight: 3,
    },
    QuizQuestion {
        id: 3,
        category: QuestionCategory::RiskTolerance,
        question: "How often do you check your portfolio?",
        options: ["Multiple times daily", "Daily", "Weekly", "Monthly or less"],
        weight: 2,
    },
    QuizQuestion {
        id: 4,
        category: QuestionCategory::InvestmentGoals,
        question: "What is your primary investment goal?",
        options: [
            "Capital preservation",
            "Steady income",
            "Long-term growth",
            "Maximum returns",
        ],
        weight: 2,
    },
    QuizQuestion {
        id: 5,
        category: QuestionCategory::InvestmentGoals,
        question: "When do you plan to use these funds?",
        options: ["Less than 1 year", "1-3 years", "3-10 years", "More than 10 years"],
        weight: 2,
    },
    QuizQuestion {
        id: 6,
        category: QuestionCategory::Experience,
        question: "How many years of investment experience do you have?",
        options: ["None", "Less than 2 years", "2-5 years", "More than 5 years"],
        weight: 2,
    },
    QuizQuestion {
        id: 7,
        category: QuestionCategory::Experience,
        question: "Have you invested in cryptocurrencies before?",
        options: ["Never", "Small amounts", "Moderate amounts", "Significant amounts"],
        weight: 1,
    },
    QuizQuestion {
        id: 8,
        category: QuestionCategory::TimeHorizon,
        question: "What is your investment time horizon?",
        options: ["Less than 1 year", "1-3 years", "3-10 years", "More than 10 years"],
        weight: 5,
    },
];

pub fn quiz_questions() -> &'static [QuizQuestion] {
    &QUIZ
}

/// Percent applied to the raw risk-tolerance sum
pub fn age_multiplier(age: u32) -> u32 {
    match age {
        a if a < 30 => 100,
        a if a < 40 => 90,
        a if a < 50 => 75,
        a if a < 60 => 60,
        _ => 40,
    }
}

/// riskTolerance x4 + goals x2 + experience x2 + min(timeHorizon, 10) x2
pub fn composite_score(risk_tolerance: u32, goals: u32, experience: u32, time_horizon: u32) -> u32 {
    risk_tolerance * 4 + goals * 2 + experience * 2 + time_horizon.min(10) * 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileScores {
    /// 1-10
    pub risk_tolerance: u32,
    /// 1-4
    pub goals: u32,
    /// 1-4
    pub experience: u32,
    /// 1-30
    pub time_horizon: u32,
    pub composite: u32,
}

fn round_div(value: u32, divisor: u32) -> u32 {
    (f64::from(value) / f64::from(divisor)).round() as u32
}

/// Score quiz responses (question id -> 0-based option index).
///
/// Unknown question ids are ignored; an option index above 3 is rejected.
pub fn compute_score(responses: &HashMap<u32, u32>, age: u32) -> Result<ProfileScores> {
    let mut sums: HashMap<QuestionCategory, u32> = HashMap::new();

    for (question_id, answer) in responses {
        let Some(question) = QUIZ.iter().find(|q| q.id == *question_id) else {
            continue;
        };
        if *answer as usize >= question.options.len() {
            return Err(GuardError::Validation(format!(
                "answer {} out of range for question {}",
                answer, question_id
            )));
        }
        *sums.entry(question.category).or_default() += (answer + 1) * question.weight;
    }

    let sum = |c: QuestionCategory| sums.get(&c).copied().unwrap_or(0);
    let risk_raw = round_div(sum(QuestionCategory::RiskTolerance) * age_multiplier(age), 100);

    let risk_tolerance = round_div(risk_raw, 7).clamp(1, 10);
    let goals = round_div(sum(QuestionCategory::InvestmentGoals), 4).clamp(1, 4);
    let experience = round_div(sum(QuestionCategory::Experience), 3).clamp(1, 4);
    let time_horizon = sum(QuestionCategory::TimeHorizon).clamp(1, 30);

    Ok(ProfileScores {
        risk_tolerance,
        goals,
        experience,
        time_horizon,
        composite: composite_score(risk_tolerance, goals, experience, time_horizon),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationBand {
    Conservative,
    Balanced,
    Growth,
    Aggressive,
}

impl AllocationBand {
    pub fn from_composite(composite: u32) -> Self {
        match composite {
            c if c < 30 => AllocationBand::Conservative,
            c if c < 60 => AllocationBand::Balanced,
            c if c < 80 => AllocationBand::Growth,
            _ => AllocationBand::Aggressive,
        }
    }

    /// (stablecoin, major, growth, max drawdown, rebalance every n days)
    fn base(&self) -> (i64, i64, i64, u32, u32) {
        match self {
            AllocationBand::Conservative => (60, 30, 10, 15, 30),
            AllocationBand::Balanced => (30, 50, 20, 25, 14),
            AllocationBand::Growth => (15, 55, 30, 35, 7),
            AllocationBand::Aggressive => (10, 40, 50, 50, 3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAllocation {
    pub band: AllocationBand,
    pub stablecoin_percent: u32,
    pub major_assets_percent: u32,
    pub growth_assets_percent: u32,
    pub max_drawdown_tolerance: u32,
    pub rebalance_frequency_days: u32,
}

impl UserAllocation {
    pub fn total(&self) -> u32 {
        self.stablecoin_percent + self.major_assets_percent + self.growth_assets_percent
    }
}

/// Target allocation for a profile; the three percentages always sum to 100
pub fn generate_allocation(age: u32, composite: u32, time_horizon: u32) -> UserAllocation {
    let band = AllocationBand::from_composite(composite);
    let (mut stable, mut major, mut growth, max_drawdown, frequency) = band.base();

    if age > 60 {
        stable = (stable + 20).min(100);
        growth = (growth - 20).max(0);
    } else if age > 50 {
        stable = (stable + 10).min(100);
        growth = (growth - 10).max(0);
    }

    if time_horizon < 2 {
        stable = (stable + 30).min(100);
        growth = (growth - 20).max(0);
        major = (major - 10).max(0);
    }

    let total = stable + major + growth;
    if total != 100 {
        let ratio = 100.0 / total as f64;
        stable = (stable as f64 * ratio).round() as i64;
        major = (major as f64 * ratio).round() as i64;
        growth = 100 - stable - major;
        if growth < 0 {
            // both roundings went up
            major += growth;
            growth = 0;
        }
    }

    UserAllocation {
        band,
        stablecoin_percent: stable as u32,
        major_assets_percent: major as u32,
        growth_assets_percent: growth as u32,
        max_drawdown_tolerance: max_drawdown,
        rebalance_frequency_days: frequency,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub user_id: String,
    pub age: u32,
    pub risk_tolerance: u32,
    pub goals_score: u32,
    pub experience_score: u32,
    pub time_horizon: u32,
    pub composite_score: u32,
    pub locked: bool,
    /// Requires manual review
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl RiskProfile {
    pub fn allocation(&self) -> UserAllocation {
        generate_allocation(self.age, self.composite_score, self.time_horizon)
    }

    fn recompute(&mut self) {
        self.composite_score = composite_score(
            self.risk_tolerance,
            self.goals_score,
            self.experience_score,
            self.time_horizon,
        );
    }
}

/// Partial update of a profile's normalized scores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub age: Option<u32>,
    pub risk_tolerance: Option<u32>,
    pub goals_score: Option<u32>,
    pub experience_score: Option<u32>,
    pub time_horizon: Option<u32>,
}

fn check_range(name: &str, value: Option<u32>, min: u32, max: u32) -> Result<()> {
    match value {
        Some(v) if v < min || v > max => Err(GuardError::Validation(format!(
            "{} {} out of range {}..={}",
            name, v, min, max
        ))),
        _ => Ok(()),
    }
}

impl ProfileUpdate {
    fn validate(&self) -> Result<()> {
        check_range("risk_tolerance", self.risk_tolerance, 1, 10)?;
        check_range("goals_score", self.goals_score, 1, 4)?;
        check_range("experience_score", self.experience_score, 1, 4)?;
        check_range("time_horizon", self.time_horizon, 1, 30)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileAlertType {
    SuspiciousProfile,
    SuspiciousChange,
}

impl ProfileAlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileAlertType::SuspiciousProfile => "suspicious_profile",
            ProfileAlertType::SuspiciousChange => "suspicious_change",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileAlert {
    pub id: Uuid,
    pub user_id: String,
    pub age: u32,
    pub risk_tolerance: u32,
    pub alert_type: ProfileAlertType,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub reviewed: bool,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Result of creating or updating a profile
#[derive(Debug, Clone, Serialize)]
pub struct ProfileOutcome {
    pub profile: RiskProfile,
    pub allocation: UserAllocation,
    pub alert: Option<ProfileAlert>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilerStats {
    pub total_profiles: usize,
    pub conservative_profiles: usize,
    pub balanced_profiles: usize,
    pub growth_profiles: usize,
    pub aggressive_profiles: usize,
    pub locked_profiles: usize,
    pub flagged_profiles: usize,
    pub unreviewed_alerts: usize,
}

/// Per-user risk profiler
pub struct RiskProfiler {
    config: ProfilerConfig,
    profiles: SharedStore<String, RiskProfile>,
    allocations: SharedStore<String, UserAllocation>,
    alerts: RwLock<Vec<ProfileAlert>>,
    sink: Arc<dyn ActionSink>,
    clock: SharedClock,
    /// Serializes profile writes
    write_lock: Mutex<()>,
}

impl RiskProfiler {
    pub fn new(config: ProfilerConfig, sink: Arc<dyn ActionSink>, clock: SharedClock) -> Self {
        Self::with_stores(config, MemoryStore::shared(), MemoryStore::shared(), sink, clock)
    }

    pub fn with_stores(
        config: ProfilerConfig,
        profiles: SharedStore<String, RiskProfile>,
        allocations: SharedStore<String, UserAllocation>,
        sink: Arc<dyn ActionSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            profiles,
            allocations,
            alerts: RwLock::new(Vec::new()),
            sink,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Reason text when the age / risk tolerance combination looks implausible
    pub fn is_suspicious(&self, age: u32, risk_tolerance: u32) -> Option<String> {
        if age > self.config.max_age_for_high_risk && risk_tolerance > 8 {
            return Some(format!(
                "elderly investor (age {}) with high-risk tolerance {}",
                age, risk_tolerance
            ));
        }
        if age < self.config.young_age_limit && risk_tolerance == 10 {
            return Some(format!(
                "very young investor (age {}) with maximum risk tolerance",
                age
            ));
        }
        None
    }

    pub async fn create_profile(
        &self,
        user_id: &str,
        age: u32,
        responses: &HashMap<u32, u32>,
    ) -> Result<ProfileOutcome> {
        if age < self.config.min_age {
            return Err(GuardError::Validation(format!(
                "Below minimum age of {}",
                self.config.min_age
            )));
        }
        let scores = compute_score(responses, age)?;

        let outcome = {
            let _guard = self.write_lock.lock().await;
            if self.profiles.contains(&user_id.to_string()) {
                return Err(GuardError::ProfileExists(user_id.to_string()));
            }

            let now = self.clock.now();
            let mut profile = RiskProfile {
                user_id: user_id.to_string(),
                age,
                risk_tolerance: scores.risk_tolerance,
                goals_score: scores.goals,
                experience_score: scores.experience,
                time_horizon: scores.time_horizon,
                composite_score: scores.composite,
                locked: false,
                flagged: false,
                created_at: now,
                last_updated: now,
            };

            let alert = match self.is_suspicious(age, scores.risk_tolerance) {
                Some(reason) => {
                    profile.flagged = true;
                    Some(
                        self.create_alert(&profile, ProfileAlertType::SuspiciousProfile, reason)
                            .await,
                    )
                }
                None => None,
            };

            let allocation = profile.allocation();
            self.profiles.put(user_id.to_string(), profile.clone());
            self.allocations.put(user_id.to_string(), allocation);
            info!(
                user = user_id,
                composite = profile.composite_score,
                band = ?allocation.band,
                "Profile created"
            );

            ProfileOutcome {
                profile,
                allocation,
                alert,
            }
        };

        self.propose_alert(outcome.alert.as_ref()).await;
        Ok(outcome)
    }

    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<ProfileOutcome> {
        update.validate()?;
        if let Some(age) = update.age {
            if age < self.config.min_age {
                return Err(GuardError::Validation(format!(
                    "Below minimum age of {}",
                    self.config.min_age
                )));
            }
        }

        let outcome = {
            let _guard = self.write_lock.lock().await;
            let mut profile = self
                .profiles
                .get(&user_id.to_string())
                .ok_or_else(|| GuardError::ProfileNotFound(user_id.to_string()))?;
            if profile.locked {
                return Err(GuardError::ProfileLocked(user_id.to_string()));
            }

            let previous = profile.composite_score;
            if let Some(age) = update.age {
                profile.age = age;
            }
            if let Some(rt) = update.risk_tolerance {
                profile.risk_tolerance = rt;
            }
            if let Some(goals) = update.goals_score {
                profile.goals_score = goals;
            }
            if let Some(exp) = update.experience_score {
                profile.experience_score = exp;
            }
            if let Some(th) = update.time_horizon {
                profile.time_horizon = th;
            }
            profile.recompute();
            profile.last_updated = self.clock.now();

            let delta = profile.composite_score.abs_diff(previous);
            let flag = if delta > self.config.suspicious_change_threshold {
                Some((
                    ProfileAlertType::SuspiciousChange,
                    format!(
                        "composite score changed by {} points ({} -> {})",
                        delta, previous, profile.composite_score
                    ),
                ))
            } else {
                self.is_suspicious(profile.age, profile.risk_tolerance)
                    .map(|reason| (ProfileAlertType::SuspiciousProfile, reason))
            };

            let alert = match flag {
                Some((alert_type, reason)) => {
                    profile.flagged = true;
                    Some(self.create_alert(&profile, alert_type, reason).await)
                }
                None => None,
            };

            let allocation = profile.allocation();
            self.profiles.put(user_id.to_string(), profile.clone());
            self.allocations.put(user_id.to_string(), allocation);
            info!(user = user_id, composite = profile.composite_score, "Profile updated");

            ProfileOutcome {
                profile,
                allocation,
                alert,
            }
        };

        self.propose_alert(outcome.alert.as_ref()).await;
        Ok(outcome)
    }

    async fn create_alert(
        &self,
        profile: &RiskProfile,
        alert_type: ProfileAlertType,
        reason: String,
    ) -> ProfileAlert {
        let alert = ProfileAlert {
            id: Uuid::new_v4(),
            user_id: profile.user_id.clone(),
            age: profile.age,
            risk_tolerance: profile.risk_tolerance,
            alert_type,
            reason,
            timestamp: self.clock.now(),
            reviewed: false,
            reviewed_at: None,
        };
        warn!(
            "Profile alert created: {} for user {} ({})",
            alert_type.as_str(),
            profile.user_id,
            alert.reason
        );
        self.alerts.write().await.push(alert.clone());
        alert
    }

    async fn propose_alert(&self, alert: Option<&ProfileAlert>) {
        let Some(alert) = alert else {
            return;
        };
        let proposal = ActionProposal::new(
            AgentId::Profiler,
            ActionType::ProfileAlert,
            ActionPriority::Low.value(),
            json!({
                "alert_id": alert.id,
                "user_id": alert.user_id,
                "alert_type": alert.alert_type,
                "reason": alert.reason,
                "age": alert.age,
                "risk_tolerance": alert.risk_tolerance,
            }),
        );
        if let Err(e) = self.sink.propose(proposal).await {
            error!("Failed to propose profile alert: {}", e);
        }
    }

    pub async fn lock_profile(&self, user_id: &str, lock: bool) -> Result<RiskProfile> {
        let _guard = self.write_lock.lock().await;
        let mut profile = self
            .profiles
            .get(&user_id.to_string())
            .ok_or_else(|| GuardError::ProfileNotFound(user_id.to_string()))?;
        profile.locked = lock;
        self.profiles.put(user_id.to_string(), profile.clone());
        info!(
            "Profile {} {}",
            user_id,
            if lock { "locked" } else { "unlocked" }
        );
        Ok(profile)
    }

    pub fn user_profile(&self, user_id: &str) -> Option<RiskProfile> {
        self.profiles.get(&user_id.to_string())
    }

    pub fn user_allocation(&self, user_id: &str) -> Option<UserAllocation> {
        self.allocations.get(&user_id.to_string())
    }

    /// False for unknown users
    pub fn verify_risk_compliance(&self, user_id: &str, required_max_risk: u32) -> bool {
        self.user_profile(user_id)
            .map(|p| p.risk_tolerance <= required_max_risk)
            .unwrap_or(false)
    }

    pub async fn profile_alerts(&self, reviewed: bool) -> Vec<ProfileAlert> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| a.reviewed == reviewed)
            .cloned()
            .collect()
    }

    pub async fn review_alert(&self, alert_id: Uuid) -> bool {
        let now = self.clock.now();
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.reviewed = true;
                alert.reviewed_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// Allocation for a hypothetical profile with intermediate experience
    pub fn simulate_allocation(
        &self,
        age: u32,
        risk_tolerance: u32,
        goals: u32,
        time_horizon: u32,
    ) -> UserAllocation {
        let composite = composite_score(risk_tolerance, goals, 2, time_horizon);
        generate_allocation(age, composite, time_horizon)
    }

    pub async fn stats(&self) -> ProfilerStats {
        let profiles = self.profiles.scan();
        let band_count = |band: AllocationBand| {
            profiles
                .iter()
                .filter(|(_, p)| AllocationBand::from_composite(p.composite_score) == band)
                .count()
        };
        ProfilerStats {
            total_profiles: profiles.len(),
            conservative_profiles: band_count(AllocationBand::Conservative),
            balanced_profiles: band_count(AllocationBand::Balanced),
            growth_profiles: band_count(AllocationBand::Growth),
            aggressive_profiles: band_count(AllocationBand::Aggressive),
            locked_profiles: profiles.iter().filter(|(_, p)| p.locked).count(),
            flagged_profiles: profiles.iter().filter(|(_, p)| p.flagged).count(),
            unreviewed_alerts: self.alerts.read().await.iter().filter(|a| !a.reviewed).count(),
        }
    }
}
