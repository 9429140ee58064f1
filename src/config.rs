use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{GuardError, Result};
use crate::platform::types::AgentId;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub guardian: GuardianConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Pending actions allowed before low/medium actions are evicted
    #[serde(default = "default_max_pending")]
    pub max_pending_actions: usize,
    /// Pending actions older than this are not checked for conflicts
    #[serde(default = "default_conflict_window")]
    pub conflict_window_secs: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Actions executed per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Only actions at or above this priority (numerically at or below) are retried
    #[serde(default = "default_retry_max_priority")]
    pub retry_max_priority: u8,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_ms: u64,
    /// Capacity of the agent -> orchestrator proposal channel
    #[serde(default = "default_channel_capacity")]
    pub inbound_capacity: usize,
    #[serde(default = "default_channel_capacity")]
    pub event_capacity: usize,
    /// Conflict tie-break order, first entry has the highest authority
    #[serde(default = "default_source_hierarchy")]
    pub source_hierarchy: Vec<AgentId>,
}

fn default_max_pending() -> usize {
    10
}

fn default_conflict_window() -> u64 {
    300
}

fn default_tick_interval() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_max_priority() -> u8 {
    2
}

fn default_history_limit() -> usize {
    1000
}

fn default_handler_timeout() -> u64 {
    10_000
}

fn default_channel_capacity() -> usize {
    256
}

fn default_source_hierarchy() -> Vec<AgentId> {
    AgentId::ALL.to_vec()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_pending_actions: default_max_pending(),
            conflict_window_secs: default_conflict_window(),
            tick_interval_ms: default_tick_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            retry_max_priority: default_retry_max_priority(),
            history_limit: default_history_limit(),
            handler_timeout_ms: default_handler_timeout(),
            inbound_capacity: default_channel_capacity(),
            event_capacity: default_channel_capacity(),
            source_hierarchy: default_source_hierarchy(),
        }
    }
}

impl OrchestratorConfig {
    pub fn conflict_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.conflict_window_secs as i64)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    pub fn handler_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.handler_timeout_ms)
    }
}

/// Which secondary scorer, if any, blends into the rule-based anomaly score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryScorerKind {
    #[default]
    None,
    Randomized,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchdogConfig {
    /// Score at or above which an alert is raised (0-100)
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u32,
    /// Score at or above which the actor is frozen (0-100)
    #[serde(default = "default_freeze_threshold")]
    pub freeze_threshold: u32,
    /// Alert threshold for actors placed under watch by the profiler
    #[serde(default = "default_watched_alert_threshold")]
    pub watched_alert_threshold: u32,
    #[serde(default)]
    pub secondary_scorer: SecondaryScorerKind,
    #[serde(default = "default_secondary_weight")]
    pub secondary_weight: f64,
    /// Prior events required before the secondary scorer is consulted
    #[serde(default = "default_min_history")]
    pub min_history_for_secondary: u64,
    /// Prior events required before a new hour block counts as unusual
    #[serde(default = "default_min_history")]
    pub min_history_for_timing: u64,
    /// Prior events required before rapid activity counts
    #[serde(default = "default_min_history_frequency")]
    pub min_history_for_frequency: u64,
    #[serde(default = "default_rapid_gap")]
    pub rapid_gap_secs: i64,
    /// Admin actions above average x multiplier require a challenge
    #[serde(default = "default_challenge_multiplier")]
    pub admin_challenge_multiplier: u32,
    #[serde(default = "default_required_approvals")]
    pub challenge_required_approvals: u32,
    #[serde(default = "default_hour_secs")]
    pub challenge_deadline_secs: i64,
    /// Alerts newer than this block admin actions by the same actor
    #[serde(default = "default_hour_secs")]
    pub recent_alert_window_secs: i64,
    /// Actors registered as admins at startup
    #[serde(default)]
    pub admins: Vec<String>,
}

fn default_alert_threshold() -> u32 {
    75
}

fn default_freeze_threshold() -> u32 {
    90
}

fn default_watched_alert_threshold() -> u32 {
    50
}

fn default_secondary_weight() -> f64 {
    0.4
}

fn default_min_history() -> u64 {
    10
}

fn default_min_history_frequency() -> u64 {
    5
}

fn default_rapid_gap() -> i64 {
    60
}

fn default_challenge_multiplier() -> u32 {
    5
}

fn default_required_approvals() -> u32 {
    2
}

fn default_hour_secs() -> i64 {
    3600
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            alert_threshold: default_alert_threshold(),
            freeze_threshold: default_freeze_threshold(),
            watched_alert_threshold: default_watched_alert_threshold(),
            secondary_scorer: SecondaryScorerKind::None,
            secondary_weight: default_secondary_weight(),
            min_history_for_secondary: default_min_history(),
            min_history_for_timing: default_min_history(),
            min_history_for_frequency: default_min_history_frequency(),
            rapid_gap_secs: default_rapid_gap(),
            admin_challenge_multiplier: default_challenge_multiplier(),
            challenge_required_approvals: default_required_approvals(),
            challenge_deadline_secs: default_hour_secs(),
            recent_alert_window_secs: default_hour_secs(),
            admins: Vec::new(),
        }
    }
}

/// Tracked asset and its weight in the market score
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AssetWeight {
    pub symbol: String,
    pub weight: u32,
}

impl AssetWeight {
    pub fn new(symbol: &str, weight: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            weight,
        }
    }
}

/// How a tier threshold is compared against the market score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierTrigger {
    /// Downturn tiers: `score <= threshold`
    AtOrBelow,
    /// Bull tier: `score >= threshold`
    AtOrAbove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RebalanceTier {
    pub threshold: i32,
    pub stablecoin_target: u32,
    pub speed: u32,
    pub trigger: TierTrigger,
}

impl RebalanceTier {
    pub fn matches(&self, market_score: i32) -> bool {
        match self.trigger {
            TierTrigger::AtOrBelow => market_score <= self.threshold,
            TierTrigger::AtOrAbove => market_score >= self.threshold,
        }
    }
}

/// Treasury risk appetite, selects the stablecoin bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAppetite {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl RiskAppetite {
    /// (min, max) stablecoin percent
    pub fn bounds(&self) -> (u32, u32) {
        match self {
            RiskAppetite::Conservative => (40, 80),
            RiskAppetite::Balanced => (20, 70),
            RiskAppetite::Aggressive => (10, 50),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardianConfig {
    #[serde(default = "default_assets")]
    pub assets: Vec<AssetWeight>,
    #[serde(default = "default_initial_stablecoin")]
    pub initial_stablecoin_percent: u32,
    #[serde(default)]
    pub risk_appetite: RiskAppetite,
    #[serde(default = "default_min_stablecoin")]
    pub min_stablecoin: u32,
    #[serde(default = "default_max_stablecoin")]
    pub max_stablecoin: u32,
    #[serde(default = "default_cooldown")]
    pub rebalance_cooldown_secs: i64,
    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,
    /// Breaker trips when average volatility is above this...
    #[serde(default = "default_breaker_volatility")]
    pub circuit_breaker_volatility: f64,
    /// ...and average confidence is below this
    #[serde(default = "default_breaker_confidence")]
    pub circuit_breaker_confidence: f64,
    /// How long a freeze or critical alert pauses rebalancing; 0 means until resumed
    #[serde(default = "default_pause_secs")]
    pub pause_secs: i64,
    /// Evaluated in order, first match wins
    #[serde(default = "default_tiers")]
    pub tiers: Vec<RebalanceTier>,
    #[serde(default = "default_rebalance_history")]
    pub history_limit: usize,
}

fn default_assets() -> Vec<AssetWeight> {
    vec![
        AssetWeight::new("BTC", 40),
        AssetWeight::new("ETH", 30),
        AssetWeight::new("SOL", 30),
    ]
}

fn default_initial_stablecoin() -> u32 {
    30
}

fn default_min_stablecoin() -> u32 {
    20
}

fn default_max_stablecoin() -> u32 {
    70
}

fn default_cooldown() -> i64 {
    1800
}

fn default_true() -> bool {
    true
}

fn default_breaker_volatility() -> f64 {
    90.0
}

fn default_breaker_confidence() -> f64 {
    50.0
}

fn default_pause_secs() -> i64 {
    3600
}

fn default_tiers() -> Vec<RebalanceTier> {
    use TierTrigger::*;
    vec![
        RebalanceTier { threshold: -60, stablecoin_target: 80, speed: 3, trigger: AtOrBelow },
        RebalanceTier { threshold: -40, stablecoin_target: 60, speed: 2, trigger: AtOrBelow },
        RebalanceTier { threshold: -20, stablecoin_target: 40, speed: 1, trigger: AtOrBelow },
        RebalanceTier { threshold: 40, stablecoin_target: 20, speed: 1, trigger: AtOrAbove },
    ]
}

fn default_rebalance_history() -> usize {
    100
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            assets: default_assets(),
            initial_stablecoin_percent: default_initial_stablecoin(),
            risk_appetite: RiskAppetite::Balanced,
            min_stablecoin: default_min_stablecoin(),
            max_stablecoin: default_max_stablecoin(),
            rebalance_cooldown_secs: default_cooldown(),
            circuit_breaker_enabled: true,
            circuit_breaker_volatility: default_breaker_volatility(),
            circuit_breaker_confidence: default_breaker_confidence(),
            pause_secs: default_pause_secs(),
            tiers: default_tiers(),
            history_limit: default_rebalance_history(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfilerConfig {
    #[serde(default = "default_min_age")]
    pub min_age: u32,
    /// Above this age a risk tolerance over 8 is suspicious
    #[serde(default = "default_max_age_for_high_risk")]
    pub max_age_for_high_risk: u32,
    /// Below this age a maximum risk tolerance is suspicious
    #[serde(default = "default_young_age")]
    pub young_age_limit: u32,
    /// Composite score change that requires review
    #[serde(default = "default_change_threshold")]
    pub suspicious_change_threshold: u32,
}

fn default_min_age() -> u32 {
    18
}

fn default_max_age_for_high_risk() -> u32 {
    55
}

fn default_young_age() -> u32 {
    25
}

fn default_change_threshold() -> u32 {
    30
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            min_age: default_min_age(),
            max_age_for_high_risk: default_max_age_for_high_risk(),
            young_age_limit: default_young_age(),
            suspicious_change_threshold: default_change_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TREASURY_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // TREASURY_ORCHESTRATOR__BATCH_SIZE, TREASURY_WATCHDOG__ALERT_THRESHOLD, ...
            .add_source(
                Environment::with_prefix("TREASURY")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load and validate, folding validation failures into one error
    pub fn load_validated<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let cfg = Self::load_from(config_dir)?;
        cfg.validate()
            .map_err(|errors| GuardError::Validation(errors.join("; ")))?;
        Ok(cfg)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let orch = &self.orchestrator;
        if orch.max_pending_actions == 0 {
            errors.push("orchestrator.max_pending_actions must be positive".to_string());
        }
        if orch.batch_size == 0 {
            errors.push("orchestrator.batch_size must be positive".to_string());
        }
        if orch.max_attempts == 0 {
            errors.push("orchestrator.max_attempts must be positive".to_string());
        }
        if orch.handler_timeout_ms == 0 {
            errors.push("orchestrator.handler_timeout_ms must be finite and positive".to_string());
        }
        if orch.tick_interval_ms == 0 {
            errors.push("orchestrator.tick_interval_ms must be positive".to_string());
        }
        if orch.inbound_capacity == 0 || orch.event_capacity == 0 {
            errors.push("orchestrator channel capacities must be positive".to_string());
        }
        let unique: HashSet<_> = orch.source_hierarchy.iter().collect();
        if unique.len() != orch.source_hierarchy.len()
            || AgentId::ALL.iter().any(|a| !unique.contains(a))
        {
            errors.push(
                "orchestrator.source_hierarchy must rank watchdog, guardian and profiler exactly once"
                    .to_string(),
            );
        }

        let wd = &self.watchdog;
        if wd.alert_threshold > 100 || wd.freeze_threshold > 100 {
            errors.push("watchdog thresholds must be within 0..=100".to_string());
        }
        if wd.alert_threshold > wd.freeze_threshold {
            errors.push("watchdog.alert_threshold must not exceed freeze_threshold".to_string());
        }
        if wd.watched_alert_threshold > wd.alert_threshold {
            errors.push("watchdog.watched_alert_threshold must not exceed alert_threshold".to_string());
        }
        if !(0.0..=1.0).contains(&wd.secondary_weight) {
            errors.push("watchdog.secondary_weight must be within 0..=1".to_string());
        }

        let g = &self.guardian;
        if g.assets.is_empty() {
            errors.push("guardian.assets must not be empty".to_string());
        }
        if g.assets.iter().any(|a| a.weight == 0) {
            errors.push("guardian asset weights must be positive".to_string());
        }
        if g.min_stablecoin > g.max_stablecoin || g.max_stablecoin > 100 {
            errors.push("guardian stablecoin bounds must satisfy min <= max <= 100".to_string());
        }
        if g.initial_stablecoin_percent < g.min_stablecoin
            || g.initial_stablecoin_percent > g.max_stablecoin
        {
            errors.push("guardian.initial_stablecoin_percent must lie within the bounds".to_string());
        }
        if g.rebalance_cooldown_secs < 0 {
            errors.push("guardian.rebalance_cooldown_secs must not be negative".to_string());
        }
        if g.pause_secs < 0 {
            errors.push("guardian.pause_secs must not be negative".to_string());
        }
        if g.tiers.is_empty() {
            errors.push("guardian.tiers must not be empty".to_string());
        }
        if g.tiers.iter().any(|t| t.stablecoin_target > 100 || t.speed == 0) {
            errors.push("guardian tiers need a target within 0..=100 and a positive speed".to_string());
        }

        if self.profiler.min_age == 0 {
            errors.push("profiler.min_age must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.orchestrator.max_pending_actions, 10);
        assert_eq!(cfg.orchestrator.conflict_window(), chrono::Duration::minutes(5));
        assert_eq!(cfg.watchdog.alert_threshold, 75);
        assert_eq!(cfg.guardian.tiers.len(), 4);
        assert_eq!(cfg.guardian.tiers[3].trigger, TierTrigger::AtOrAbove);
    }

    #[test]
    fn test_load_from_directory_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
[orchestrator]
batch_size = 2
source_hierarchy = ["guardian", "watchdog", "profiler"]

[watchdog]
alert_threshold = 70
secondary_scorer = "randomized"

[guardian]
risk_appetite = "aggressive"
min_stablecoin = 10
max_stablecoin = 50
"#
        )
        .unwrap();

        let cfg = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(cfg.orchestrator.batch_size, 2);
        assert_eq!(cfg.orchestrator.source_hierarchy[0], AgentId::Guardian);
        // untouched keys keep their defaults
        assert_eq!(cfg.orchestrator.max_pending_actions, 10);
        assert_eq!(cfg.watchdog.alert_threshold, 70);
        assert_eq!(cfg.watchdog.secondary_scorer, SecondaryScorerKind::Randomized);
        assert_eq!(cfg.guardian.risk_appetite, RiskAppetite::Aggressive);
        assert_eq!(cfg.guardian.assets.len(), 3);
    }

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("absent")).unwrap();
        assert_eq!(cfg.orchestrator.tick_interval_ms, 5000);
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut cfg = AppConfig::default();
        cfg.watchdog.alert_threshold = 95;
        cfg.guardian.min_stablecoin = 80;
        cfg.orchestrator.source_hierarchy = vec![AgentId::Watchdog];

        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("alert_threshold")));
        assert!(errors.iter().any(|e| e.contains("bounds")));
        assert!(errors.iter().any(|e| e.contains("source_hierarchy")));
    }

    #[test]
    fn test_tier_matching_direction() {
        let tiers = default_tiers();
        assert!(tiers[0].matches(-65));
        assert!(!tiers[0].matches(-59));
        assert!(tiers[3].matches(40));
        assert!(!tiers[3].matches(39));
    }
}
