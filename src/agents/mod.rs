//! Policy agents
//!
//! Each agent owns its own state and pushes action proposals into an
//! [`ActionSink`](crate::platform::ActionSink); none of them executes
//! side effects directly.

pub mod anomaly;
pub mod profiler;
pub mod rebalancer;

pub use anomaly::{
    AdminValidation, Alert, AlertSeverity, AlertStatus, AlertType, AnomalyScorer, BehaviorProfile,
    Challenge, RandomizedScorer, ScoreBreakdown, SecondaryScorer, WatchdogStats,
};
pub use profiler::{
    quiz_questions, AllocationBand, ProfileAlert, ProfileAlertType, ProfileOutcome, ProfileUpdate,
    ProfilerStats, QuizQuestion, RiskProfile, RiskProfiler, UserAllocation,
};
pub use rebalancer::{
    GuardianStats, MarketRebalancer, MarketSnapshot, RebalanceCheck, RebalancePlan,
    RebalanceRecord, RebalanceSimulation, RiskSettings, TreasuryAllocation,
};
