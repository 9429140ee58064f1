pub mod agents;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod platform;

pub use agents::{AnomalyScorer, MarketRebalancer, RiskProfiler};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::AppConfig;
pub use engine::{EngineStatus, TreasuryEngine};
pub use error::{ActionError, GuardError, Result};
pub use persistence::{MemoryStore, SharedStore, Store};
pub use platform::{
    Action, ActionPriority, ActionProposal, ActionStatus, ActionType, AgentId,
    ConflictOrchestrator, HandlerRegistry, OrchestratorEvent, OrchestratorHandle, Ticker,
};
