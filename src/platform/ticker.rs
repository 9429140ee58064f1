//! Ticker - drives the orchestrator on a fixed cadence
//!
//! Agents hold an [`OrchestratorHandle`] and push proposals into a bounded
//! channel. The ticker drains that channel and then runs one orchestrator
//! tick, either on its interval or on demand through [`Ticker::run_once`].

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::orchestrator::{ConflictOrchestrator, TickSummary};
use super::traits::ActionSink;
use super::types::{ActionProposal, ActionType};
use crate::error::{GuardError, Result};

/// Messages agents send to the orchestrator, applied in arrival order
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Propose(ActionProposal),
    /// Reject every pending action of this type
    Withdraw { action_type: ActionType, reason: String },
}

/// Cloneable sender side of the orchestrator's inbound channel
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<InboundMessage>,
}

impl OrchestratorHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn send(&self, message: InboundMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| GuardError::ChannelClosed("orchestrator inbound".into()))
    }
}

#[async_trait]
impl ActionSink for OrchestratorHandle {
    async fn propose(&self, proposal: ActionProposal) -> Result<()> {
        self.send(InboundMessage::Propose(proposal)).await
    }

    async fn withdraw(&self, action_type: ActionType, reason: &str) -> Result<()> {
        self.send(InboundMessage::Withdraw {
            action_type,
            reason: reason.to_string(),
        })
        .await
    }
}

/// Result of one ticker cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Proposals admitted from the inbound channel
    pub admitted: usize,
    /// Proposals refused at submission (validation)
    pub refused: usize,
    /// Pending actions rejected by withdrawals
    pub withdrawn: usize,
    pub tick: TickSummary,
}

pub struct Ticker {
    orchestrator: Arc<ConflictOrchestrator>,
    inbound: mpsc::Receiver<InboundMessage>,
    period: Duration,
}

impl Ticker {
    pub fn new(orchestrator: Arc<ConflictOrchestrator>, inbound: mpsc::Receiver<InboundMessage>) -> Self {
        let period = orchestrator.config().tick_interval();
        Self {
            orchestrator,
            inbound,
            period,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Apply everything currently waiting in the inbound channel
    pub async fn drain_inbound(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        while let Ok(message) = self.inbound.try_recv() {
            match message {
                InboundMessage::Propose(proposal) => {
                    let (source, action_type) = (proposal.source, proposal.action_type);
                    match self.orchestrator.submit(proposal).await {
                        Ok(id) => {
                            debug!("Admitted {} from {} as {}", action_type, source, id);
                            report.admitted += 1;
                        }
                        Err(e) => {
                            warn!("Refused {} from {}: {}", action_type, source, e);
                            report.refused += 1;
                        }
                    }
                }
                InboundMessage::Withdraw {
                    action_type,
                    reason,
                } => {
                    report.withdrawn += self
                        .orchestrator
                        .reject_pending(action_type, &reason)
                        .await
                        .len();
                }
            }
        }
        report
    }

    /// One full cycle: drain the inbound channel, then process a tick
    pub async fn run_once(&mut self) -> CycleReport {
        let mut report = self.drain_inbound().await;
        let tick = self.orchestrator.process_tick().await;
        if tick.executed > 0 {
            debug!(
                "Tick: executed={} completed={} retried={} failed={}",
                tick.executed, tick.completed, tick.retried, tick.failed
            );
        }
        report.tick = tick;
        report
    }

    /// Run until the shutdown flag flips to true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticks = interval(self.period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Ticker started, period {:?}", self.period);

        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // last pass so nothing proposed before shutdown is silently dropped
        let report = self.run_once().await;
        if report.admitted > 0 {
            info!("Final tick admitted {} proposals", report.admitted);
        }
        let stats = self.orchestrator.stats().await;
        if stats.pending > 0 {
            error!("Ticker stopped with {} actions still pending", stats.pending);
        }
        info!("Ticker stopped");
    }
}
